use std::io::{self, Read, Seek, SeekFrom};

use zerocopy::FromBytes as _;

use crate::archive::{
  entry::ArchiveEntry,
  errors::ScanError,
  header_block::{is_zero_block, pad_to_block, HeaderBlock, BLOCK_SIZE, RECORD_SIZE},
};

/// Walks an archive from offset zero into an ordered entry list.
///
/// Two consecutive zero blocks terminate the walk; a single zero block
/// followed by a non-zero block is tolerated, with the non-zero block
/// treated as the next header. After the terminator the descriptor is left
/// at the following record boundary.
pub fn scan<R: Read + Seek>(archive: &mut R) -> Result<Vec<ArchiveEntry>, ScanError> {
  let mut entries = Vec::new();
  let mut offset: u64 = 0;
  let mut block = [0u8; BLOCK_SIZE];

  loop {
    read_block(archive, &mut block, offset)?;
    if is_zero_block(&block) {
      read_block(archive, &mut block, offset)?;
      if is_zero_block(&block) {
        // terminated; land on the record boundary past the padding,
        // measured from where the terminator blocks left the stream
        let position = archive
          .stream_position()
          .map_err(|source| ScanError::Io { offset, source })?;
        let skip = (RECORD_SIZE as u64 - (position % RECORD_SIZE as u64)) % RECORD_SIZE as u64;
        seek_forward(archive, skip, offset)?;
        return Ok(entries);
      }
      // lone zero block: what we just read is a real header
    }

    let header = HeaderBlock::ref_from_bytes(&block).expect("a block is exactly one header");
    let entry = ArchiveEntry::from_block(header, offset)
      .map_err(|source| ScanError::BadHeader { offset, source })?;

    // skip over the payload and its fill
    let payload = pad_to_block(entry.size);
    seek_forward(archive, payload, offset)?;
    offset += BLOCK_SIZE as u64 + payload;
    entries.push(entry);
  }
}

fn seek_forward<S: Seek>(archive: &mut S, by: u64, offset: u64) -> Result<(), ScanError> {
  archive
    .seek(SeekFrom::Current(by as i64))
    .map(|_| ())
    .map_err(|source| ScanError::Io { offset, source })
}

/// Reads a full block, looping over partial returns. Anything short of 512
/// bytes before the terminator fails the scan.
fn read_block<R: Read>(
  archive: &mut R,
  block: &mut [u8; BLOCK_SIZE],
  offset: u64,
) -> Result<(), ScanError> {
  let mut got = 0;
  while got < BLOCK_SIZE {
    match archive.read(&mut block[got..]) {
      Ok(0) => return Err(ScanError::UnexpectedEof { offset }),
      Ok(n) => got += n,
      Err(err) if err.kind() == io::ErrorKind::Interrupted => {},
      Err(source) => return Err(ScanError::Io { offset, source }),
    }
  }
  Ok(())
}
