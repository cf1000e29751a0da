use std::{
  cmp::min,
  io::{self, Read, Write},
  path::Path,
};

use zerocopy::IntoBytes as _;

use crate::archive::{
  entry::ArchiveEntry,
  errors::ArchiveError,
  header_block::{pad_to_block, HeaderBlock, BLOCK_SIZE, RECORD_SIZE, ZERO_BLOCK},
};

/// Emits one header block at the current position.
pub fn write_header<W: Write>(out: &mut W, block: &HeaderBlock) -> io::Result<()> {
  out.write_all(block.as_bytes())
}

/// Encodes and emits an entry's header, refreshing its checksum.
pub fn emit_header<W: Write>(out: &mut W, entry: &mut ArchiveEntry) -> Result<(), ArchiveError> {
  let block = entry.encode().map_err(|source| ArchiveError::Encode {
    name: entry.name.clone(),
    source,
  })?;
  write_header(out, &block)?;
  Ok(())
}

/// Streams exactly `size` payload bytes from `src` in block-sized chunks.
/// A source that dries up early fails the operation; the header already on
/// disk promised `size` bytes.
pub fn copy_payload<R: Read, W: Write>(
  out: &mut W,
  src: &mut R,
  size: u64,
  path: &Path,
) -> Result<(), ArchiveError> {
  let mut buf = [0u8; BLOCK_SIZE];
  let mut got: u64 = 0;
  while got < size {
    let want = min(size - got, BLOCK_SIZE as u64) as usize;
    let read = match src.read(&mut buf[..want]) {
      Ok(0) => {
        return Err(ArchiveError::ShortSource {
          path: path.to_path_buf(),
          expected: size,
          got,
        });
      },
      Ok(n) => n,
      Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
      Err(err) => return Err(err.into()),
    };
    out.write_all(&buf[..read])?;
    got += read as u64;
  }
  Ok(())
}

/// NUL-fills the last payload block.
pub fn write_padding<W: Write>(out: &mut W, size: u64) -> io::Result<u64> {
  let pad = pad_to_block(size) - size;
  out.write_all(&ZERO_BLOCK[..pad as usize])?;
  Ok(pad)
}

fn write_zeros<W: Write>(out: &mut W, mut count: u64) -> io::Result<()> {
  while count > 0 {
    let chunk = min(count, BLOCK_SIZE as u64) as usize;
    out.write_all(&ZERO_BLOCK[..chunk])?;
    count -= chunk as u64;
  }
  Ok(())
}

/// Terminates an archive whose entries end at byte `end`: pads out the
/// current record with zeros, and when that leaves fewer than two zero
/// blocks, appends one more full zero record. Returns the bytes written,
/// leaving the file length a record multiple with at least two trailing
/// zero blocks.
pub fn write_terminator<W: Write>(out: &mut W, end: u64) -> io::Result<u64> {
  let pad = RECORD_SIZE as u64 - (end % RECORD_SIZE as u64);
  write_zeros(out, pad)?;
  if pad < 2 * BLOCK_SIZE as u64 {
    write_zeros(out, RECORD_SIZE as u64)?;
    return Ok(pad + RECORD_SIZE as u64);
  }
  Ok(pad)
}
