use std::path::{Path, PathBuf};

use zerocopy::FromZeros as _;

use crate::archive::header_block::{
  decode_octal, encode_octal, EntryKind, HeaderBlock, HeaderError, OctalError, pad_to_block,
  BLOCK_SIZE,
};

/// The in-memory decoding of one header block plus the bookkeeping the
/// archive engine derives: the absolute offset of the header on disk and
/// the unmodified input path the entry was captured from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
  /// Path within the archive, at most 100 bytes.
  pub name: String,
  /// Permission bits; only the low 9 bits are captured.
  pub mode: u32,
  pub uid: u32,
  pub gid: u32,
  /// Payload byte count; zero for everything but regular files.
  pub size: u64,
  /// Modification time in epoch seconds.
  pub mtime: u64,
  /// Checksum as stored on disk (or as last emitted).
  pub checksum: u32,
  pub kind: EntryKind,
  /// Target path for hard and symbolic links.
  pub link_name: String,
  pub uname: String,
  pub gname: String,
  pub dev_major: u32,
  pub dev_minor: u32,
  /// Read for foreign archives, surfaced in the metadata dump, never
  /// joined onto `name` and never emitted.
  pub prefix: String,
  /// Absolute byte offset of this entry's header within the archive.
  pub begin: u64,
  /// The path this entry was captured from, pre-strip. `None` for entries
  /// scanned back from disk; hardlink dedup and update matching only ever
  /// consider entries where it is set.
  pub original_name: Option<PathBuf>,
}

impl ArchiveEntry {
  /// Payload length rounded up to whole blocks.
  #[must_use]
  pub fn padded_size(&self) -> u64 {
    pad_to_block(self.size)
  }

  /// Bytes this entry occupies on disk: header plus padded payload.
  #[must_use]
  pub fn span(&self) -> u64 {
    BLOCK_SIZE as u64 + self.padded_size()
  }

  /// Offset of the first payload byte.
  #[must_use]
  pub fn payload_offset(&self) -> u64 {
    self.begin + BLOCK_SIZE as u64
  }

  /// Decodes a header block. The checksum is verified first; text fields
  /// must be UTF-8.
  pub fn from_block(block: &HeaderBlock, begin: u64) -> Result<Self, HeaderError> {
    let checksum = block.verify_checksum()?;
    let text = |field: &'static str| HeaderError::BadText { field };
    Ok(ArchiveEntry {
      name: block.parse_name().map_err(|_| text("name"))?.into(),
      mode: decode_octal(&block.mode) as u32,
      uid: decode_octal(&block.uid) as u32,
      gid: decode_octal(&block.gid) as u32,
      size: decode_octal(&block.size),
      mtime: decode_octal(&block.mtime),
      checksum,
      kind: block.parse_kind(),
      link_name: block.parse_linkname().map_err(|_| text("linkname"))?.into(),
      uname: block.parse_uname().map_err(|_| text("uname"))?.into(),
      gname: block.parse_gname().map_err(|_| text("gname"))?.into(),
      dev_major: decode_octal(&block.dev_major) as u32,
      dev_minor: decode_octal(&block.dev_minor) as u32,
      prefix: block.parse_prefix().map_err(|_| text("prefix"))?.into(),
      begin,
      original_name: None,
    })
  }

  /// Encodes the entry into a fresh header block and refreshes the stored
  /// checksum to match.
  pub fn encode(&mut self) -> Result<HeaderBlock, HeaderError> {
    let mut block = HeaderBlock::new_zeroed();
    copy_text(&mut block.name, &self.name).ok_or_else(|| HeaderError::NameTooLong {
      name: self.name.clone(),
    })?;
    copy_text(&mut block.linkname, &self.link_name).ok_or_else(|| {
      HeaderError::LinkTargetTooLong {
        target: self.link_name.clone(),
      }
    })?;
    let numeric = |field: &'static str| move |source: OctalError| HeaderError::Numeric { field, source };

    // mode/uid/gid are seven digits plus NUL, size/mtime eleven plus NUL.
    encode_octal(&mut block.mode, 7, u64::from(self.mode)).map_err(numeric("mode"))?;
    encode_octal(&mut block.uid, 7, u64::from(self.uid)).map_err(numeric("uid"))?;
    encode_octal(&mut block.gid, 7, u64::from(self.gid)).map_err(numeric("gid"))?;
    encode_octal(&mut block.size, 11, self.size).map_err(numeric("size"))?;
    encode_octal(&mut block.mtime, 11, self.mtime).map_err(numeric("mtime"))?;
    block.typeflag = self.kind.into();
    block.magic = *HeaderBlock::MAGIC;
    block.version = *HeaderBlock::VERSION;
    // uname/gname are bounded fields; anything longer is cut at 31 bytes.
    copy_text_lossy(&mut block.uname, &self.uname);
    copy_text_lossy(&mut block.gname, &self.gname);
    if self.kind.is_device() {
      // devmajor/devminor fill all eight digits, no terminator
      encode_octal(&mut block.dev_major, 8, u64::from(self.dev_major))
        .map_err(numeric("devmajor"))?;
      encode_octal(&mut block.dev_minor, 8, u64::from(self.dev_minor))
        .map_err(numeric("devminor"))?;
    }
    self.checksum = block.store_checksum();
    Ok(block)
  }
}

/// Copies `text` into a fixed field; a trailing NUL is only present while
/// the field has room for one. Returns `None` when the text does not fit.
fn copy_text(field: &mut [u8], text: &str) -> Option<()> {
  let bytes = text.as_bytes();
  if bytes.len() > field.len() {
    return None;
  }
  field[..bytes.len()].copy_from_slice(bytes);
  Some(())
}

fn copy_text_lossy(field: &mut [u8], text: &str) {
  let take = text.len().min(field.len() - 1);
  field[..take].copy_from_slice(&text.as_bytes()[..take]);
}

/// Byte offset just past the final entry's padded payload; zero for an
/// empty list. Append positions here, overwriting the old terminator.
#[must_use]
pub fn end_of_entries(entries: &[ArchiveEntry]) -> u64 {
  entries.last().map_or(0, |entry| entry.begin + entry.span())
}

/// Looks an archive-internal name up in disk order.
#[must_use]
pub fn find_by_name<'a>(entries: &'a [ArchiveEntry], name: &str) -> Option<&'a ArchiveEntry> {
  entries.iter().find(|entry| entry.name == name)
}

/// Looks a capture path up by its pre-strip original name. Entries scanned
/// from disk carry no original name and never match.
#[must_use]
pub fn find_by_original<'a>(
  entries: &'a [ArchiveEntry],
  path: &Path,
) -> Option<&'a ArchiveEntry> {
  entries
    .iter()
    .find(|entry| entry.original_name.as_deref() == Some(path))
}
