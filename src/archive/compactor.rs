use std::{
  fs::File,
  io::{self, Cursor, Read, Seek, SeekFrom, Write},
};

use hashbrown::HashSet;

use crate::{
  archive::{
    entry::ArchiveEntry,
    errors::ArchiveError,
    header_block::BLOCK_SIZE,
    writer::write_terminator,
  },
  listing::Reporter,
};

/// The one capability `std::io` traits do not cover: cutting the archive
/// down after compaction.
pub trait Truncate {
  fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl Truncate for File {
  fn truncate(&mut self, len: u64) -> io::Result<()> {
    self.set_len(len)
  }
}

impl Truncate for Cursor<Vec<u8>> {
  fn truncate(&mut self, len: u64) -> io::Result<()> {
    self.get_mut().truncate(len as usize);
    Ok(())
  }
}

/// Removes every entry whose name is in `names`, compacting the archive in
/// place: survivors slide toward the start of the file in block-sized
/// chunks, then the file is truncated and re-terminated and every
/// survivor's offset is recomputed.
///
/// Names that are not present are reported and make the result
/// [`ArchiveError::MissingNames`], but the archive is still rewritten for
/// the names that were.
pub fn remove<A>(
  archive: &mut A,
  entries: &mut Vec<ArchiveEntry>,
  names: &[String],
  reporter: &mut Reporter<'_>,
) -> Result<(), ArchiveError>
where
  A: Read + Write + Seek + Truncate,
{
  if names.is_empty() {
    return Ok(());
  }

  let mut targets: HashSet<&str> = HashSet::with_capacity(names.len());
  let mut missing = 0;
  for name in names {
    if entries.iter().any(|entry| entry.name == *name) {
      targets.insert(name.as_str());
    } else {
      reporter.warn(format_args!("Error: {name} not found in archive"));
      missing += 1;
    }
  }

  let mut read_offset: u64 = 0;
  let mut write_offset: u64 = 0;
  let mut survivors = Vec::with_capacity(entries.len());

  for entry in entries.drain(..) {
    let span = entry.span();
    if targets.contains(entry.name.as_str()) {
      // dropped; the read window moves past it
      read_offset += span;
      continue;
    }
    if write_offset < read_offset {
      slide(archive, &mut read_offset, &mut write_offset, span)?;
    } else {
      read_offset += span;
      write_offset += span;
    }
    survivors.push(entry);
  }

  archive.truncate(write_offset)?;
  archive.seek(SeekFrom::Start(write_offset))?;
  write_terminator(archive, write_offset)?;

  let mut begin = 0;
  for entry in &mut survivors {
    entry.begin = begin;
    begin += entry.span();
  }
  *entries = survivors;

  if missing > 0 {
    return Err(ArchiveError::MissingNames { missing });
  }
  Ok(())
}

/// Copies `span` bytes from the read window to the write window one block
/// at a time. The windows are disjoint: the write window trails the read
/// window, so a forward copy never overwrites pending source blocks.
fn slide<A>(
  archive: &mut A,
  read_offset: &mut u64,
  write_offset: &mut u64,
  span: u64,
) -> io::Result<()>
where
  A: Read + Write + Seek,
{
  let mut buf = [0u8; BLOCK_SIZE];
  let mut moved = 0;
  while moved < span {
    archive.seek(SeekFrom::Start(*read_offset))?;
    archive.read_exact(&mut buf)?;
    archive.seek(SeekFrom::Start(*write_offset))?;
    archive.write_all(&buf)?;
    moved += BLOCK_SIZE as u64;
    *read_offset += BLOCK_SIZE as u64;
    *write_offset += BLOCK_SIZE as u64;
  }
  Ok(())
}
