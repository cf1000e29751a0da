use std::{
  cmp::min,
  fs::{self, DirBuilder, OpenOptions},
  io::{self, Read, Seek, SeekFrom, Write},
  os::unix::fs::{symlink, DirBuilderExt as _, OpenOptionsExt as _},
  path::Path,
};

use relative_path::RelativePath;

use crate::{
  archive::{ArchiveEntry, ArchiveError, EntryKind, RestoreError, BLOCK_SIZE, DEFAULT_DIR_MODE},
  fsio::sys,
  listing::Reporter,
};

/// Mirrors entries onto the filesystem, all of them or those whose name
/// matches an argument exactly. A failing entry is reported and the walk
/// continues; the result is then [`ArchiveError::Partial`]. Nodes that
/// already exist are left alone.
pub fn extract<R: Read + Seek>(
  archive: &mut R,
  entries: &[ArchiveEntry],
  names: &[String],
  reporter: &mut Reporter<'_>,
) -> Result<(), ArchiveError> {
  let mut failed = 0;
  let mut total = 0;
  for entry in entries {
    if !names.is_empty() && !names.iter().any(|name| *name == entry.name) {
      continue;
    }
    total += 1;
    reporter.name(&entry.name);
    if let Err(err) = restore_entry(archive, entry) {
      reporter.warn(format_args!("Error: {err}"));
      failed += 1;
    }
  }
  if failed > 0 {
    return Err(ArchiveError::Partial { failed, total });
  }
  Ok(())
}

fn restore_entry<R: Read + Seek>(archive: &mut R, entry: &ArchiveEntry) -> Result<(), RestoreError> {
  if entry.name.is_empty() {
    return Err(RestoreError::EmptyName);
  }
  let created = |source| RestoreError::Create {
    path: Path::new(&entry.name).to_path_buf(),
    source,
  };
  match entry.kind {
    EntryKind::RegularFile | EntryKind::ContiguousFile => restore_file(archive, entry),
    EntryKind::HardLink => {
      ignore_exists(fs::hard_link(&entry.link_name, &entry.name)).map_err(created)
    },
    EntryKind::SymbolicLink => {
      ignore_exists(symlink(&entry.link_name, &entry.name)).map_err(created)
    },
    EntryKind::CharacterDevice => make_node(entry, libc::S_IFCHR).map_err(created),
    EntryKind::BlockDevice => make_node(entry, libc::S_IFBLK).map_err(created),
    EntryKind::Directory => {
      make_dirs(Path::new(&entry.name), entry.mode & 0o777).map_err(|source| RestoreError::Dir {
        path: Path::new(&entry.name).to_path_buf(),
        source,
      })
    },
    EntryKind::Fifo => {
      ignore_exists(sys::mkfifo(Path::new(&entry.name), entry.mode & 0o777)).map_err(created)
    },
    EntryKind::Unknown(flag) => Err(RestoreError::UnsupportedType {
      flag,
      name: entry.name.clone(),
    }),
  }
}

/// Copies a regular entry's payload out of the archive, creating the
/// parent directories first and truncating any previous file.
fn restore_file<R: Read + Seek>(archive: &mut R, entry: &ArchiveEntry) -> Result<(), RestoreError> {
  if let Some(parent) = RelativePath::new(&entry.name).parent() {
    if !parent.as_str().is_empty() {
      let parent = parent.to_path("");
      make_dirs(&parent, DEFAULT_DIR_MODE)
        .map_err(|source| RestoreError::Dir { path: parent, source })?;
    }
  }

  let path = Path::new(&entry.name);
  let mut out = OpenOptions::new()
    .write(true)
    .create(true)
    .truncate(true)
    .mode(entry.mode & 0o7777)
    .open(path)
    .map_err(|source| RestoreError::Create {
      path: path.to_path_buf(),
      source,
    })?;

  let payload = |source| RestoreError::Payload {
    name: entry.name.clone(),
    source,
  };
  archive
    .seek(SeekFrom::Start(entry.payload_offset()))
    .map_err(payload)?;

  let mut buf = [0u8; BLOCK_SIZE];
  let mut got: u64 = 0;
  while got < entry.size {
    let want = min(entry.size - got, BLOCK_SIZE as u64) as usize;
    let read = match archive.read(&mut buf[..want]) {
      Ok(0) => {
        return Err(RestoreError::ShortPayload {
          name: entry.name.clone(),
        });
      },
      Ok(n) => n,
      Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
      Err(source) => return Err(payload(source)),
    };
    out
      .write_all(&buf[..read])
      .map_err(|source| RestoreError::WriteFile {
        path: path.to_path_buf(),
        source,
      })?;
    got += read as u64;
  }
  Ok(())
}

fn make_node(entry: &ArchiveEntry, type_bit: u32) -> io::Result<()> {
  // legacy packing, byte-compatible with archives this tool wrote
  let dev = (u64::from(entry.dev_major) << 20) | u64::from(entry.dev_minor);
  ignore_exists(sys::mknod(
    Path::new(&entry.name),
    type_bit | (entry.mode & 0o777),
    dev,
  ))
}

/// Creates a directory chain, applying `mode` to every directory created.
fn make_dirs(path: &Path, mode: u32) -> io::Result<()> {
  if path.as_os_str().is_empty() {
    return Ok(());
  }
  let mode = if mode == 0 { DEFAULT_DIR_MODE } else { mode };
  DirBuilder::new().recursive(true).mode(mode).create(path)
}

/// Special files that already exist are not replaced, and that is not an
/// error.
fn ignore_exists(result: io::Result<()>) -> io::Result<()> {
  match result {
    Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(()),
    other => other,
  }
}
