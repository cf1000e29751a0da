use std::{
  fs::{self, File},
  io::{Seek, SeekFrom, Write},
  os::unix::fs::MetadataExt as _,
  path::{Path, PathBuf},
};

use hashbrown::HashMap;

use crate::{
  archive::{
    copy_payload, end_of_entries, find_by_name, find_by_original, write_header, write_padding,
    write_terminator, ArchiveEntry, ArchiveError, CaptureError, EntryKind, HeaderError,
    BLOCK_SIZE,
  },
  fsio::sys,
  listing::Reporter,
};

/// Walk state threaded through the recursive capture: the growing entry
/// list, the pre-strip-path index that drives hardlink deduplication, the
/// running write offset, and the skip tally.
struct CaptureState<'a, 'b> {
  entries: &'a mut Vec<ArchiveEntry>,
  dedup: HashMap<PathBuf, usize>,
  offset: u64,
  failed: usize,
  total: usize,
  reporter: &'a mut Reporter<'b>,
}

impl CaptureState<'_, '_> {
  fn skip(&mut self, err: &CaptureError) {
    self.reporter.warn(format_args!("Error: {err}"));
    self.failed += 1;
  }

  /// Records the entry, registering dedupable kinds under their pre-strip
  /// path so a later capture of the same argument becomes a hardlink.
  fn push(&mut self, path: &Path, entry: ArchiveEntry) {
    if entry.kind.dedups() {
      self
        .dedup
        .entry(path.to_path_buf())
        .or_insert(self.entries.len());
    }
    self.entries.push(entry);
  }
}

/// Appends the given paths to the archive, directories recursively, and
/// re-terminates it. The descriptor is positioned just past the last
/// existing entry first, so the old terminator is overwritten.
///
/// Entries that cannot be captured (stat failures, sockets, over-long
/// names) are skipped and reported; the result is then
/// [`ArchiveError::Partial`] over a still-valid archive. Returns the byte
/// offset where the entries end and the terminator begins.
pub fn append<A: Write + Seek>(
  archive: &mut A,
  entries: &mut Vec<ArchiveEntry>,
  paths: &[PathBuf],
  reporter: &mut Reporter<'_>,
) -> Result<u64, ArchiveError> {
  let offset = end_of_entries(entries);
  archive.seek(SeekFrom::Start(offset))?;

  // earlier append batches keep their pre-strip paths visible here
  let mut dedup = HashMap::new();
  for (index, entry) in entries.iter().enumerate() {
    if let Some(original) = &entry.original_name {
      dedup.entry(original.clone()).or_insert(index);
    }
  }

  let mut state = CaptureState {
    entries,
    dedup,
    offset,
    failed: 0,
    total: 0,
    reporter,
  };
  for path in paths {
    capture_path(archive, &mut state, path)?;
  }

  let end = state.offset;
  let failed = state.failed;
  let total = state.total;
  write_terminator(archive, end)?;

  if failed > 0 {
    return Err(ArchiveError::Partial { failed, total });
  }
  Ok(end)
}

fn capture_path<A: Write + Seek>(
  archive: &mut A,
  state: &mut CaptureState<'_, '_>,
  path: &Path,
) -> Result<(), ArchiveError> {
  state.total += 1;
  let mut entry = match build_entry(path) {
    Ok(entry) => entry,
    Err(err) => {
      state.skip(&err);
      return Ok(());
    },
  };
  entry.begin = state.offset;

  // hardlink dedup matches the unmodified input path, not the stored name
  if entry.kind.dedups() {
    if let Some(&prior) = state.dedup.get(path) {
      entry.kind = EntryKind::HardLink;
      entry.link_name = state.entries[prior].name.clone();
      entry.size = 0;
    }
  }

  // a field that will not fit its octal width (large uid/gid, far-future
  // mtime) fails this entry only, before anything lands in the archive
  let block = match entry.encode() {
    Ok(block) => block,
    Err(source) => {
      state.skip(&CaptureError::Header(source));
      return Ok(());
    },
  };

  match entry.kind {
    EntryKind::Directory => {
      state.reporter.name(&entry.name);
      write_header(archive, &block)?;
      state.offset += BLOCK_SIZE as u64;
      state.push(path, entry);

      // sorted children keep the entry sequence independent of readdir order
      let mut children = match read_children(path) {
        Ok(children) => children,
        Err(err) => {
          state.skip(&err);
          return Ok(());
        },
      };
      children.sort();
      for child in children {
        capture_path(archive, state, &child)?;
      }
    },
    EntryKind::RegularFile | EntryKind::ContiguousFile => {
      // open before the header goes out so an unreadable file skips cleanly
      let mut src = match File::open(path) {
        Ok(src) => src,
        Err(source) => {
          state.skip(&CaptureError::Open {
            path: path.to_path_buf(),
            source,
          });
          return Ok(());
        },
      };
      state.reporter.name(&entry.name);
      write_header(archive, &block)?;
      copy_payload(archive, &mut src, entry.size, path)?;
      write_padding(archive, entry.size)?;
      state.offset += entry.span();
      state.push(path, entry);
    },
    _ => {
      // links, devices and FIFOs are header-only
      state.reporter.name(&entry.name);
      write_header(archive, &block)?;
      state.offset += BLOCK_SIZE as u64;
      state.push(path, entry);
    },
  }
  Ok(())
}

fn read_children(path: &Path) -> Result<Vec<PathBuf>, CaptureError> {
  let read_dir = |source| CaptureError::ReadDir {
    path: path.to_path_buf(),
    source,
  };
  fs::read_dir(path)
    .map_err(read_dir)?
    .map(|dirent| dirent.map(|d| d.path()).map_err(read_dir))
    .collect()
}

/// Stats one filesystem node into an entry: stored name with one local
/// prefix stripped, low permission bits, owner/group names, and the
/// type-specific fields. `begin` is left for the writer to fill in.
fn build_entry(path: &Path) -> Result<ArchiveEntry, CaptureError> {
  let meta = fs::symlink_metadata(path).map_err(|source| CaptureError::Stat {
    path: path.to_path_buf(),
    source,
  })?;
  let path_str = path.to_str().ok_or_else(|| CaptureError::NonUtf8Path {
    path: path.to_path_buf(),
  })?;
  let mut name = strip_local_prefix(path_str).to_owned();

  let file_type = meta.file_type();
  let mut size = 0;
  let mut link_name = String::new();
  let mut dev = (0, 0);
  let kind = if file_type.is_file() {
    size = meta.len();
    EntryKind::RegularFile
  } else if file_type.is_symlink() {
    let target = fs::read_link(path).map_err(|source| CaptureError::ReadLink {
      path: path.to_path_buf(),
      source,
    })?;
    link_name = match target.to_str() {
      Some(target) => target.to_owned(),
      None => return Err(CaptureError::NonUtf8Path { path: target }),
    };
    EntryKind::SymbolicLink
  } else if file_type.is_dir() {
    EntryKind::Directory
  } else {
    match meta.mode() & libc::S_IFMT {
      libc::S_IFCHR => {
        dev = sys::split_dev(meta.rdev());
        EntryKind::CharacterDevice
      },
      libc::S_IFBLK => {
        dev = sys::split_dev(meta.rdev());
        EntryKind::BlockDevice
      },
      libc::S_IFIFO => EntryKind::Fifo,
      libc::S_IFSOCK => {
        return Err(CaptureError::Socket {
          path: path.to_path_buf(),
        });
      },
      _ => {
        return Err(CaptureError::UnknownType {
          path: path.to_path_buf(),
        });
      },
    }
  };

  // the name field holds 100 bytes with no terminator required, so the
  // slash fits whenever the stripped name is 99 bytes or shorter
  if kind == EntryKind::Directory && !name.is_empty() && !name.ends_with('/') && name.len() < 100 {
    name.push('/');
  }
  if name.len() > 100 {
    return Err(HeaderError::NameTooLong { name }.into());
  }
  if link_name.len() > 100 {
    return Err(HeaderError::LinkTargetTooLong { target: link_name }.into());
  }

  Ok(ArchiveEntry {
    name,
    mode: meta.mode() & 0o777,
    uid: meta.uid(),
    gid: meta.gid(),
    size,
    mtime: meta.mtime().max(0) as u64,
    checksum: 0,
    kind,
    link_name,
    uname: sys::login_name().unwrap_or_default(),
    gname: sys::group_name(meta.gid()).unwrap_or_else(|| "None".to_owned()),
    dev_major: dev.0,
    dev_minor: dev.1,
    prefix: String::new(),
    begin: 0,
    original_name: Some(path.to_path_buf()),
  })
}

/// Strips exactly one leading `/`, `./` or `../` from the stored name.
fn strip_local_prefix(path: &str) -> &str {
  for prefix in ["../", "./", "/"] {
    if let Some(rest) = path.strip_prefix(prefix) {
      return rest;
    }
  }
  path
}

/// Re-captures each path that is either absent from the archive or
/// strictly newer on disk than its stored entry, then appends those.
/// Arguments that cannot be stat'ed are reported and fail the overall
/// result without blocking the rest.
pub fn update<A: Write + Seek>(
  archive: &mut A,
  entries: &mut Vec<ArchiveEntry>,
  paths: &[PathBuf],
  reporter: &mut Reporter<'_>,
) -> Result<u64, ArchiveError> {
  if paths.is_empty() {
    return Ok(end_of_entries(entries));
  }

  let mut stat_failed = 0;
  let mut newer = Vec::new();
  for path in paths {
    let meta = match fs::symlink_metadata(path) {
      Ok(meta) => meta,
      Err(source) => {
        let err = CaptureError::Stat {
          path: path.clone(),
          source,
        };
        reporter.warn(format_args!("Error: {err}"));
        stat_failed += 1;
        continue;
      },
    };
    let stored = lookup_for_update(entries, path);
    if stored.map_or(true, |entry| meta.mtime().max(0) as u64 > entry.mtime) {
      newer.push(path.clone());
    }
  }

  let result = append(archive, entries, &newer, reporter);
  if stat_failed == 0 {
    return result;
  }
  match result {
    Ok(_) => Err(ArchiveError::Partial {
      failed: stat_failed,
      total: paths.len(),
    }),
    Err(ArchiveError::Partial { failed, .. }) => Err(ArchiveError::Partial {
      failed: failed + stat_failed,
      total: paths.len(),
    }),
    Err(err) => Err(err),
  }
}

/// Update matching prefers the pre-strip capture path; entries scanned
/// back from disk carry none, so their stored name stands in for it.
fn lookup_for_update<'a>(entries: &'a [ArchiveEntry], path: &Path) -> Option<&'a ArchiveEntry> {
  if let Some(found) = find_by_original(entries, path) {
    return Some(found);
  }
  let name = path.to_str()?;
  find_by_name(entries, name)
}
