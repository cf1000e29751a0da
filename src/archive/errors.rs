use std::{io, path::PathBuf};

use thiserror::Error;

use crate::archive::header_block::HeaderError;

/// Scan failures discard the partial entry list; an archive that cannot be
/// walked to its terminator is not worth mutating.
#[derive(Error, Debug)]
pub enum ScanError {
  #[error("archive read failed at offset {offset}: {source}")]
  Io {
    offset: u64,
    #[source]
    source: io::Error,
  },
  #[error("archive ends at offset {offset} before its terminator")]
  UnexpectedEof { offset: u64 },
  #[error("bad header at offset {offset}: {source}")]
  BadHeader {
    offset: u64,
    #[source]
    source: HeaderError,
  },
}

/// Failure to turn one filesystem node into an entry. These skip the entry
/// and fail the operation overall without aborting it.
#[derive(Error, Debug)]
pub enum CaptureError {
  #[error("cannot stat {path:?}: {source}")]
  Stat {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("cannot read link {path:?}: {source}")]
  ReadLink {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("cannot read directory {path:?}: {source}")]
  ReadDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("cannot open {path:?}: {source}")]
  Open {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("{path:?} is not representable as UTF-8")]
  NonUtf8Path { path: PathBuf },
  #[error("cannot archive socket {path:?}")]
  Socket { path: PathBuf },
  #[error("unknown file type for {path:?}")]
  UnknownType { path: PathBuf },
  #[error(transparent)]
  Header(#[from] HeaderError),
}

/// Failure to mirror one entry back onto the filesystem.
#[derive(Error, Debug)]
pub enum RestoreError {
  #[error("entry has an empty name")]
  EmptyName,
  #[error("cannot create directory {path:?}: {source}")]
  Dir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("cannot create {path:?}: {source}")]
  Create {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("cannot write {path:?}: {source}")]
  WriteFile {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
  #[error("archive payload for {name:?} is unreadable: {source}")]
  Payload {
    name: String,
    #[source]
    source: io::Error,
  },
  #[error("archive payload for {name:?} ends early")]
  ShortPayload { name: String },
  #[error("unsupported entry type {flag:?} for {name:?}")]
  UnsupportedType { flag: u8, name: String },
}

/// Top-level result of the mutating and filesystem-facing operations.
#[derive(Error, Debug)]
pub enum ArchiveError {
  #[error(transparent)]
  Io(#[from] io::Error),
  #[error("header for {name:?} cannot be encoded: {source}")]
  Encode {
    name: String,
    #[source]
    source: HeaderError,
  },
  #[error("short read from {path:?}: header promised {expected} payload bytes, got {got}")]
  ShortSource {
    path: PathBuf,
    expected: u64,
    got: u64,
  },
  /// Some entries were skipped; the archive itself is still valid.
  #[error("{failed} of {total} entries failed")]
  Partial { failed: usize, total: usize },
  /// Remove targets that were not present. The survivors were still
  /// compacted and re-terminated.
  #[error("{missing} requested name(s) not present in the archive")]
  MissingNames { missing: usize },
}
