use std::{fs, os::unix::fs::MetadataExt as _};

use crate::{
  archive::{ArchiveEntry, EntryKind},
  listing::Reporter,
};

/// Compares each entry's stored metadata against the node of the same name
/// in the working directory. Missing nodes and mtime/size divergence are
/// reported through the sink; no payload bytes are compared.
pub fn diff(entries: &[ArchiveEntry], reporter: &mut Reporter<'_>) {
  for entry in entries {
    reporter.name(&entry.name);
    match fs::symlink_metadata(&entry.name) {
      Err(err) => {
        let verb = if entry.kind == EntryKind::SymbolicLink {
          "readlink"
        } else {
          "stat"
        };
        reporter.line(format_args!(
          "Error: Could not {verb} {}: {err}",
          entry.name
        ));
      },
      Ok(meta) => {
        if meta.mtime().max(0) as u64 != entry.mtime {
          reporter.line(format_args!("{}: Mod time differs", entry.name));
        }
        if meta.len() != entry.size {
          reporter.line(format_args!("{}: Size differs", entry.name));
        }
      },
    }
  }
}
