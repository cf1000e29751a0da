use core::fmt;

use chrono::{DateTime, Local};

use crate::archive::{ArchiveEntry, EntryKind};

/// How much an operation narrates: nothing, entry names, or names plus
/// metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Verbosity {
  #[default]
  Silent,
  Names,
  Detailed,
}

impl Verbosity {
  #[must_use]
  pub fn prints_names(self) -> bool {
    self >= Verbosity::Names
  }

  #[must_use]
  pub fn prints_details(self) -> bool {
    self >= Verbosity::Detailed
  }

  /// One step louder; the list operation runs at this so a bare list still
  /// prints names.
  #[must_use]
  pub fn louder(self) -> Self {
    match self {
      Verbosity::Silent => Verbosity::Names,
      _ => Verbosity::Detailed,
    }
  }
}

/// Where operation output and warnings go. The core never talks to stdio
/// directly; the front end injects a sink.
pub trait ReportSink {
  /// Operation output: listings, extracted names, diff reports.
  fn line(&mut self, line: fmt::Arguments<'_>);
  /// Side-channel complaints that do not stop the operation.
  fn warn(&mut self, line: fmt::Arguments<'_>);
}

/// Standard output/error sink used by the command-line front end.
#[derive(Debug, Default)]
pub struct StdioSink;

impl ReportSink for StdioSink {
  fn line(&mut self, line: fmt::Arguments<'_>) {
    println!("{line}");
  }

  fn warn(&mut self, line: fmt::Arguments<'_>) {
    eprintln!("{line}");
  }
}

/// Collects everything; the test suites assert against it.
#[derive(Debug, Default)]
pub struct BufferSink {
  pub lines: Vec<String>,
  pub warnings: Vec<String>,
}

impl ReportSink for BufferSink {
  fn line(&mut self, line: fmt::Arguments<'_>) {
    self.lines.push(line.to_string());
  }

  fn warn(&mut self, line: fmt::Arguments<'_>) {
    self.warnings.push(line.to_string());
  }
}

/// A sink plus the verbosity gate the operations consult.
pub struct Reporter<'a> {
  sink: &'a mut dyn ReportSink,
  verbosity: Verbosity,
}

impl<'a> Reporter<'a> {
  pub fn new(sink: &'a mut dyn ReportSink, verbosity: Verbosity) -> Self {
    Reporter { sink, verbosity }
  }

  #[must_use]
  pub fn verbosity(&self) -> Verbosity {
    self.verbosity
  }

  /// Ungated output; diff divergences and the metadata dump always print.
  pub fn line(&mut self, line: fmt::Arguments<'_>) {
    self.sink.line(line);
  }

  /// Prints an entry name when names are wanted.
  pub fn name(&mut self, name: &str) {
    if self.verbosity.prints_names() {
      self.sink.line(format_args!("{name}"));
    }
  }

  /// Warnings honor the same gate as names.
  pub fn warn(&mut self, line: fmt::Arguments<'_>) {
    if self.verbosity.prints_names() {
      self.sink.warn(line);
    }
  }
}

/// Prints entries, all of them or those matching a filter name exactly.
/// Below [`Verbosity::Names`] nothing prints; at [`Verbosity::Detailed`]
/// each entry gets a long-form line.
pub fn list_entries(entries: &[ArchiveEntry], names: &[String], reporter: &mut Reporter<'_>) {
  if !reporter.verbosity().prints_names() {
    return;
  }
  let mut max_width = 0;
  for entry in entries {
    if !names.is_empty() && !names.iter().any(|name| *name == entry.name) {
      continue;
    }
    if reporter.verbosity().prints_details() {
      let line = long_line(entry, &mut max_width);
      reporter.line(format_args!("{line}"));
    } else {
      reporter.line(format_args!("{}", entry.name));
    }
  }
}

/// `drwxr-xr-x owner/group  <size> YYYY-MM-DD HH:MM name[ -> target]`.
/// The size column is padded to the widest value seen so far.
fn long_line(entry: &ArchiveEntry, max_width: &mut usize) -> String {
  let size_column = match entry.kind {
    EntryKind::CharacterDevice | EntryKind::BlockDevice => {
      format!("{},{}", entry.dev_major, entry.dev_minor)
    },
    _ => format!("  {}", entry.size),
  };
  *max_width = (*max_width).max(size_column.len());
  let pad = " ".repeat(*max_width - size_column.len());

  let mut line = format!(
    "{} {}/{} {}{} {} {}",
    mode_string(entry),
    entry.uname,
    entry.gname,
    pad,
    size_column,
    local_stamp(entry.mtime),
    entry.name,
  );
  match entry.kind {
    EntryKind::SymbolicLink => {
      line.push_str(" -> ");
      line.push_str(&entry.link_name);
    },
    EntryKind::HardLink => {
      line.push_str(" link to ");
      line.push_str(&entry.link_name);
    },
    _ => {},
  }
  line
}

fn type_char(kind: EntryKind) -> char {
  match kind {
    EntryKind::RegularFile | EntryKind::ContiguousFile | EntryKind::Unknown(_) => '-',
    EntryKind::HardLink => 'h',
    EntryKind::SymbolicLink => 'l',
    EntryKind::CharacterDevice => 'c',
    EntryKind::BlockDevice => 'b',
    EntryKind::Directory => 'd',
    EntryKind::Fifo => 'p',
  }
}

fn mode_string(entry: &ArchiveEntry) -> String {
  let mut out = String::with_capacity(10);
  out.push(type_char(entry.kind));
  for shift in [6u32, 3, 0] {
    let bits = entry.mode >> shift;
    out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
    out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
    out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
  }
  out
}

fn local_stamp(mtime: u64) -> String {
  let when = DateTime::from_timestamp(mtime as i64, 0).unwrap_or_default();
  when
    .with_timezone(&Local)
    .format("%Y-%m-%d %H:%M")
    .to_string()
}

fn utc_stamp(mtime: u64) -> String {
  let when = DateTime::from_timestamp(mtime as i64, 0).unwrap_or_default();
  when.format("%a %b %e %H:%M:%S %Y").to_string()
}

/// Dumps every stored header field of every entry, one field per line.
pub fn dump_metadata(entries: &[ArchiveEntry], reporter: &mut Reporter<'_>) {
  for entry in entries {
    dump_entry(entry, reporter);
  }
}

fn dump_entry(entry: &ArchiveEntry, reporter: &mut Reporter<'_>) {
  reporter.line(format_args!("File Name: {}", entry.name));
  reporter.line(format_args!("File Mode: {:03o}", entry.mode));
  reporter.line(format_args!("Owner UID: {}", entry.uid));
  reporter.line(format_args!("Owner GID: {}", entry.gid));
  reporter.line(format_args!("File Size: {}", entry.size));
  reporter.line(format_args!("Time     : {}", utc_stamp(entry.mtime)));
  reporter.line(format_args!("Checksum : {:06o}", entry.checksum));
  reporter.line(format_args!(
    "File Type: {} ({})",
    entry.kind.description(),
    char::from(u8::from(entry.kind)),
  ));
  reporter.line(format_args!("Link Name: {}", entry.link_name));
  reporter.line(format_args!("Username : {}", entry.uname));
  reporter.line(format_args!("Group    : {}", entry.gname));
  reporter.line(format_args!("Major    : {}", entry.dev_major));
  reporter.line(format_args!("Minor    : {}", entry.dev_minor));
  reporter.line(format_args!("Prefix   : {}", entry.prefix));
  reporter.line(format_args!(""));
}
