use std::{
  fs,
  io::{Cursor, Seek, SeekFrom},
  os::unix::fs::{symlink, FileTypeExt as _},
  path::{Path, PathBuf},
  sync::{Mutex, MutexGuard, PoisonError},
};

use tempfile::TempDir;

use crate::{
  archive::{remove, scan, ArchiveError, EntryKind, RECORD_SIZE},
  fsio::{append, diff, extract, sys, update},
  listing::{BufferSink, Reporter, Verbosity},
};

// The capture and restore paths resolve names against the working
// directory, so these tests serialize and chdir into scratch trees.
static CWD_LOCK: Mutex<()> = Mutex::new(());

fn enter_scratch_dir() -> (MutexGuard<'static, ()>, TempDir) {
  let guard = CWD_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
  let dir = tempfile::tempdir().unwrap();
  std::env::set_current_dir(dir.path()).unwrap();
  (guard, dir)
}

fn paths(names: &[&str]) -> Vec<PathBuf> {
  names.iter().map(PathBuf::from).collect()
}

fn names(entries: &[crate::archive::ArchiveEntry]) -> Vec<String> {
  entries.iter().map(|entry| entry.name.clone()).collect()
}

#[test]
fn create_from_a_tree_lists_in_walk_order() {
  let (_cwd, _dir) = enter_scratch_dir();
  fs::write("a.txt", "hello\n").unwrap();
  fs::create_dir("sub").unwrap();
  fs::write("sub/b.txt", "world\n").unwrap();

  let mut sink = BufferSink::default();
  let mut reporter = Reporter::new(&mut sink, Verbosity::Names);
  let mut archive = Cursor::new(Vec::new());
  let mut entries = Vec::new();
  let end = append(
    &mut archive,
    &mut entries,
    &paths(&["a.txt", "sub"]),
    &mut reporter,
  )
  .unwrap();

  assert_eq!(end, 2560);
  assert_eq!(names(&entries), ["a.txt", "sub/", "sub/b.txt"]);
  assert_eq!(
    entries.iter().map(|entry| entry.begin).collect::<Vec<_>>(),
    [0, 1024, 1536],
  );
  assert_eq!(archive.get_ref().len(), RECORD_SIZE);
  assert_eq!(sink.lines, ["a.txt", "sub/", "sub/b.txt"]);

  // what was just written scans back identically
  archive.seek(SeekFrom::Start(0)).unwrap();
  let rescanned = scan(&mut archive).unwrap();
  assert_eq!(names(&rescanned), ["a.txt", "sub/", "sub/b.txt"]);
  assert_eq!(rescanned[0].size, 6);
  assert_eq!(rescanned[1].kind, EntryKind::Directory);
  assert_eq!(rescanned[0].checksum, entries[0].checksum);
  assert!(rescanned.iter().all(|entry| entry.original_name.is_none()));
}

#[test]
fn extract_round_trips_a_tree() {
  let (_cwd, _dir) = enter_scratch_dir();
  fs::write("a.txt", "hello\n").unwrap();
  fs::create_dir("sub").unwrap();
  fs::write("sub/b.txt", "world\n").unwrap();

  let mut sink = BufferSink::default();
  let mut reporter = Reporter::new(&mut sink, Verbosity::Silent);
  let mut archive = Cursor::new(Vec::new());
  let mut entries = Vec::new();
  append(
    &mut archive,
    &mut entries,
    &paths(&["a.txt", "sub"]),
    &mut reporter,
  )
  .unwrap();

  let out = tempfile::tempdir().unwrap();
  std::env::set_current_dir(out.path()).unwrap();
  extract(&mut archive, &entries, &[], &mut reporter).unwrap();

  assert_eq!(fs::read_to_string("a.txt").unwrap(), "hello\n");
  assert_eq!(fs::read_to_string("sub/b.txt").unwrap(), "world\n");
  assert!(fs::metadata("sub").unwrap().is_dir());
}

#[test]
fn repeated_argument_becomes_a_hardlink() {
  let (_cwd, _dir) = enter_scratch_dir();
  fs::write("x", "0123456789").unwrap();

  let mut sink = BufferSink::default();
  let mut reporter = Reporter::new(&mut sink, Verbosity::Silent);
  let mut archive = Cursor::new(Vec::new());
  let mut entries = Vec::new();
  append(&mut archive, &mut entries, &paths(&["x", "x"]), &mut reporter).unwrap();

  assert_eq!(entries.len(), 2);
  assert_eq!(entries[1].kind, EntryKind::HardLink);
  assert_eq!(entries[1].size, 0);
  assert_eq!(entries[1].link_name, "x");
  // header + one payload block + hardlink header, no second payload
  assert_eq!(entries[1].begin, 1024);

  archive.seek(SeekFrom::Start(0)).unwrap();
  let rescanned = scan(&mut archive).unwrap();
  assert_eq!(rescanned[1].kind, EntryKind::HardLink);
  assert_eq!(rescanned[1].link_name, "x");
}

#[test]
fn dedup_does_not_cross_differently_spelled_paths() {
  let (_cwd, _dir) = enter_scratch_dir();
  fs::write("a", "payload").unwrap();

  let mut sink = BufferSink::default();
  let mut reporter = Reporter::new(&mut sink, Verbosity::Silent);
  let mut archive = Cursor::new(Vec::new());
  let mut entries = Vec::new();
  append(
    &mut archive,
    &mut entries,
    &paths(&["./a", "a"]),
    &mut reporter,
  )
  .unwrap();

  // both stored names are "a", but the pre-strip paths differ
  assert_eq!(names(&entries), ["a", "a"]);
  assert_eq!(entries[1].kind, EntryKind::RegularFile);
}

#[test]
fn dedup_carries_across_append_batches() {
  let (_cwd, _dir) = enter_scratch_dir();
  fs::write("x", "0123456789").unwrap();

  let mut sink = BufferSink::default();
  let mut reporter = Reporter::new(&mut sink, Verbosity::Silent);
  let mut archive = Cursor::new(Vec::new());
  let mut entries = Vec::new();
  append(&mut archive, &mut entries, &paths(&["x"]), &mut reporter).unwrap();
  append(&mut archive, &mut entries, &paths(&["x"]), &mut reporter).unwrap();

  assert_eq!(entries[1].kind, EntryKind::HardLink);
  archive.seek(SeekFrom::Start(0)).unwrap();
  assert_eq!(scan(&mut archive).unwrap().len(), 2);
}

#[test]
fn symlink_round_trips() {
  let (_cwd, _dir) = enter_scratch_dir();
  symlink("target.txt", "s").unwrap();

  let mut sink = BufferSink::default();
  let mut reporter = Reporter::new(&mut sink, Verbosity::Silent);
  let mut archive = Cursor::new(Vec::new());
  let mut entries = Vec::new();
  append(&mut archive, &mut entries, &paths(&["s"]), &mut reporter).unwrap();

  assert_eq!(entries[0].kind, EntryKind::SymbolicLink);
  assert_eq!(entries[0].size, 0);
  assert_eq!(entries[0].link_name, "target.txt");

  let out = tempfile::tempdir().unwrap();
  std::env::set_current_dir(out.path()).unwrap();
  extract(&mut archive, &entries, &[], &mut reporter).unwrap();
  assert_eq!(fs::read_link("s").unwrap(), Path::new("target.txt"));
}

#[test]
fn fifo_round_trips() {
  let (_cwd, _dir) = enter_scratch_dir();
  sys::mkfifo(Path::new("p"), 0o644).unwrap();

  let mut sink = BufferSink::default();
  let mut reporter = Reporter::new(&mut sink, Verbosity::Silent);
  let mut archive = Cursor::new(Vec::new());
  let mut entries = Vec::new();
  append(&mut archive, &mut entries, &paths(&["p"]), &mut reporter).unwrap();
  assert_eq!(entries[0].kind, EntryKind::Fifo);

  let out = tempfile::tempdir().unwrap();
  std::env::set_current_dir(out.path()).unwrap();
  extract(&mut archive, &entries, &[], &mut reporter).unwrap();
  assert!(fs::symlink_metadata("p").unwrap().file_type().is_fifo());

  // a second pass finds the fifo already there and does not mind
  extract(&mut archive, &entries, &[], &mut reporter).unwrap();
}

#[test]
fn extract_honors_a_name_filter() {
  let (_cwd, _dir) = enter_scratch_dir();
  fs::write("a", "one").unwrap();
  fs::write("b", "two").unwrap();

  let mut sink = BufferSink::default();
  let mut reporter = Reporter::new(&mut sink, Verbosity::Silent);
  let mut archive = Cursor::new(Vec::new());
  let mut entries = Vec::new();
  append(&mut archive, &mut entries, &paths(&["a", "b"]), &mut reporter).unwrap();

  let out = tempfile::tempdir().unwrap();
  std::env::set_current_dir(out.path()).unwrap();
  extract(&mut archive, &entries, &["b".into()], &mut reporter).unwrap();
  assert!(!Path::new("a").exists());
  assert_eq!(fs::read_to_string("b").unwrap(), "two");
}

#[test]
fn append_of_a_missing_path_skips_but_terminates() {
  let (_cwd, _dir) = enter_scratch_dir();
  let mut sink = BufferSink::default();
  let mut reporter = Reporter::new(&mut sink, Verbosity::Names);
  let mut archive = Cursor::new(Vec::new());
  let mut entries = Vec::new();
  let result = append(&mut archive, &mut entries, &paths(&["ghost"]), &mut reporter);

  assert!(matches!(
    result,
    Err(ArchiveError::Partial { failed: 1, total: 1 }),
  ));
  assert!(sink.warnings[0].contains("ghost"));
  assert!(entries.is_empty());
  // the archive is still a valid empty one
  assert_eq!(archive.get_ref().len(), RECORD_SIZE);
  archive.seek(SeekFrom::Start(0)).unwrap();
  assert!(scan(&mut archive).unwrap().is_empty());
}

fn set_mtime_seconds(path: &Path, seconds: i64) {
  use std::os::unix::ffi::OsStrExt as _;
  let path = std::ffi::CString::new(path.as_os_str().as_bytes()).unwrap();
  let times = [libc::timeval {
    tv_sec: seconds,
    tv_usec: 0,
  }; 2];
  // SAFETY: the path is a valid NUL-terminated C string and times has two
  // elements, as utimes requires.
  let rc = unsafe { libc::utimes(path.as_ptr(), times.as_ptr()) };
  assert_eq!(rc, 0);
}

#[test]
fn append_skips_entries_whose_fields_overflow_their_octal_width() {
  let (_cwd, _dir) = enter_scratch_dir();
  fs::write("ok", "fine").unwrap();
  fs::write("late", "fine too").unwrap();
  // past 8^11 - 1 seconds, which no 11-digit mtime field can carry
  set_mtime_seconds(Path::new("late"), 9_000_000_000);

  let mut sink = BufferSink::default();
  let mut reporter = Reporter::new(&mut sink, Verbosity::Names);
  let mut archive = Cursor::new(Vec::new());
  let mut entries = Vec::new();
  let result = append(
    &mut archive,
    &mut entries,
    &paths(&["ok", "late"]),
    &mut reporter,
  );

  assert!(matches!(
    result,
    Err(ArchiveError::Partial { failed: 1, total: 2 }),
  ));
  assert!(sink.warnings[0].contains("mtime"));
  assert_eq!(names(&entries), ["ok"]);

  // the overflowing entry was skipped before touching the archive, which
  // is still terminated and scannable
  assert_eq!(archive.get_ref().len(), RECORD_SIZE);
  archive.seek(SeekFrom::Start(0)).unwrap();
  assert_eq!(names(&scan(&mut archive).unwrap()), ["ok"]);
}

#[test]
fn directory_name_of_99_bytes_still_gets_its_slash() {
  let (_cwd, _dir) = enter_scratch_dir();
  let long_name = "d".repeat(99);
  fs::create_dir(&long_name).unwrap();

  let mut sink = BufferSink::default();
  let mut reporter = Reporter::new(&mut sink, Verbosity::Silent);
  let mut archive = Cursor::new(Vec::new());
  let mut entries = Vec::new();
  append(
    &mut archive,
    &mut entries,
    &paths(&[&long_name]),
    &mut reporter,
  )
  .unwrap();

  // the slash fills the name field to exactly 100 bytes
  assert_eq!(entries[0].name.len(), 100);
  assert!(entries[0].name.ends_with('/'));

  archive.seek(SeekFrom::Start(0)).unwrap();
  let rescanned = scan(&mut archive).unwrap();
  assert_eq!(rescanned[0].name, entries[0].name);
  assert_eq!(rescanned[0].kind, EntryKind::Directory);
}

#[test]
fn two_appends_match_one_append_of_both() {
  let (_cwd, _dir) = enter_scratch_dir();
  fs::write("x", "aa").unwrap();
  fs::write("y", "bb").unwrap();

  let mut sink = BufferSink::default();
  let mut reporter = Reporter::new(&mut sink, Verbosity::Silent);

  let mut joint = Cursor::new(Vec::new());
  let mut joint_entries = Vec::new();
  append(
    &mut joint,
    &mut joint_entries,
    &paths(&["x", "y"]),
    &mut reporter,
  )
  .unwrap();

  let mut split = Cursor::new(Vec::new());
  let mut split_entries = Vec::new();
  append(&mut split, &mut split_entries, &paths(&["x"]), &mut reporter).unwrap();
  append(&mut split, &mut split_entries, &paths(&["y"]), &mut reporter).unwrap();

  joint.seek(SeekFrom::Start(0)).unwrap();
  split.seek(SeekFrom::Start(0)).unwrap();
  assert_eq!(scan(&mut joint).unwrap(), scan(&mut split).unwrap());
}

#[test]
fn update_skips_entries_that_are_not_newer() {
  let (_cwd, _dir) = enter_scratch_dir();
  fs::write("f", "data").unwrap();

  let mut sink = BufferSink::default();
  let mut reporter = Reporter::new(&mut sink, Verbosity::Silent);
  let mut archive = Cursor::new(Vec::new());
  let mut entries = Vec::new();
  append(&mut archive, &mut entries, &paths(&["f"]), &mut reporter).unwrap();

  // a scanned list has no original names; update matches the stored name
  archive.seek(SeekFrom::Start(0)).unwrap();
  let mut entries = scan(&mut archive).unwrap();
  entries[0].mtime += 1_000_000;

  let before = archive.get_ref().clone();
  update(&mut archive, &mut entries, &paths(&["f"]), &mut reporter).unwrap();
  assert_eq!(entries.len(), 1);
  assert_eq!(archive.get_ref(), &before);
}

#[test]
fn update_appends_a_fresh_entry_for_newer_files() {
  let (_cwd, _dir) = enter_scratch_dir();
  fs::write("f", "data").unwrap();

  let mut sink = BufferSink::default();
  let mut reporter = Reporter::new(&mut sink, Verbosity::Silent);
  let mut archive = Cursor::new(Vec::new());
  let mut entries = Vec::new();
  append(&mut archive, &mut entries, &paths(&["f"]), &mut reporter).unwrap();

  archive.seek(SeekFrom::Start(0)).unwrap();
  let mut entries = scan(&mut archive).unwrap();
  entries[0].mtime = 0;

  update(&mut archive, &mut entries, &paths(&["f"]), &mut reporter).unwrap();
  // appended after the original, no in-place replacement
  assert_eq!(names(&entries), ["f", "f"]);
  assert_eq!(entries[1].begin, 1024);

  archive.seek(SeekFrom::Start(0)).unwrap();
  assert_eq!(scan(&mut archive).unwrap().len(), 2);
}

#[test]
fn update_reports_unstatable_arguments() {
  let (_cwd, _dir) = enter_scratch_dir();
  fs::write("f", "data").unwrap();

  let mut sink = BufferSink::default();
  let mut reporter = Reporter::new(&mut sink, Verbosity::Names);
  let mut archive = Cursor::new(Vec::new());
  let mut entries = Vec::new();
  append(&mut archive, &mut entries, &paths(&["f"]), &mut reporter).unwrap();

  entries[0].mtime += 1_000_000;
  let result = update(
    &mut archive,
    &mut entries,
    &paths(&["ghost", "f"]),
    &mut reporter,
  );
  assert!(matches!(result, Err(ArchiveError::Partial { failed: 1, .. })));
  // the statable argument was still considered (and found not newer)
  assert_eq!(entries.len(), 1);
}

#[test]
fn diff_reports_missing_and_diverged_nodes() {
  let (_cwd, _dir) = enter_scratch_dir();
  fs::write("f", "data").unwrap();

  let mut sink = BufferSink::default();
  let mut reporter = Reporter::new(&mut sink, Verbosity::Silent);
  let mut archive = Cursor::new(Vec::new());
  let mut entries = Vec::new();
  append(&mut archive, &mut entries, &paths(&["f"]), &mut reporter).unwrap();

  let mut sink = BufferSink::default();
  let mut reporter = Reporter::new(&mut sink, Verbosity::Silent);

  // in sync: nothing to report
  diff(&entries, &mut reporter);

  // stored size diverges from the file on disk
  entries[0].size += 1;
  diff(&entries, &mut reporter);

  // stored mtime diverges
  entries[0].size -= 1;
  entries[0].mtime += 7;
  diff(&entries, &mut reporter);

  // a node that is gone entirely
  fs::remove_file("f").unwrap();
  diff(&entries, &mut reporter);

  assert_eq!(sink.lines.len(), 3);
  assert_eq!(sink.lines[0], "f: Size differs");
  assert_eq!(sink.lines[1], "f: Mod time differs");
  assert!(sink.lines[2].starts_with("Error: Could not stat f:"));
}

#[test]
fn remove_works_against_a_real_file_descriptor() {
  let (_cwd, _dir) = enter_scratch_dir();
  fs::write("a", "first").unwrap();
  fs::write("b", "second").unwrap();
  fs::write("c", "third").unwrap();

  let mut sink = BufferSink::default();
  let mut reporter = Reporter::new(&mut sink, Verbosity::Silent);
  let mut archive = fs::OpenOptions::new()
    .read(true)
    .write(true)
    .create(true)
    .truncate(true)
    .open("test.tar")
    .unwrap();
  let mut entries = Vec::new();
  append(
    &mut archive,
    &mut entries,
    &paths(&["a", "b", "c"]),
    &mut reporter,
  )
  .unwrap();

  remove(&mut archive, &mut entries, &["b".into()], &mut reporter).unwrap();
  assert_eq!(fs::metadata("test.tar").unwrap().len() % RECORD_SIZE as u64, 0);

  archive.seek(SeekFrom::Start(0)).unwrap();
  let rescanned = scan(&mut archive).unwrap();
  assert_eq!(names(&rescanned), ["a", "c"]);

  let out = tempfile::tempdir().unwrap();
  std::env::set_current_dir(out.path()).unwrap();
  extract(&mut archive, &rescanned, &[], &mut reporter).unwrap();
  assert_eq!(fs::read_to_string("a").unwrap(), "first");
  assert_eq!(fs::read_to_string("c").unwrap(), "third");
}

#[test]
fn capture_preserves_file_modes() {
  let (_cwd, _dir) = enter_scratch_dir();
  fs::write("tool", "#!/bin/sh\n").unwrap();
  let mut perms = fs::metadata("tool").unwrap().permissions();
  use std::os::unix::fs::PermissionsExt as _;
  perms.set_mode(0o755);
  fs::set_permissions("tool", perms).unwrap();

  let mut sink = BufferSink::default();
  let mut reporter = Reporter::new(&mut sink, Verbosity::Silent);
  let mut archive = Cursor::new(Vec::new());
  let mut entries = Vec::new();
  append(&mut archive, &mut entries, &paths(&["tool"]), &mut reporter).unwrap();
  assert_eq!(entries[0].mode, 0o755);

  let out = tempfile::tempdir().unwrap();
  std::env::set_current_dir(out.path()).unwrap();
  extract(&mut archive, &entries, &[], &mut reporter).unwrap();
  let mode = fs::metadata("tool").unwrap().permissions().mode() & 0o777;
  assert_eq!(mode, 0o755);
}

#[test]
fn group_name_falls_back_to_none_for_unknown_gids() {
  // gid 4294967294 is vanishingly unlikely to have a group entry
  assert_eq!(sys::group_name(u32::MAX - 1), None);
}
