use std::io::{Cursor, Seek, SeekFrom, Write};

use zerocopy::IntoBytes as _;

use crate::{
  archive::{
    decode_octal, emit_header, encode_octal, is_zero_block, pad_to_block, remove, scan,
    write_padding, write_terminator, ArchiveEntry, ArchiveError, EntryKind, HeaderBlock,
    HeaderError, OctalError, ScanError, BLOCK_SIZE, RECORD_SIZE, ZERO_BLOCK,
  },
  listing::{BufferSink, Reporter, Verbosity},
};

fn regular(name: &str, mtime: u64) -> ArchiveEntry {
  ArchiveEntry {
    name: name.into(),
    mode: 0o644,
    uid: 1000,
    gid: 1000,
    size: 0,
    mtime,
    checksum: 0,
    kind: EntryKind::RegularFile,
    link_name: String::new(),
    uname: "user".into(),
    gname: "None".into(),
    dev_major: 0,
    dev_minor: 0,
    prefix: String::new(),
    begin: 0,
    original_name: None,
  }
}

/// Emits (header, payload) pairs plus the terminator, the way append lays
/// an archive out, and returns the backing buffer with the entry list.
fn emit_archive(specs: &[(&str, &[u8])]) -> (Cursor<Vec<u8>>, Vec<ArchiveEntry>) {
  let mut archive = Cursor::new(Vec::new());
  let mut offset = 0;
  let mut entries = Vec::new();
  for (name, payload) in specs {
    let mut entry = regular(name, 1_500_000_000);
    entry.begin = offset;
    entry.size = payload.len() as u64;
    emit_header(&mut archive, &mut entry).unwrap();
    archive.write_all(payload).unwrap();
    write_padding(&mut archive, entry.size).unwrap();
    offset += entry.span();
    entries.push(entry);
  }
  write_terminator(&mut archive, offset).unwrap();
  (archive, entries)
}

#[test]
fn octal_round_trips_below_field_capacity() {
  let mut field = [0u8; 12];
  for value in [0, 1, 0o644, 0o777_7777, 8_589_934_591] {
    encode_octal(&mut field, 11, value).unwrap();
    assert_eq!(decode_octal(&field), value, "value {value}");
  }
}

#[test]
fn octal_rejects_values_past_field_capacity() {
  let mut field = [0u8; 8];
  assert_eq!(
    encode_octal(&mut field, 7, 0o10_000_000),
    Err(OctalError::ValueTooLarge {
      value: 0o10_000_000,
      digits: 7,
    }),
  );
}

#[test]
fn octal_decode_tolerates_wild_field_shapes() {
  // zero-padded with NUL terminator
  assert_eq!(decode_octal(b"0000644\0"), 0o644);
  // space-led, space-terminated
  assert_eq!(decode_octal(b"   644\0 "), 0o644);
  // a non-octal byte terminates the field with the value so far
  assert_eq!(decode_octal(b"12q4567\0"), 0o12);
  assert_eq!(decode_octal(b"\0\0\0\0\0\0\0\0"), 0);
}

#[test]
fn emitted_checksum_verifies_and_closes() {
  let mut entry = regular("a.txt", 1_600_000_000);
  entry.size = 42;
  let block = entry.encode().unwrap();
  assert_eq!(block.verify_checksum().unwrap(), entry.checksum);
  // the stored field is six octal digits, NUL, space
  assert_eq!(block.checksum[6], 0);
  assert_eq!(block.checksum[7], b' ');
  assert_eq!(block.compute_checksum(), entry.checksum);
}

#[test]
fn seven_digit_checksums_are_accepted() {
  let mut entry = regular("a", 1_600_000_000);
  let mut block = entry.encode().unwrap();
  let check = block.compute_checksum();
  block.checksum = [0; 8];
  encode_octal(&mut block.checksum, 7, u64::from(check)).unwrap();
  assert!(block.verify_checksum().is_ok());
}

#[test]
fn whole_block_checksums_are_accepted() {
  let mut entry = regular("a", 1_600_000_000);
  let mut block = entry.encode().unwrap();
  // a foreign producer that summed all 512 bytes, reserved area non-zero
  block.reserved = [b'1'; 12];
  block.checksum = [b' '; 8];
  let sum: u32 = block.as_bytes().iter().map(|&b| u32::from(b)).sum();
  encode_octal(&mut block.checksum, 6, u64::from(sum)).unwrap();
  block.checksum[6] = 0;
  block.checksum[7] = b' ';
  assert!(block.verify_checksum().is_ok());
}

#[test]
fn corrupt_checksum_is_rejected() {
  let mut entry = regular("a", 1_600_000_000);
  let mut block = entry.encode().unwrap();
  block.checksum[0] = b'7';
  block.checksum[1] = b'7';
  let begun = ArchiveEntry::from_block(&block, 0);
  assert!(matches!(
    begun,
    Err(HeaderError::ChecksumMismatch { .. })
  ));
}

#[test]
fn zero_block_detection() {
  assert!(is_zero_block(&ZERO_BLOCK));
  let mut block = ZERO_BLOCK;
  block[511] = 1;
  assert!(!is_zero_block(&block));
}

#[test]
fn pad_to_block_boundaries() {
  assert_eq!(pad_to_block(0), 0);
  assert_eq!(pad_to_block(1), 512);
  assert_eq!(pad_to_block(512), 512);
  assert_eq!(pad_to_block(513), 1024);
}

#[test]
fn entry_round_trips_through_a_block() {
  let mut entry = regular("sub/b.txt", 1_234_567);
  entry.size = 6;
  entry.kind = EntryKind::RegularFile;
  let block = entry.encode().unwrap();
  assert_eq!(&block.magic, HeaderBlock::MAGIC);
  assert_eq!(&block.version, HeaderBlock::VERSION);
  let back = ArchiveEntry::from_block(&block, 7 * BLOCK_SIZE as u64).unwrap();
  assert_eq!(back.name, "sub/b.txt");
  assert_eq!(back.size, 6);
  assert_eq!(back.mtime, 1_234_567);
  assert_eq!(back.begin, 7 * BLOCK_SIZE as u64);
  assert_eq!(back.original_name, None);
  assert_eq!(back.checksum, entry.checksum);
}

#[test]
fn device_entries_fill_all_eight_digits() {
  let mut entry = regular("dev/null", 1_000);
  entry.kind = EntryKind::CharacterDevice;
  entry.dev_major = 1;
  entry.dev_minor = 3;
  let block = entry.encode().unwrap();
  assert_eq!(&block.dev_major, b"00000001");
  assert_eq!(&block.dev_minor, b"00000003");
  let back = ArchiveEntry::from_block(&block, 0).unwrap();
  assert_eq!((back.dev_major, back.dev_minor), (1, 3));
}

#[test]
fn scan_reads_a_hand_built_archive() {
  // one header, one padded payload, two zero blocks, record padding
  let (mut archive, _) = emit_archive(&[("a.txt", b"hello\n")]);
  assert_eq!(archive.get_ref().len(), RECORD_SIZE);
  archive.seek(SeekFrom::Start(0)).unwrap();
  let entries = scan(&mut archive).unwrap();
  assert_eq!(entries.len(), 1);
  assert_eq!(entries[0].name, "a.txt");
  assert_eq!(entries[0].size, 6);
  assert_eq!(entries[0].begin, 0);
  // the stream is left exactly on the record boundary past the padding
  assert_eq!(archive.stream_position().unwrap(), RECORD_SIZE as u64);
}

#[test]
fn scan_offsets_accumulate_header_and_payload_blocks() {
  let (mut archive, emitted) = emit_archive(&[
    ("a", b"hello\n"),
    ("b", &[7u8; 1000]),
    ("c", b"x"),
  ]);
  archive.seek(SeekFrom::Start(0)).unwrap();
  let entries = scan(&mut archive).unwrap();
  let begins: Vec<u64> = entries.iter().map(|entry| entry.begin).collect();
  assert_eq!(begins, [0, 1024, 2560]);
  assert_eq!(
    begins,
    emitted.iter().map(|entry| entry.begin).collect::<Vec<_>>(),
  );
  assert_eq!(archive.stream_position().unwrap(), RECORD_SIZE as u64);
}

#[test]
fn scan_tolerates_a_lone_zero_block_before_a_header() {
  let (real, _) = emit_archive(&[("a", b"data")]);
  let mut bytes = vec![0u8; BLOCK_SIZE];
  bytes.extend_from_slice(real.get_ref());
  let mut archive = Cursor::new(bytes);
  let entries = scan(&mut archive).unwrap();
  assert_eq!(entries.len(), 1);
  assert_eq!(entries[0].name, "a");
  // the lone zero block is not part of any entry's span
  assert_eq!(entries[0].begin, 0);
}

#[test]
fn scan_fails_on_an_archive_without_terminator() {
  let mut entry = regular("a", 1);
  entry.size = 4;
  let mut archive = Cursor::new(Vec::new());
  emit_header(&mut archive, &mut entry).unwrap();
  archive.write_all(b"data").unwrap();
  write_padding(&mut archive, 4).unwrap();
  archive.seek(SeekFrom::Start(0)).unwrap();
  assert!(matches!(
    scan(&mut archive),
    Err(ScanError::UnexpectedEof { offset: 1024 }),
  ));
}

#[test]
fn scan_fails_on_an_empty_stream() {
  let mut archive = Cursor::new(Vec::new());
  assert!(matches!(
    scan(&mut archive),
    Err(ScanError::UnexpectedEof { offset: 0 }),
  ));
}

#[test]
fn scan_rejects_corrupt_headers() {
  let (mut archive, _) = emit_archive(&[("a", b"data")]);
  archive.get_mut()[0] ^= 0xff;
  archive.seek(SeekFrom::Start(0)).unwrap();
  assert!(matches!(
    scan(&mut archive),
    Err(ScanError::BadHeader { offset: 0, .. }),
  ));
}

#[test]
fn terminator_pads_to_the_record_boundary() {
  let mut out = Cursor::new(Vec::new());
  let written = write_terminator(&mut out, 2560).unwrap();
  assert_eq!(written, RECORD_SIZE as u64 - 2560);
  assert!(out.get_ref().iter().all(|&b| b == 0));
}

#[test]
fn terminator_grows_a_record_when_padding_is_thin() {
  // only one block of slack left: a whole extra zero record follows
  let end = RECORD_SIZE as u64 - BLOCK_SIZE as u64;
  let mut out = Cursor::new(Vec::new());
  let written = write_terminator(&mut out, end).unwrap();
  assert_eq!(written, BLOCK_SIZE as u64 + RECORD_SIZE as u64);
  assert_eq!((end + written) % RECORD_SIZE as u64, 0);
}

#[test]
fn terminator_on_a_record_boundary_writes_a_full_record() {
  let mut out = Cursor::new(Vec::new());
  let written = write_terminator(&mut out, RECORD_SIZE as u64).unwrap();
  assert_eq!(written, RECORD_SIZE as u64);
}

fn names(entries: &[ArchiveEntry]) -> Vec<&str> {
  entries.iter().map(|entry| entry.name.as_str()).collect()
}

#[test]
fn remove_middle_entry_compacts_and_reoffsets() {
  let payload_b: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
  let payload_c = [9u8; 50];
  let (mut archive, mut entries) = emit_archive(&[
    ("a", &[1u8; 100]),
    ("b", &payload_b),
    ("c", &payload_c),
  ]);

  let mut sink = BufferSink::default();
  let mut reporter = Reporter::new(&mut sink, Verbosity::Names);
  remove(&mut archive, &mut entries, &["b".into()], &mut reporter).unwrap();

  assert_eq!(names(&entries), ["a", "c"]);
  assert_eq!(entries[0].begin, 0);
  assert_eq!(entries[1].begin, 1024);
  assert_eq!(archive.get_ref().len(), RECORD_SIZE);

  // c's payload slid into b's old place
  let start = entries[1].payload_offset() as usize;
  assert_eq!(&archive.get_ref()[start..start + 50], &payload_c);

  archive.seek(SeekFrom::Start(0)).unwrap();
  let rescanned = scan(&mut archive).unwrap();
  assert_eq!(names(&rescanned), ["a", "c"]);
  assert_eq!(rescanned[1].begin, 1024);
}

#[test]
fn remove_first_entry_moves_the_survivor_to_offset_zero() {
  let (mut archive, mut entries) = emit_archive(&[("a", b"first"), ("b", b"second")]);
  let mut sink = BufferSink::default();
  let mut reporter = Reporter::new(&mut sink, Verbosity::Names);
  remove(&mut archive, &mut entries, &["a".into()], &mut reporter).unwrap();

  assert_eq!(names(&entries), ["b"]);
  assert_eq!(entries[0].begin, 0);
  archive.seek(SeekFrom::Start(0)).unwrap();
  let rescanned = scan(&mut archive).unwrap();
  assert_eq!(rescanned[0].name, "b");
  let start = rescanned[0].payload_offset() as usize;
  assert_eq!(&archive.get_ref()[start..start + 6], b"second");
}

#[test]
fn remove_missing_name_reports_but_still_rewrites() {
  let (mut archive, mut entries) = emit_archive(&[("a", b"data"), ("b", b"more")]);
  let mut sink = BufferSink::default();
  let mut reporter = Reporter::new(&mut sink, Verbosity::Names);
  let result = remove(
    &mut archive,
    &mut entries,
    &["ghost".into(), "b".into()],
    &mut reporter,
  );
  assert!(matches!(result, Err(ArchiveError::MissingNames { missing: 1 })));
  assert!(sink.warnings[0].contains("ghost"));

  // the archive was still compacted for the name that did exist
  assert_eq!(names(&entries), ["a"]);
  assert_eq!(archive.get_ref().len() % RECORD_SIZE, 0);
  archive.seek(SeekFrom::Start(0)).unwrap();
  assert_eq!(names(&scan(&mut archive).unwrap()), ["a"]);
}

#[test]
fn remove_with_no_targets_is_a_no_op() {
  let (mut archive, mut entries) = emit_archive(&[("a", b"data")]);
  let before = archive.get_ref().clone();
  let mut sink = BufferSink::default();
  let mut reporter = Reporter::new(&mut sink, Verbosity::Names);
  remove(&mut archive, &mut entries, &[], &mut reporter).unwrap();
  assert_eq!(archive.get_ref(), &before);
  assert_eq!(entries.len(), 1);
}

#[test]
fn remove_every_entry_leaves_a_bare_terminator() {
  let (mut archive, mut entries) = emit_archive(&[("a", b"data"), ("b", b"more")]);
  let mut sink = BufferSink::default();
  let mut reporter = Reporter::new(&mut sink, Verbosity::Names);
  remove(
    &mut archive,
    &mut entries,
    &["a".into(), "b".into()],
    &mut reporter,
  )
  .unwrap();
  assert!(entries.is_empty());
  assert_eq!(archive.get_ref().len(), RECORD_SIZE);
  assert!(archive.get_ref().iter().all(|&b| b == 0));
  archive.seek(SeekFrom::Start(0)).unwrap();
  assert!(scan(&mut archive).unwrap().is_empty());
}
