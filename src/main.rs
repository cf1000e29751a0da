use std::{
  env,
  fs::{File, OpenOptions},
  path::PathBuf,
  process::ExitCode,
};

use ustar_fs::{
  append, diff, extract, list_entries, remove, scan, update, ArchiveEntry, Reporter, StdioSink,
  Verbosity,
};

/// Exactly one per invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
  Append,
  Create,
  Diff,
  List,
  Remove,
  Update,
  Extract,
}

const USAGE: &str = "Usage: ustar option(s) tarfile [sources]\nUsage: ustar help";

const HELP: &str = "\
Usage: ustar option(s) tarfile [sources]
Usage: ustar help

Important:
    This program is not meant to be a full tar implementation.
    Only a subset of the functions the GNU tar utility has are supported.

    Special files that already exist will not be replaced when extracting (no error)
    Regular expression expansion/matching is not done.

    options (only one allowed at a time):
        a - append files to archive
        c - create a new archive
        d - diff the tar file with the working directory
        l - list the files in the archive
        r - remove files from the archive
        u - update entries that have newer modification times
        x - extract from archive

    other options:
        v - make operation verbose

Ex: ustar vl archive.tar";

fn main() -> ExitCode {
  let args: Vec<String> = env::args().collect();
  if args.len() == 2 && args[1] == "help" {
    println!("{HELP}");
    return ExitCode::SUCCESS;
  }
  if args.len() < 3 {
    eprintln!("{USAGE}");
    return ExitCode::FAILURE;
  }

  let mut modes = Vec::new();
  let mut verbosity = Verbosity::Silent;
  for letter in args[1].chars() {
    match letter {
      'a' => modes.push(Mode::Append),
      'c' => modes.push(Mode::Create),
      'd' => modes.push(Mode::Diff),
      'l' => modes.push(Mode::List),
      'r' => modes.push(Mode::Remove),
      'u' => modes.push(Mode::Update),
      'x' => modes.push(Mode::Extract),
      'v' => verbosity = Verbosity::Names,
      '-' => {},
      other => {
        eprintln!("Error: Bad option: {other}");
        eprintln!("Do 'ustar help' for help");
        return ExitCode::FAILURE;
      },
    }
  }
  modes.dedup();
  let mode = match modes.as_slice() {
    [mode] => *mode,
    [] => {
      eprintln!("Error: Need one of 'acdlrux' options set");
      return ExitCode::FAILURE;
    },
    _ => {
      eprintln!("Error: Cannot have all of these flags at once");
      return ExitCode::FAILURE;
    },
  };

  let archive_path = &args[2];
  let names: Vec<String> = args[3..].to_vec();
  let paths: Vec<PathBuf> = names.iter().map(PathBuf::from).collect();

  let mut sink = StdioSink;
  let mut reporter = Reporter::new(&mut sink, verbosity);

  if mode == Mode::Create {
    let mut archive = match File::create(archive_path) {
      Ok(archive) => archive,
      Err(err) => {
        eprintln!("Error: Unable to open file {archive_path}: {err}");
        return ExitCode::FAILURE;
      },
    };
    let mut entries = Vec::new();
    if let Err(err) = append(&mut archive, &mut entries, &paths, &mut reporter) {
      eprintln!("Error: {err}");
      return ExitCode::FAILURE;
    }
    return ExitCode::SUCCESS;
  }

  // every other mode starts from a scan of the existing archive
  let writable = matches!(mode, Mode::Append | Mode::Remove | Mode::Update);
  let mut archive = match OpenOptions::new()
    .read(true)
    .write(writable)
    .open(archive_path)
  {
    Ok(archive) => archive,
    Err(err) => {
      eprintln!("Error: Unable to open file {archive_path}: {err}");
      return ExitCode::FAILURE;
    },
  };
  let mut entries: Vec<ArchiveEntry> = match scan(&mut archive) {
    Ok(entries) => entries,
    Err(err) => {
      eprintln!("Error: {err}");
      return ExitCode::FAILURE;
    },
  };

  let outcome = match mode {
    Mode::Append => append(&mut archive, &mut entries, &paths, &mut reporter).map(|_| ()),
    Mode::Update => update(&mut archive, &mut entries, &paths, &mut reporter).map(|_| ()),
    Mode::Remove => remove(&mut archive, &mut entries, &names, &mut reporter),
    Mode::Extract => extract(&mut archive, &entries, &names, &mut reporter),
    Mode::Diff => {
      diff(&entries, &mut reporter);
      Ok(())
    },
    Mode::List => {
      // a bare list still prints names; `v` upgrades it to the long form
      let mut list_sink = StdioSink;
      let mut loud = Reporter::new(&mut list_sink, verbosity.louder());
      list_entries(&entries, &names, &mut loud);
      Ok(())
    },
    Mode::Create => unreachable!("handled above"),
  };

  if let Err(err) = outcome {
    eprintln!("Error: {err}");
    eprintln!("Exiting with error due to previous error");
    return ExitCode::FAILURE;
  }
  ExitCode::SUCCESS
}
