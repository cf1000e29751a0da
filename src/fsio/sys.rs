use std::{
  ffi::{CStr, CString},
  io, mem,
  os::unix::ffi::OsStrExt as _,
  path::Path,
  ptr,
};

// libc 0.2.189 dropped the `getlogin_r` binding from its public API even
// though the symbol is present in glibc; declare it ourselves.
extern "C" {
  fn getlogin_r(buf: *mut libc::c_char, buflen: libc::size_t) -> libc::c_int;
}

fn path_cstr(path: &Path) -> io::Result<CString> {
  CString::new(path.as_os_str().as_bytes())
    .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte"))
}

/// Creates a device node. `mode` carries the `S_IFCHR`/`S_IFBLK` bit.
pub fn mknod(path: &Path, mode: u32, dev: u64) -> io::Result<()> {
  let path = path_cstr(path)?;
  // SAFETY: the path is a valid NUL-terminated C string.
  let rc = unsafe { libc::mknod(path.as_ptr(), mode as libc::mode_t, dev as libc::dev_t) };
  if rc == 0 {
    Ok(())
  } else {
    Err(io::Error::last_os_error())
  }
}

/// Creates a named pipe.
pub fn mkfifo(path: &Path, mode: u32) -> io::Result<()> {
  let path = path_cstr(path)?;
  // SAFETY: the path is a valid NUL-terminated C string.
  let rc = unsafe { libc::mkfifo(path.as_ptr(), mode as libc::mode_t) };
  if rc == 0 {
    Ok(())
  } else {
    Err(io::Error::last_os_error())
  }
}

/// Splits a `stat` device number into its major and minor halves.
#[must_use]
pub fn split_dev(rdev: u64) -> (u32, u32) {
  let dev = rdev as libc::dev_t;
  (libc::major(dev), libc::minor(dev))
}

/// The login name for the archive's owner field. Falls back to the
/// effective user's passwd entry when there is no controlling terminal
/// (daemons, containers, CI).
#[must_use]
pub fn login_name() -> Option<String> {
  let mut buf = [0 as libc::c_char; 256];
  // SAFETY: getlogin_r writes at most buf.len() bytes including the NUL.
  let rc = unsafe { getlogin_r(buf.as_mut_ptr(), buf.len()) };
  if rc == 0 {
    // SAFETY: a zero return guarantees a NUL-terminated name.
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    return Some(name.to_string_lossy().into_owned());
  }
  // SAFETY: geteuid cannot fail.
  user_name(unsafe { libc::geteuid() })
}

/// Resolves a uid to its passwd name.
#[must_use]
pub fn user_name(uid: u32) -> Option<String> {
  let mut pwd: libc::passwd = unsafe { mem::zeroed() };
  let mut buf = [0 as libc::c_char; 1024];
  let mut result: *mut libc::passwd = ptr::null_mut();
  // SAFETY: all out-pointers reference live stack storage of the given size.
  let rc = unsafe {
    libc::getpwuid_r(
      uid as libc::uid_t,
      &mut pwd,
      buf.as_mut_ptr(),
      buf.len(),
      &mut result,
    )
  };
  if rc != 0 || result.is_null() {
    return None;
  }
  // SAFETY: a non-null result points at pwd, whose pw_name is NUL-terminated.
  let name = unsafe { CStr::from_ptr(pwd.pw_name) };
  Some(name.to_string_lossy().into_owned())
}

/// Resolves a gid to its group name.
#[must_use]
pub fn group_name(gid: u32) -> Option<String> {
  let mut grp: libc::group = unsafe { mem::zeroed() };
  let mut buf = [0 as libc::c_char; 1024];
  let mut result: *mut libc::group = ptr::null_mut();
  // SAFETY: all out-pointers reference live stack storage of the given size.
  let rc = unsafe {
    libc::getgrgid_r(
      gid as libc::gid_t,
      &mut grp,
      buf.as_mut_ptr(),
      buf.len(),
      &mut result,
    )
  };
  if rc != 0 || result.is_null() {
    return None;
  }
  // SAFETY: a non-null result points at grp, whose gr_name is NUL-terminated.
  let name = unsafe { CStr::from_ptr(grp.gr_name) };
  Some(name.to_string_lossy().into_owned())
}
