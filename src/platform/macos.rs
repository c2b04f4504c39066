// src/platform/macos.rs

use std::fs;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use log::debug;

use super::OsFamily;
use crate::errno::{self, NativeError};

pub const FAMILY: OsFamily = OsFamily::Apple;

pub type IoctlRequest = libc::c_ulong;

// TIOCSCTTY is declared as an unsigned int on Apple targets.
pub const TIOCSCTTY: IoctlRequest = libc::TIOCSCTTY as IoctlRequest;
pub const TIOCSWINSZ: IoctlRequest = libc::TIOCSWINSZ as IoctlRequest;
pub const TIOCGWINSZ: IoctlRequest = libc::TIOCGWINSZ as IoctlRequest;

/// `posix_openpt` rejects anything beyond these two flags here.
pub const MASTER_OPEN_FLAGS: libc::c_int = libc::O_RDWR | libc::O_NOCTTY;
pub const SLAVE_OPEN_FLAGS: libc::c_int = libc::O_RDWR | libc::O_NOCTTY | libc::O_CLOEXEC;

pub const EAGAIN: i32 = libc::EAGAIN;
pub const EWOULDBLOCK: i32 = libc::EWOULDBLOCK;
pub const EINTR: i32 = libc::EINTR;
pub const ENOENT: i32 = libc::ENOENT;
pub const EIO: i32 = libc::EIO;

pub const SPAWN_CLOEXEC_DEFAULT: Option<libc::c_short> =
  Some(libc::POSIX_SPAWN_CLOEXEC_DEFAULT as libc::c_short);

pub fn open_master() -> libc::c_int {
  let fd = unsafe { libc::posix_openpt(MASTER_OPEN_FLAGS) };
  if fd >= 0 && set_cloexec(fd).is_err() {
    let err = std::io::Error::last_os_error();
    unsafe { libc::close(fd) };
    debug!("Failed to mark PTY master close-on-exec: {}", err);
    return -1;
  }
  fd
}

fn set_cloexec(fd: RawFd) -> Result<(), NativeError> {
  errno::check("fcntl(F_SETFD)", unsafe {
    libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC)
  })
  .map(|_| ())
}

/// A pipe whose both ends are close-on-exec. There is no `pipe2` here, so the
/// flag is applied after creation.
pub fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd), NativeError> {
  let mut fds = [0 as libc::c_int; 2];
  errno::check("pipe", unsafe { libc::pipe(fds.as_mut_ptr()) })?;
  let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
  set_cloexec(fds[0])?;
  set_cloexec(fds[1])?;
  Ok((read, write))
}

pub fn open_descriptors() -> Vec<RawFd> {
  match fs::read_dir("/dev/fd") {
    Ok(entries) => entries
      .filter_map(|entry| entry.ok())
      .filter_map(|entry| entry.file_name().to_str().and_then(|name| name.parse().ok()))
      .collect(),
    Err(e) => {
      debug!("Cannot list /dev/fd ({}), scanning the table", e);
      (0..super::descriptor_table_size()).collect()
    }
  }
}

/// Closes every descriptor from `first` up to `limit` except `keep`.
///
/// Runs between fork and exec, so it only issues raw syscalls.
pub unsafe fn close_descriptors_from(first: RawFd, limit: RawFd, keep: RawFd) {
  for fd in first..limit {
    if fd != keep {
      libc::close(fd);
    }
  }
}
