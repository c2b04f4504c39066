// src/platform/linux.rs

use std::fs;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};

use log::debug;

use super::OsFamily;
use crate::errno::{self, NativeError};

pub const FAMILY: OsFamily = OsFamily::Linux;

/// Type of the `request` argument to `ioctl`, which musl declares as `int`.
#[cfg(not(target_env = "musl"))]
pub type IoctlRequest = libc::c_ulong;
#[cfg(target_env = "musl")]
pub type IoctlRequest = libc::c_int;

pub const TIOCSCTTY: IoctlRequest = libc::TIOCSCTTY as IoctlRequest;
pub const TIOCSWINSZ: IoctlRequest = libc::TIOCSWINSZ as IoctlRequest;
pub const TIOCGWINSZ: IoctlRequest = libc::TIOCGWINSZ as IoctlRequest;

/// `/dev/ptmx` accepts close-on-exec directly.
pub const MASTER_OPEN_FLAGS: libc::c_int = libc::O_RDWR | libc::O_NOCTTY | libc::O_CLOEXEC;
pub const SLAVE_OPEN_FLAGS: libc::c_int = libc::O_RDWR | libc::O_NOCTTY | libc::O_CLOEXEC;

pub const EAGAIN: i32 = libc::EAGAIN;
pub const EWOULDBLOCK: i32 = libc::EWOULDBLOCK;
pub const EINTR: i32 = libc::EINTR;
pub const ENOENT: i32 = libc::ENOENT;
pub const EIO: i32 = libc::EIO;

/// glibc has no spawn flag that closes inherited descriptors by default.
pub const SPAWN_CLOEXEC_DEFAULT: Option<libc::c_short> = None;

pub fn open_master() -> libc::c_int {
  unsafe { libc::posix_openpt(MASTER_OPEN_FLAGS) }
}

/// A pipe whose both ends are close-on-exec.
pub fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd), NativeError> {
  let mut fds = [0 as libc::c_int; 2];
  errno::check("pipe2", unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) })?;
  Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

/// Descriptors currently open in this process.
pub fn open_descriptors() -> Vec<RawFd> {
  match fs::read_dir("/proc/self/fd") {
    Ok(entries) => entries
      .filter_map(|entry| entry.ok())
      .filter_map(|entry| entry.file_name().to_str().and_then(|name| name.parse().ok()))
      .collect(),
    Err(e) => {
      debug!("Cannot list /proc/self/fd ({}), scanning the table", e);
      (0..super::descriptor_table_size()).collect()
    }
  }
}

/// Closes every descriptor from `first` up to `limit` except `keep`.
///
/// Runs between fork and exec, so it only issues raw syscalls.
pub unsafe fn close_descriptors_from(first: RawFd, limit: RawFd, keep: RawFd) {
  if close_range_except(first, keep) {
    return;
  }
  for fd in first..limit {
    if fd != keep {
      libc::close(fd);
    }
  }
}

unsafe fn close_range_except(first: RawFd, keep: RawFd) -> bool {
  if keep < first {
    return close_range(first, libc::c_uint::MAX);
  }
  if keep > first && !close_range(first, (keep - 1) as libc::c_uint) {
    return false;
  }
  close_range(keep + 1, libc::c_uint::MAX)
}

/// `close_range(2)`, available since Linux 5.9.
unsafe fn close_range(low: RawFd, high: libc::c_uint) -> bool {
  libc::syscall(libc::SYS_close_range, low as libc::c_uint, high, 0 as libc::c_uint) == 0
}
