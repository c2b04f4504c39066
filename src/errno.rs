// src/errno.rs

//! Conversion of raw syscall returns into classified failures.
//!
//! Syscalls report failure through a sentinel return (`-1`) plus `errno`,
//! while the posix_spawn family returns the error number directly. Both are
//! folded into [`NativeError`], which remembers the operation name, the
//! numeric code, and whether the code is worth retrying.

use std::io;

use log::trace;
use thiserror::Error;

use crate::platform;

/// A failed native call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{operation} failed: {} (errno {errno})", describe(.errno))]
pub struct NativeError {
  operation: &'static str,
  errno: i32,
  retryable: bool,
}

fn describe(errno: &i32) -> io::Error {
  io::Error::from_raw_os_error(*errno)
}

impl NativeError {
  pub fn from_errno(operation: &'static str, errno: i32) -> Self {
    NativeError {
      operation,
      errno,
      retryable: is_retryable(errno),
    }
  }

  /// Captures the calling thread's current `errno`.
  pub fn last(operation: &'static str) -> Self {
    let errno = io::Error::last_os_error()
      .raw_os_error()
      .unwrap_or(platform::EIO);
    Self::from_errno(operation, errno)
  }

  /// Converts an `io::Error`, falling back to `EIO` when it carries no code.
  pub fn from_io(operation: &'static str, err: &io::Error) -> Self {
    Self::from_errno(operation, err.raw_os_error().unwrap_or(platform::EIO))
  }

  pub fn operation(&self) -> &'static str {
    self.operation
  }

  pub fn errno(&self) -> i32 {
    self.errno
  }

  pub fn is_retryable(&self) -> bool {
    self.retryable
  }

  pub fn is_interrupted(&self) -> bool {
    self.errno == platform::EINTR
  }

  pub fn kind(&self) -> io::ErrorKind {
    describe(&self.errno).kind()
  }
}

impl From<NativeError> for io::Error {
  fn from(err: NativeError) -> Self {
    io::Error::from_raw_os_error(err.errno)
  }
}

/// Interrupted and would-block codes are retried; everything else is fatal.
pub fn is_retryable(errno: i32) -> bool {
  errno == platform::EINTR || errno == platform::EAGAIN || errno == platform::EWOULDBLOCK
}

/// Treats a negative return as failure and reads `errno`.
pub fn check(operation: &'static str, ret: libc::c_int) -> Result<libc::c_int, NativeError> {
  if ret < 0 {
    Err(NativeError::last(operation))
  } else {
    Ok(ret)
  }
}

/// [`check`] for byte-count returning calls such as `read` and `write`.
pub fn check_len(operation: &'static str, ret: libc::ssize_t) -> Result<usize, NativeError> {
  if ret < 0 {
    Err(NativeError::last(operation))
  } else {
    Ok(ret as usize)
  }
}

/// For calls that return the error number itself and zero on success.
pub fn check_status(operation: &'static str, ret: libc::c_int) -> Result<(), NativeError> {
  match ret {
    0 => Ok(()),
    // Some libcs return -1 and set errno instead.
    r if r < 0 => Err(NativeError::last(operation)),
    r => Err(NativeError::from_errno(operation, r)),
  }
}

/// Runs `attempt` until it succeeds or fails with a non-retryable code.
///
/// `wait` is called between attempts with the retryable failure, typically to
/// block in `poll` until the descriptor is ready again. Errors from `wait`
/// end the loop.
pub fn retry<T, A, W>(mut attempt: A, mut wait: W) -> Result<T, NativeError>
where
  A: FnMut() -> Result<T, NativeError>,
  W: FnMut(&NativeError) -> Result<(), NativeError>,
{
  loop {
    match attempt() {
      Err(err) if err.is_retryable() => {
        trace!("{} reported errno {}, retrying", err.operation(), err.errno());
        wait(&err)?;
      }
      result => return result,
    }
  }
}

/// [`retry`] for calls with no descriptor to wait on.
pub fn retry_immediately<T, A>(attempt: A) -> Result<T, NativeError>
where
  A: FnMut() -> Result<T, NativeError>,
{
  retry(attempt, |_| Ok(()))
}

/// Reissues a `-1`/errno style call while it fails with `EINTR`.
pub fn retry_interrupted<F>(operation: &'static str, mut call: F) -> Result<libc::c_int, NativeError>
where
  F: FnMut() -> libc::c_int,
{
  loop {
    match check(operation, call()) {
      Err(err) if err.is_interrupted() => continue,
      result => return result,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn classifies_retryable_codes() {
    assert!(is_retryable(platform::EINTR));
    assert!(is_retryable(platform::EAGAIN));
    assert!(is_retryable(platform::EWOULDBLOCK));
    assert!(!is_retryable(platform::ENOENT));
    assert!(!is_retryable(libc::EACCES));
    assert!(!is_retryable(libc::EBADF));
  }

  #[test]
  fn check_treats_negative_return_as_failure() {
    assert_eq!(check("dup", 7), Ok(7));
    let err = check("close", unsafe { libc::close(-1) }).unwrap_err();
    assert_eq!(err.operation(), "close");
    assert_eq!(err.errno(), libc::EBADF);
    assert!(!err.is_retryable());
  }

  #[test]
  fn check_status_uses_returned_code() {
    assert!(check_status("posix_spawn", 0).is_ok());
    let err = check_status("posix_spawn", platform::ENOENT).unwrap_err();
    assert_eq!(err.errno(), platform::ENOENT);
    assert_eq!(err.kind(), io::ErrorKind::NotFound);
  }

  #[test]
  fn retry_hides_interruptions() {
    let mut calls = 0;
    let result = retry_immediately(|| {
      calls += 1;
      if calls < 3 {
        Err(NativeError::from_errno("read", platform::EINTR))
      } else {
        Ok(b"hi".to_vec())
      }
    });
    assert_eq!(result.unwrap(), b"hi".to_vec());
    assert_eq!(calls, 3);
  }

  #[test]
  fn retry_surfaces_fatal_codes_with_context() {
    let mut waits = 0;
    let err = retry(
      || -> Result<(), NativeError> { Err(NativeError::from_errno("ioctl(TIOCSWINSZ)", libc::ENOTTY)) },
      |_| {
        waits += 1;
        Ok(())
      },
    )
    .unwrap_err();
    assert_eq!(waits, 0);
    assert_eq!(err.operation(), "ioctl(TIOCSWINSZ)");
    assert_eq!(err.errno(), libc::ENOTTY);
    assert!(err.to_string().contains("errno"));
  }

  #[test]
  fn retry_interrupted_only_repeats_eintr() {
    let mut calls = 0;
    let ret = retry_interrupted("ioctl", || {
      calls += 1;
      if calls == 1 {
        unsafe { *libc_errno() = platform::EINTR };
        -1
      } else {
        0
      }
    });
    assert_eq!(ret, Ok(0));
    assert_eq!(calls, 2);

    let err = retry_interrupted("close", || unsafe { libc::close(-1) }).unwrap_err();
    assert_eq!(err.errno(), libc::EBADF);
  }

  #[cfg(target_os = "linux")]
  unsafe fn libc_errno() -> *mut libc::c_int {
    libc::__errno_location()
  }

  #[cfg(target_os = "macos")]
  unsafe fn libc_errno() -> *mut libc::c_int {
    libc::__error()
  }

  #[test]
  fn wait_failure_stops_the_loop() {
    let err = retry(
      || -> Result<(), NativeError> { Err(NativeError::from_errno("write", platform::EAGAIN)) },
      |_| Err(NativeError::from_errno("poll", libc::EBADF)),
    )
    .unwrap_err();
    assert_eq!(err.operation(), "poll");
  }
}
