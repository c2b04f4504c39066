// src/pty/io.rs

//! Reads and writes on a PTY master that hide `EINTR` and `EAGAIN`.

use std::os::fd::{AsRawFd, BorrowedFd};

use log::trace;

use crate::errno::{self, NativeError};
use crate::error::{Error, Result};
use crate::platform;

/// Reads into `buf`, returning `Ok(0)` at end of stream.
///
/// Once every slave descriptor is closed the master reports `EIO`, which is
/// treated as end of stream.
pub fn read(fd: BorrowedFd<'_>, buf: &mut [u8]) -> Result<usize> {
  read_with(fd, buf, |fd, buf| unsafe {
    libc::read(fd.as_raw_fd(), buf.as_mut_ptr() as *mut libc::c_void, buf.len())
  })
}

/// Writes as much of `buf` as the descriptor accepts in one call.
pub fn write(fd: BorrowedFd<'_>, buf: &[u8]) -> Result<usize> {
  write_with(fd, buf, |fd, buf| unsafe {
    libc::write(fd.as_raw_fd(), buf.as_ptr() as *const libc::c_void, buf.len())
  })
}

/// Writes all of `buf`, looping over short writes.
pub fn write_all(fd: BorrowedFd<'_>, mut buf: &[u8]) -> Result<()> {
  while !buf.is_empty() {
    let written = write(fd, buf)?;
    if written == 0 {
      return Err(Error::Io(NativeError::from_errno("write", platform::EIO)));
    }
    buf = &buf[written..];
  }
  Ok(())
}

pub(crate) fn read_with<F>(fd: BorrowedFd<'_>, buf: &mut [u8], mut syscall: F) -> Result<usize>
where
  F: FnMut(BorrowedFd<'_>, &mut [u8]) -> libc::ssize_t,
{
  let result = errno::retry(
    || errno::check_len("read", syscall(fd, buf)),
    |err| wait_ready(fd, libc::POLLIN, err),
  );
  match result {
    Ok(n) => Ok(n),
    Err(err) if err.errno() == platform::EIO => {
      trace!("read on fd {} hit EIO, treating as end of stream", fd.as_raw_fd());
      Ok(0)
    }
    Err(err) => Err(Error::Io(err)),
  }
}

pub(crate) fn write_with<F>(fd: BorrowedFd<'_>, buf: &[u8], mut syscall: F) -> Result<usize>
where
  F: FnMut(BorrowedFd<'_>, &[u8]) -> libc::ssize_t,
{
  errno::retry(
    || errno::check_len("write", syscall(fd, buf)),
    |err| wait_ready(fd, libc::POLLOUT, err),
  )
  .map_err(Error::Io)
}

/// Blocks until `fd` is ready for `events` after a would-block failure.
fn wait_ready(fd: BorrowedFd<'_>, events: libc::c_short, err: &NativeError) -> std::result::Result<(), NativeError> {
  if err.is_interrupted() {
    return Ok(());
  }
  let mut pollfd = libc::pollfd {
    fd: fd.as_raw_fd(),
    events,
    revents: 0,
  };
  errno::retry_interrupted("poll", || unsafe { libc::poll(&mut pollfd, 1, -1) })?;
  Ok(())
}
