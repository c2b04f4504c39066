// src/test/mod.rs

mod allocator_test;

use std::os::fd::{AsRawFd, BorrowedFd};
use std::time::{Duration, Instant};

use crate::platform;
use crate::pty::io as pty_io;

pub(crate) const OUTPUT_TIMEOUT: Duration = Duration::from_secs(10);

/// Sets the calling thread's `errno`.
pub(crate) fn set_errno(code: i32) {
  #[cfg(target_os = "linux")]
  unsafe {
    *libc::__errno_location() = code
  };
  #[cfg(target_os = "macos")]
  unsafe {
    *libc::__error() = code
  };
}

pub(crate) fn init_logger() {
  crate::utils::logging::initialize_test_logging();
}

/// Terminal output with `\r\n` line endings turned into `\n`.
pub(crate) fn normalize(output: &[u8]) -> String {
  String::from_utf8_lossy(output).replace("\r\n", "\n")
}

/// Reads `fd` until end of stream or until `timeout` passes.
pub(crate) fn read_until_eof(fd: BorrowedFd<'_>, timeout: Duration) -> String {
  let deadline = Instant::now() + timeout;
  let mut output = Vec::new();
  let mut buf = [0u8; 1024];
  loop {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
      panic!("timed out waiting for end of stream, got {:?}", normalize(&output));
    }
    let mut pollfd = libc::pollfd {
      fd: fd.as_raw_fd(),
      events: libc::POLLIN,
      revents: 0,
    };
    let ready = unsafe { libc::poll(&mut pollfd, 1, remaining.as_millis() as libc::c_int) };
    if ready <= 0 {
      continue;
    }
    match pty_io::read(fd, &mut buf).expect("read from PTY master") {
      0 => return normalize(&output),
      n => output.extend_from_slice(&buf[..n]),
    }
  }
}

/// Reads `fd` until `needle` shows up in the normalized output.
pub(crate) fn read_until_contains(fd: BorrowedFd<'_>, needle: &str, timeout: Duration) -> String {
  let deadline = Instant::now() + timeout;
  let mut output = Vec::new();
  let mut buf = [0u8; 1024];
  while !normalize(&output).contains(needle) {
    let remaining = deadline.saturating_duration_since(Instant::now());
    assert!(!remaining.is_zero(), "never saw {:?} in {:?}", needle, normalize(&output));
    let mut pollfd = libc::pollfd {
      fd: fd.as_raw_fd(),
      events: libc::POLLIN,
      revents: 0,
    };
    if unsafe { libc::poll(&mut pollfd, 1, remaining.as_millis() as libc::c_int) } <= 0 {
      continue;
    }
    let n = pty_io::read(fd, &mut buf).expect("read from PTY master");
    assert!(n > 0, "stream ended before {:?} in {:?}", needle, normalize(&output));
    output.extend_from_slice(&buf[..n]);
  }
  normalize(&output)
}

pub(crate) fn open_descriptor_count() -> usize {
  platform::open_descriptors().len()
}
