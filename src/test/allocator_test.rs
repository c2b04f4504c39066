// src/test/allocator_test.rs

use std::os::fd::AsRawFd;
use std::time::Duration;

use serial_test::serial;

use super::{init_logger, open_descriptor_count, read_until_contains};
use crate::pty::{self, resolve_slave_path};

#[test]
#[serial]
fn allocation_yields_a_usable_pair() {
  init_logger();
  let pair = pty::allocate().expect("allocate PTY");
  let slave = pair.slave().expect("slave still open");

  assert_ne!(pair.master_fd(), slave.as_raw_fd());
  assert!(pair.slave_path().exists(), "{} missing", pair.slave_path().display());
  assert_eq!(resolve_slave_path(pair.master()).unwrap(), pair.slave_path());
  assert_eq!(unsafe { libc::isatty(slave.as_raw_fd()) }, 1);
}

#[test]
#[serial]
fn descriptors_are_close_on_exec() {
  let pair = pty::allocate().expect("allocate PTY");
  for fd in [pair.master_fd(), pair.slave_fd().unwrap()] {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    assert_ne!(flags & libc::FD_CLOEXEC, 0, "fd {} lacks FD_CLOEXEC", fd);
  }
}

#[test]
#[serial]
fn dropping_a_pair_releases_its_descriptors() {
  let before = open_descriptor_count();
  let pair = pty::allocate().expect("allocate PTY");
  assert_eq!(open_descriptor_count(), before + 2);
  drop(pair);
  assert_eq!(open_descriptor_count(), before);
}

#[test]
#[serial]
fn slave_output_reaches_the_master() {
  let pair = pty::allocate().expect("allocate PTY");
  let slave = pair.slave_fd().unwrap();
  let message = b"ping\n";
  let written = unsafe { libc::write(slave, message.as_ptr() as *const libc::c_void, message.len()) };
  assert_eq!(written, message.len() as isize);

  let output = read_until_contains(pair.master(), "ping\n", Duration::from_secs(5));
  assert_eq!(output, "ping\n");
}

#[test]
#[serial]
fn each_allocation_gets_its_own_device() {
  let first = pty::allocate().expect("allocate PTY");
  let second = pty::allocate().expect("allocate PTY");
  assert_ne!(first.slave_path(), second.slave_path());
  assert_ne!(first.master_fd(), second.master_fd());
}

#[test]
#[serial]
fn cloned_master_is_a_separate_descriptor() {
  let pair = pty::allocate().expect("allocate PTY");
  let clone = pair.try_clone_master().expect("clone master");
  assert_ne!(clone.as_raw_fd(), pair.master_fd());
  assert_eq!(resolve_slave_path(std::os::fd::AsFd::as_fd(&clone)).unwrap(), pair.slave_path());
}
