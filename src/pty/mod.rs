// src/pty/mod.rs

//! Allocation of pseudo-terminal master/slave pairs.

pub mod io;
pub mod size;

use std::ffi::{CStr, CString, OsStr};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use log::{debug, error, warn};
use parking_lot::Mutex;

use crate::errno::{self, NativeError};
use crate::error::{Error, Result};
use crate::platform;
use crate::resolver;

pub use size::WindowSize;

type PtsnameR = unsafe extern "C" fn(libc::c_int, *mut libc::c_char, libc::size_t) -> libc::c_int;

/// `ptsname` returns a pointer into static storage.
static PTSNAME_LOCK: Mutex<()> = parking_lot::const_mutex(());

const SLAVE_NAME_CAPACITY: usize = 128;

/// An allocated master/slave pair.
///
/// The slave stays open in the parent until a child has been spawned on it.
/// Dropping the pair closes whatever descriptors it still holds. Children
/// spawned on it only keep a weak handle to the master, so they cannot
/// reach the descriptor once the pair is gone.
#[derive(Debug)]
pub struct PtyPair {
  master: Arc<OwnedFd>,
  slave: Option<OwnedFd>,
  slave_path: PathBuf,
}

/// Opens a fresh PTY pair.
pub fn allocate() -> Result<PtyPair> {
  let raw = platform::open_master();
  if raw < 0 {
    let err = NativeError::last("posix_openpt");
    error!("Failed to open PTY master: {}", err);
    return Err(Error::DeviceUnavailable(err));
  }
  let master = unsafe { OwnedFd::from_raw_fd(raw) };
  debug!("Opened PTY master fd {}", raw);

  errno::check("grantpt", unsafe { libc::grantpt(raw) }).map_err(|e| {
    error!("grantpt failed: {}", e);
    Error::PermissionDenied(e)
  })?;
  errno::check("unlockpt", unsafe { libc::unlockpt(raw) }).map_err(|e| {
    error!("unlockpt failed: {}", e);
    Error::PermissionDenied(e)
  })?;

  let slave_path = resolve_slave_path(master.as_fd())?;
  let slave = open_slave(&slave_path)?;
  debug!(
    "Allocated PTY pair: master fd {}, slave fd {} ({})",
    raw,
    slave.as_raw_fd(),
    slave_path.display()
  );

  Ok(PtyPair {
    master: Arc::new(master),
    slave: Some(slave),
    slave_path,
  })
}

/// Path of the slave device that belongs to `master`.
pub fn resolve_slave_path(master: BorrowedFd<'_>) -> Result<PathBuf> {
  let ptsname_r = match unsafe { resolver::resolve_optional::<PtsnameR>("ptsname_r") } {
    Ok(found) => found,
    Err(e) => {
      warn!("Falling back to ptsname: {}", e);
      None
    }
  };

  let name = match ptsname_r {
    Some(ptsname_r) => {
      let mut buf = [0 as libc::c_char; SLAVE_NAME_CAPACITY];
      errno::check_status("ptsname_r", unsafe {
        ptsname_r(master.as_raw_fd(), buf.as_mut_ptr(), buf.len())
      })
      .map_err(Error::DeviceUnavailable)?;
      unsafe { CStr::from_ptr(buf.as_ptr()) }.to_bytes().to_vec()
    }
    None => {
      let _guard = PTSNAME_LOCK.lock();
      let name = unsafe { libc::ptsname(master.as_raw_fd()) };
      if name.is_null() {
        return Err(Error::DeviceUnavailable(NativeError::last("ptsname")));
      }
      unsafe { CStr::from_ptr(name) }.to_bytes().to_vec()
    }
  };

  Ok(PathBuf::from(OsStr::from_bytes(&name)))
}

fn open_slave(path: &Path) -> Result<OwnedFd> {
  let c_path = CString::new(path.as_os_str().as_bytes())
    .map_err(|_| Error::InvalidRequest(format!("slave path {} contains NUL", path.display())))?;
  let fd = errno::retry_interrupted("open(slave)", || unsafe {
    libc::open(c_path.as_ptr(), platform::SLAVE_OPEN_FLAGS)
  })
  .map_err(|e| {
    error!("Failed to open PTY slave {}: {}", path.display(), e);
    match e.errno() {
      libc::EACCES | libc::EPERM => Error::PermissionDenied(e),
      _ => Error::DeviceUnavailable(e),
    }
  })?;
  Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

impl PtyPair {
  pub fn master(&self) -> BorrowedFd<'_> {
    self.master.as_fd()
  }

  pub fn master_fd(&self) -> RawFd {
    self.master.as_raw_fd()
  }

  /// The slave descriptor, or `None` once it was handed to a child.
  pub fn slave(&self) -> Option<BorrowedFd<'_>> {
    self.slave.as_ref().map(|fd| fd.as_fd())
  }

  pub fn slave_fd(&self) -> Option<RawFd> {
    self.slave.as_ref().map(|fd| fd.as_raw_fd())
  }

  pub fn slave_path(&self) -> &Path {
    &self.slave_path
  }

  pub fn resize(&self, size: WindowSize) -> Result<()> {
    size::resize(self.master(), size)
  }

  pub fn window_size(&self) -> Result<WindowSize> {
    size::window_size(self.master())
  }

  /// Switches the master between blocking and non-blocking mode.
  pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
    let fd = self.master_fd();
    let flags = errno::check("fcntl(F_GETFL)", unsafe { libc::fcntl(fd, libc::F_GETFL) })
      .map_err(Error::Io)?;
    let flags = if nonblocking {
      flags | libc::O_NONBLOCK
    } else {
      flags & !libc::O_NONBLOCK
    };
    errno::check("fcntl(F_SETFL)", unsafe { libc::fcntl(fd, libc::F_SETFL, flags) })
      .map_err(Error::Io)?;
    Ok(())
  }

  /// A second close-on-exec handle to the master.
  pub fn try_clone_master(&self) -> Result<OwnedFd> {
    self
      .master
      .try_clone()
      .map_err(|e| Error::Io(NativeError::from_io("fcntl(F_DUPFD_CLOEXEC)", &e)))
  }

  /// Closes the parent's copy of the slave.
  ///
  /// Called after a successful spawn so the master sees end of stream once
  /// the child and its descendants exit.
  pub fn release_slave(&mut self) {
    if let Some(slave) = self.slave.take() {
      debug!("Closing parent copy of slave fd {}", slave.as_raw_fd());
    }
  }

  /// Weak handle to the master, dead once the pair or its owner closes it.
  pub(crate) fn downgrade_master(&self) -> Weak<OwnedFd> {
    Arc::downgrade(&self.master)
  }

  /// Consumes the pair, keeping only the shared master.
  pub(crate) fn into_shared_master(self) -> Arc<OwnedFd> {
    self.master
  }

  /// Consumes the pair, keeping only the master.
  ///
  /// Falls back to a duplicate if a resize through a child is in flight on
  /// another thread.
  pub fn into_master(self) -> Result<OwnedFd> {
    Arc::try_unwrap(self.master).or_else(|shared| {
      shared
        .try_clone()
        .map_err(|e| Error::Io(NativeError::from_io("fcntl(F_DUPFD_CLOEXEC)", &e)))
    })
  }
}

impl AsFd for PtyPair {
  fn as_fd(&self) -> BorrowedFd<'_> {
    self.master()
  }
}

impl AsRawFd for PtyPair {
  fn as_raw_fd(&self) -> RawFd {
    self.master_fd()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  #[serial]
  fn slave_path_comes_from_the_master() {
    let pair = allocate().unwrap();
    assert_ne!(pair.master_fd(), pair.slave_fd().unwrap());
    assert_eq!(resolve_slave_path(pair.master()).unwrap(), pair.slave_path());
    assert!(pair.slave_path().starts_with("/dev"));
  }

  #[test]
  #[serial]
  fn release_slave_is_idempotent() {
    let mut pair = allocate().unwrap();
    pair.release_slave();
    pair.release_slave();
    assert!(pair.slave().is_none());
    assert!(pair.slave_path().exists());
  }

  #[test]
  #[serial]
  fn weak_master_dies_with_the_pair() {
    let pair = allocate().unwrap();
    let weak = pair.downgrade_master();
    assert_eq!(weak.upgrade().unwrap().as_raw_fd(), pair.master_fd());
    let master = pair.into_master().unwrap();
    assert!(weak.upgrade().is_none());
    drop(master);
  }

  #[test]
  #[serial]
  fn nonblocking_flag_round_trips() {
    let pair = allocate().unwrap();
    let flags = |fd| unsafe { libc::fcntl(fd, libc::F_GETFL) };
    pair.set_nonblocking(true).unwrap();
    assert_ne!(flags(pair.master_fd()) & libc::O_NONBLOCK, 0);
    pair.set_nonblocking(false).unwrap();
    assert_eq!(flags(pair.master_fd()) & libc::O_NONBLOCK, 0);
  }
}
