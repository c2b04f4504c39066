// src/session.rs

use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};
use nix::sys::signal::Signal;

use crate::errno::NativeError;
use crate::error::{Error, Result};
use crate::launcher::{ChildProcess, ExitStatus, Launcher, SpawnRequest};
use crate::pty::{self, io as pty_io, size, WindowSize};
use crate::reader::OutputReader;

/// A child running on a PTY, together with the master that drives it.
///
/// After [`PtySession::close`], reads report end of stream and writes or
/// resizes fail with `EBADF`.
#[derive(Debug)]
pub struct PtySession {
  master: Option<Arc<OwnedFd>>,
  slave_path: PathBuf,
  child: ChildProcess,
  read_chunk_size: usize,
}

impl PtySession {
  /// Allocates a PTY, applies the configured initial size, and spawns
  /// `request` on it.
  pub fn open(launcher: &Launcher, request: &SpawnRequest) -> Result<Self> {
    let mut pair = pty::allocate()?;
    pair.resize(launcher.config().initial_size)?;
    let child = launcher.spawn(request, &mut pair)?;
    let slave_path = pair.slave_path().to_path_buf();
    info!("Opened session for pid {} on {}", child.pid(), slave_path.display());
    Ok(PtySession {
      master: Some(pair.into_shared_master()),
      slave_path,
      child,
      read_chunk_size: launcher.config().read_chunk_size,
    })
  }

  fn live_master(&self) -> Result<BorrowedFd<'_>> {
    self
      .master
      .as_ref()
      .map(|fd| fd.as_fd())
      .ok_or_else(|| Error::Io(NativeError::from_errno("master", libc::EBADF)))
  }

  pub fn master(&self) -> Option<BorrowedFd<'_>> {
    self.master.as_ref().map(|fd| fd.as_fd())
  }

  pub fn slave_path(&self) -> &Path {
    &self.slave_path
  }

  pub fn child(&self) -> &ChildProcess {
    &self.child
  }

  pub fn child_mut(&mut self) -> &mut ChildProcess {
    &mut self.child
  }

  pub fn is_closed(&self) -> bool {
    self.master.is_none()
  }

  /// Reads child output; `Ok(0)` at end of stream or after `close`.
  pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
    match &self.master {
      Some(master) => pty_io::read(master.as_fd(), buf),
      None => Ok(0),
    }
  }

  pub fn write(&self, buf: &[u8]) -> Result<usize> {
    pty_io::write(self.live_master()?, buf)
  }

  pub fn write_all(&self, buf: &[u8]) -> Result<()> {
    pty_io::write_all(self.live_master()?, buf)
  }

  pub fn resize(&self, size: WindowSize) -> Result<()> {
    size::resize(self.live_master()?, size)
  }

  pub fn window_size(&self) -> Result<WindowSize> {
    size::window_size(self.live_master()?)
  }

  /// Starts a reader thread on a duplicate of the master.
  pub fn spawn_reader(&self) -> Result<OutputReader> {
    let master = self
      .live_master()?
      .try_clone_to_owned()
      .map_err(|e| Error::Io(NativeError::from_io("fcntl(F_DUPFD_CLOEXEC)", &e)))?;
    OutputReader::spawn(master, self.read_chunk_size, &self.child.pid().to_string())
  }

  pub fn terminate(&self, signal: Signal) -> Result<()> {
    self.child.signal(signal)
  }

  pub fn wait(&mut self) -> Result<ExitStatus> {
    self.child.wait()
  }

  pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
    self.child.try_wait()
  }

  /// Closes the master. The child sees a hangup on its terminal, and
  /// resizes through [`PtySession::child`] fail from here on.
  pub fn close(&mut self) {
    if self.master.take().is_some() {
      debug!("Closed master of session for pid {}", self.child.pid());
    }
  }
}
