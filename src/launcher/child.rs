// src/launcher/child.rs

use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::sync::Weak;

use log::{debug, trace};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use super::SpawnStrategy;
use crate::errno::NativeError;
use crate::error::{Error, Result};
use crate::pty::size::{self, WindowSize};

/// How a child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
  Exited(i32),
  Signaled(Signal),
}

impl ExitStatus {
  pub fn success(&self) -> bool {
    matches!(self, ExitStatus::Exited(0))
  }

  pub fn code(&self) -> Option<i32> {
    match self {
      ExitStatus::Exited(code) => Some(*code),
      ExitStatus::Signaled(_) => None,
    }
  }

  pub fn signal(&self) -> Option<Signal> {
    match self {
      ExitStatus::Signaled(signal) => Some(*signal),
      ExitStatus::Exited(_) => None,
    }
  }
}

/// Where a launch stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Idle,
  FileActionsPrepared,
  Spawning,
  Spawned,
  Exited(ExitStatus),
}

pub(crate) fn advance(state: &mut LifecycleState, next: LifecycleState) {
  trace!("Launch state {:?} -> {:?}", state, next);
  *state = next;
}

/// A spawned child attached to a PTY master.
///
/// The launcher never waits on its own; call [`ChildProcess::wait`] or
/// [`ChildProcess::try_wait`] to reap it. A child dropped unreaped stays a
/// zombie until this process exits.
#[derive(Debug)]
pub struct ChildProcess {
  pid: Pid,
  master: Weak<OwnedFd>,
  master_fd: RawFd,
  strategy: SpawnStrategy,
  state: LifecycleState,
}

impl ChildProcess {
  pub(crate) fn new(pid: Pid, master: Weak<OwnedFd>, strategy: SpawnStrategy, state: LifecycleState) -> Self {
    let master_fd = master.upgrade().map_or(-1, |fd| fd.as_raw_fd());
    ChildProcess {
      pid,
      master,
      master_fd,
      strategy,
      state,
    }
  }

  pub fn pid(&self) -> Pid {
    self.pid
  }

  pub fn id(&self) -> u32 {
    self.pid.as_raw() as u32
  }

  /// Master descriptor number recorded at spawn time. Not owned by the
  /// child, and possibly reused once the master is closed.
  pub fn master_fd(&self) -> RawFd {
    self.master_fd
  }

  pub fn strategy(&self) -> SpawnStrategy {
    self.strategy
  }

  pub fn state(&self) -> LifecycleState {
    self.state
  }

  /// The cached exit status, once reaped.
  pub fn exit_status(&self) -> Option<ExitStatus> {
    match self.state {
      LifecycleState::Exited(status) => Some(status),
      _ => None,
    }
  }

  /// Resizes the terminal the child runs on.
  ///
  /// Fails with `Error::Io` (`EBADF`) once the master has been closed, even
  /// if its descriptor number now belongs to another terminal.
  pub fn resize(&self, size: WindowSize) -> Result<()> {
    let master = self
      .master
      .upgrade()
      .ok_or_else(|| Error::Io(NativeError::from_errno("ioctl(TIOCSWINSZ)", libc::EBADF)))?;
    size::resize(master.as_fd(), size)
  }

  /// Sends `signal` to the child.
  pub fn signal(&self, signal: Signal) -> Result<()> {
    if self.exit_status().is_some() {
      // The pid may already belong to someone else.
      return Err(Error::Io(NativeError::from_errno("kill", libc::ESRCH)));
    }
    debug!("Sending {} to pid {}", signal, self.pid);
    kill(self.pid, signal).map_err(|e| Error::Io(NativeError::from_errno("kill", e as i32)))
  }

  /// Blocks until the child exits.
  pub fn wait(&mut self) -> Result<ExitStatus> {
    if let Some(status) = self.exit_status() {
      return Ok(status);
    }
    loop {
      if let Some(status) = self.reap(None)? {
        return Ok(status);
      }
    }
  }

  /// Reaps the child if it already exited.
  pub fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
    if let Some(status) = self.exit_status() {
      return Ok(Some(status));
    }
    self.reap(Some(WaitPidFlag::WNOHANG))
  }

  fn reap(&mut self, flags: Option<WaitPidFlag>) -> Result<Option<ExitStatus>> {
    let status = loop {
      match waitpid(self.pid, flags) {
        Err(Errno::EINTR) => continue,
        Err(e) => return Err(Error::Io(NativeError::from_errno("waitpid", e as i32))),
        Ok(status) => break status,
      }
    };
    let exit = match status {
      WaitStatus::Exited(_, code) => ExitStatus::Exited(code),
      WaitStatus::Signaled(_, signal, _) => ExitStatus::Signaled(signal),
      // Stopped, continued, or still running.
      _ => return Ok(None),
    };
    debug!("pid {} finished: {:?}", self.pid, exit);
    advance(&mut self.state, LifecycleState::Exited(exit));
    Ok(Some(exit))
  }
}

impl Drop for ChildProcess {
  fn drop(&mut self) {
    if self.exit_status().is_none() {
      debug!("pid {} dropped without being reaped", self.pid);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn exit_status_accessors() {
    let ok = ExitStatus::Exited(0);
    assert!(ok.success());
    assert_eq!(ok.code(), Some(0));
    assert_eq!(ok.signal(), None);

    let killed = ExitStatus::Signaled(Signal::SIGTERM);
    assert!(!killed.success());
    assert_eq!(killed.code(), None);
    assert_eq!(killed.signal(), Some(Signal::SIGTERM));
    assert!(!ExitStatus::Exited(3).success());
  }

  #[test]
  fn advance_moves_the_state() {
    let mut state = LifecycleState::Idle;
    advance(&mut state, LifecycleState::FileActionsPrepared);
    assert_eq!(state, LifecycleState::FileActionsPrepared);
    advance(&mut state, LifecycleState::Exited(ExitStatus::Exited(1)));
    assert_eq!(state, LifecycleState::Exited(ExitStatus::Exited(1)));
  }

  #[test]
  fn resize_without_a_master_is_ebadf() {
    let child = ChildProcess::new(
      Pid::from_raw(i32::MAX),
      Weak::new(),
      SpawnStrategy::PosixSpawn,
      LifecycleState::Exited(ExitStatus::Exited(0)),
    );
    assert_eq!(child.master_fd(), -1);
    let err = child.resize(WindowSize::new(10, 10)).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    assert_eq!(err.errno(), Some(libc::EBADF));
  }
}
