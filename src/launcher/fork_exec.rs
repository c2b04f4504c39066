// src/launcher/fork_exec.rs

//! fork/exec with an error pipe.
//!
//! Between `fork` and `execve` the child only issues raw syscalls on data
//! prepared by the parent: no allocation, no locks, no logging. Any failure
//! is written to a close-on-exec pipe as `(stage, errno)` before `_exit(127)`.
//! A successful `execve` closes the pipe, so the parent reads end of stream.

use std::io;
use std::mem::{self, MaybeUninit};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::ptr;

use log::{debug, error};
use nix::unistd::Pid;

use super::file_actions::{FileAction, FileActions};
use super::LaunchPlan;
use crate::errno::{self, NativeError};
use crate::error::{Error, Result};
use crate::platform;

/// Exit code of a child that failed before its program started.
const EXEC_FAILURE_EXIT: libc::c_int = 127;

const REPORT_LEN: usize = 2 * mem::size_of::<i32>();

/// The step the child was on when it failed.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChildStage {
  Setsid = 1,
  ControllingTerminal = 2,
  Dup2 = 3,
  Chdir = 4,
  SignalMask = 5,
  Execve = 6,
}

impl ChildStage {
  pub(crate) fn operation(self) -> &'static str {
    match self {
      ChildStage::Setsid => "setsid",
      ChildStage::ControllingTerminal => "ioctl(TIOCSCTTY)",
      ChildStage::Dup2 => "dup2",
      ChildStage::Chdir => "chdir",
      ChildStage::SignalMask => "sigprocmask",
      ChildStage::Execve => "execve",
    }
  }

  fn from_code(code: i32) -> Option<Self> {
    Some(match code {
      1 => ChildStage::Setsid,
      2 => ChildStage::ControllingTerminal,
      3 => ChildStage::Dup2,
      4 => ChildStage::Chdir,
      5 => ChildStage::SignalMask,
      6 => ChildStage::Execve,
      _ => return None,
    })
  }
}

fn encode_report(stage: ChildStage, errno: i32) -> [u8; REPORT_LEN] {
  let mut report = [0u8; REPORT_LEN];
  report[..4].copy_from_slice(&(stage as i32).to_ne_bytes());
  report[4..].copy_from_slice(&errno.to_ne_bytes());
  report
}

fn decode_report(report: &[u8; REPORT_LEN]) -> NativeError {
  let mut stage = [0u8; 4];
  let mut errno = [0u8; 4];
  stage.copy_from_slice(&report[..4]);
  errno.copy_from_slice(&report[4..]);
  let operation = ChildStage::from_code(i32::from_ne_bytes(stage))
    .map(ChildStage::operation)
    .unwrap_or("exec setup");
  NativeError::from_errno(operation, i32::from_ne_bytes(errno))
}

/// Forks and executes `plan` in the child.
///
/// When `controlling_terminal` is set the child first becomes a session
/// leader and takes the slave (the source of the `Dup2` actions) as its
/// controlling terminal.
pub(crate) fn spawn(plan: &LaunchPlan, actions: &FileActions, controlling_terminal: bool) -> Result<Pid> {
  let slave = actions
    .actions()
    .iter()
    .find_map(|action| match action {
      FileAction::Dup2 { from, .. } => Some(*from),
      _ => None,
    })
    .ok_or_else(|| Error::InvalidRequest("no slave descriptor to attach".to_string()))?;

  let (reader, writer) = platform::cloexec_pipe().map_err(Error::SpawnFailed)?;

  let pid = unsafe { libc::fork() };
  if pid < 0 {
    let err = NativeError::last("fork");
    error!("fork failed: {}", err);
    return Err(Error::SpawnFailed(err));
  }
  if pid == 0 {
    unsafe { exec_child(plan, actions, slave, controlling_terminal, writer.as_raw_fd()) }
  }

  drop(writer);
  debug!("Forked pid {}, waiting for exec", pid);
  match read_report(reader.as_fd()) {
    Ok(None) => Ok(Pid::from_raw(pid)),
    Ok(Some(failure)) => {
      reap(pid);
      Err(Error::SpawnFailed(failure))
    }
    Err(e) => {
      error!("Lost contact with pid {} during exec: {}", pid, e);
      unsafe { libc::kill(pid, libc::SIGKILL) };
      reap(pid);
      Err(Error::SpawnFailed(e))
    }
  }
}

/// `None` when the pipe closed without a report.
fn read_report(fd: BorrowedFd<'_>) -> std::result::Result<Option<NativeError>, NativeError> {
  let mut report = [0u8; REPORT_LEN];
  let mut filled = 0;
  while filled < REPORT_LEN {
    let rest = &mut report[filled..];
    let n = errno::retry_immediately(|| {
      errno::check_len("read(exec pipe)", unsafe {
        libc::read(fd.as_raw_fd(), rest.as_mut_ptr() as *mut libc::c_void, rest.len())
      })
    })?;
    if n == 0 {
      break;
    }
    filled += n;
  }
  match filled {
    0 => Ok(None),
    REPORT_LEN => Ok(Some(decode_report(&report))),
    _ => Err(NativeError::from_errno("read(exec pipe)", platform::EIO)),
  }
}

fn reap(pid: libc::pid_t) {
  let mut status = 0;
  if let Err(e) = errno::retry_interrupted("waitpid", || unsafe { libc::waitpid(pid, &mut status, 0) }) {
    error!("Failed to reap pid {}: {}", pid, e);
  }
}

fn last_errno() -> i32 {
  io::Error::last_os_error().raw_os_error().unwrap_or(platform::EIO)
}

unsafe fn fail(report_fd: RawFd, stage: ChildStage) -> ! {
  let report = encode_report(stage, last_errno());
  libc::write(report_fd, report.as_ptr() as *const libc::c_void, report.len());
  libc::_exit(EXEC_FAILURE_EXIT)
}

unsafe fn exec_child(
  plan: &LaunchPlan,
  actions: &FileActions,
  slave: RawFd,
  controlling_terminal: bool,
  report_fd: RawFd,
) -> ! {
  if controlling_terminal {
    if libc::setsid() < 0 {
      fail(report_fd, ChildStage::Setsid);
    }
    if libc::ioctl(slave, platform::TIOCSCTTY, 0 as libc::c_int) < 0 {
      fail(report_fd, ChildStage::ControllingTerminal);
    }
  }

  for action in actions.actions() {
    match action {
      FileAction::Dup2 { from, to } if from == to => {
        // dup2 onto itself keeps close-on-exec; clear it instead.
        if libc::fcntl(*from, libc::F_SETFD, 0) < 0 {
          fail(report_fd, ChildStage::Dup2);
        }
      }
      FileAction::Dup2 { from, to } => loop {
        if libc::dup2(*from, *to) >= 0 {
          break;
        }
        if last_errno() != platform::EINTR {
          fail(report_fd, ChildStage::Dup2);
        }
      },
      FileAction::Close(fd) => {
        libc::close(*fd);
      }
      FileAction::CloseFrom(first) => {
        platform::close_descriptors_from(*first, actions.table_limit(), report_fd);
      }
      FileAction::Chdir(dir) => {
        if libc::chdir(dir.as_ptr()) < 0 {
          fail(report_fd, ChildStage::Chdir);
        }
      }
    }
  }

  let mut empty = MaybeUninit::<libc::sigset_t>::uninit();
  libc::sigemptyset(empty.as_mut_ptr());
  if libc::sigprocmask(libc::SIG_SETMASK, empty.as_ptr(), ptr::null_mut()) < 0 {
    fail(report_fd, ChildStage::SignalMask);
  }
  libc::signal(libc::SIGPIPE, libc::SIG_DFL);

  libc::execve(plan.program().as_ptr(), plan.argv(), plan.envp());
  fail(report_fd, ChildStage::Execve)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn report_carries_stage_and_errno() {
    let report = encode_report(ChildStage::Chdir, platform::ENOENT);
    let err = decode_report(&report);
    assert_eq!(err.operation(), "chdir");
    assert_eq!(err.errno(), platform::ENOENT);
  }

  #[test]
  fn unknown_stage_still_decodes() {
    let mut report = encode_report(ChildStage::Execve, libc::EACCES);
    report[..4].copy_from_slice(&99i32.to_ne_bytes());
    let err = decode_report(&report);
    assert_eq!(err.operation(), "exec setup");
    assert_eq!(err.errno(), libc::EACCES);
  }

  #[test]
  fn stage_codes_round_trip() {
    for stage in [
      ChildStage::Setsid,
      ChildStage::ControllingTerminal,
      ChildStage::Dup2,
      ChildStage::Chdir,
      ChildStage::SignalMask,
      ChildStage::Execve,
    ] {
      assert_eq!(ChildStage::from_code(stage as i32), Some(stage));
    }
    assert_eq!(ChildStage::from_code(0), None);
  }
}
