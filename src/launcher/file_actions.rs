// src/launcher/file_actions.rs

//! The descriptor plan applied in the child before the program image runs.

use std::ffi::CString;
use std::os::fd::RawFd;

use log::trace;

use crate::error::{Error, Result};
use crate::platform;
use crate::pty::PtyPair;

/// First descriptor that is not one of the standard streams.
pub const FIRST_NON_STDIO_FD: RawFd = 3;

/// One step of the child's descriptor setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileAction {
  Dup2 { from: RawFd, to: RawFd },
  Close(RawFd),
  /// Close every descriptor at or above this one.
  CloseFrom(RawFd),
  Chdir(CString),
}

/// The ordered actions for one spawn, plus the descriptor table limit the
/// `CloseFrom` step scans up to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileActions {
  actions: Vec<FileAction>,
  table_limit: RawFd,
}

impl FileActions {
  /// Builds the plan that wires the slave of `pair` to the standard streams.
  ///
  /// # Arguments
  ///
  /// * `pair` - The PTY pair; its slave must still be open.
  /// * `working_directory` - Directory to change into last, already expanded.
  ///
  /// # Errors
  ///
  /// Returns `Error::InvalidRequest` if the slave was already released.
  pub fn prepare(pair: &PtyPair, working_directory: Option<CString>) -> Result<Self> {
    let slave = pair
      .slave_fd()
      .ok_or_else(|| Error::InvalidRequest("PTY slave was already handed to a child".to_string()))?;
    Ok(Self::from_descriptors(pair.master_fd(), slave, working_directory))
  }

  pub(crate) fn from_descriptors(master: RawFd, slave: RawFd, working_directory: Option<CString>) -> Self {
    let mut actions = Vec::with_capacity(7);
    for target in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
      actions.push(FileAction::Dup2 { from: slave, to: target });
    }
    // A descriptor at 0..=2 was just replaced by the slave copy.
    if master >= FIRST_NON_STDIO_FD {
      actions.push(FileAction::Close(master));
    }
    if slave >= FIRST_NON_STDIO_FD && slave != master {
      actions.push(FileAction::Close(slave));
    }
    actions.push(FileAction::CloseFrom(FIRST_NON_STDIO_FD));
    if let Some(dir) = working_directory {
      actions.push(FileAction::Chdir(dir));
    }
    trace!("Prepared {} file actions for slave fd {}", actions.len(), slave);

    FileActions {
      actions,
      table_limit: platform::descriptor_table_size(),
    }
  }

  pub fn actions(&self) -> &[FileAction] {
    &self.actions
  }

  pub fn table_limit(&self) -> RawFd {
    self.table_limit
  }

  /// Whether the slave already sits on one of the standard streams, so one
  /// `Dup2` targets its own descriptor and must clear close-on-exec instead.
  pub fn dups_in_place(&self) -> bool {
    self
      .actions
      .iter()
      .any(|action| matches!(action, FileAction::Dup2 { from, to } if from == to))
  }

  pub fn working_directory(&self) -> Option<&CString> {
    self.actions.iter().find_map(|action| match action {
      FileAction::Chdir(dir) => Some(dir),
      _ => None,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn standard_streams_come_first_then_closes() {
    let plan = FileActions::from_descriptors(5, 6, None);
    assert_eq!(
      plan.actions(),
      &[
        FileAction::Dup2 { from: 6, to: 0 },
        FileAction::Dup2 { from: 6, to: 1 },
        FileAction::Dup2 { from: 6, to: 2 },
        FileAction::Close(5),
        FileAction::Close(6),
        FileAction::CloseFrom(3),
      ]
    );
    assert!(plan.working_directory().is_none());
    assert!(plan.table_limit() > 2);
  }

  #[test]
  fn low_descriptors_are_not_closed_after_dup2() {
    let plan = FileActions::from_descriptors(0, 2, None);
    assert!(!plan
      .actions()
      .iter()
      .any(|action| matches!(action, FileAction::Close(_))));
    assert!(plan.dups_in_place());
    assert!(!FileActions::from_descriptors(5, 6, None).dups_in_place());
  }

  #[test]
  fn chdir_is_the_last_step() {
    let dir = CString::new("/tmp").unwrap();
    let plan = FileActions::from_descriptors(7, 8, Some(dir.clone()));
    assert_eq!(plan.actions().last(), Some(&FileAction::Chdir(dir.clone())));
    assert_eq!(plan.working_directory(), Some(&dir));
  }
}
