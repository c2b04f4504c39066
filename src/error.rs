// src/error.rs

use thiserror::Error;

use crate::errno::NativeError;
use crate::platform;

/// Errors produced while allocating, spawning, or driving a PTY session.
///
/// Every variant that wraps a [`NativeError`] carries the failing operation
/// and its errno. Retryable errno values are handled where they occur and
/// never reach this type.
#[derive(Debug, Error)]
pub enum Error {
  /// The runtime library was opened but does not export `symbol`.
  #[error("symbol `{symbol}` is not exported by {library}")]
  SymbolResolution {
    symbol: String,
    library: &'static str,
  },

  /// The platform runtime library could not be opened at all.
  #[error("runtime library {library} could not be opened: {reason}")]
  LibraryUnavailable {
    library: &'static str,
    reason: String,
  },

  /// No free master/slave pair, or the slave device could not be reached.
  #[error("no pseudo-terminal available: {0}")]
  DeviceUnavailable(#[source] NativeError),

  /// Granting or unlocking the slave device was refused.
  #[error("pseudo-terminal permission denied: {0}")]
  PermissionDenied(#[source] NativeError),

  /// Process creation failed, including exec failures reported after fork.
  #[error("spawn failed: {0}")]
  SpawnFailed(#[source] NativeError),

  /// Read, write, or ioctl failure on a PTY descriptor.
  ///
  /// A resize against a descriptor whose child already exited lands here;
  /// callers are expected to log it rather than abort.
  #[error("PTY I/O error: {0}")]
  Io(#[source] NativeError),

  /// The spawn request cannot be turned into C strings or paths.
  #[error("invalid spawn request: {0}")]
  InvalidRequest(String),

  /// Launcher configuration could not be parsed.
  #[error("invalid launcher configuration: {0}")]
  Config(String),
}

impl Error {
  /// The native failure behind this error, if there is one.
  pub fn native(&self) -> Option<&NativeError> {
    match self {
      Error::DeviceUnavailable(e)
      | Error::PermissionDenied(e)
      | Error::SpawnFailed(e)
      | Error::Io(e) => Some(e),
      _ => None,
    }
  }

  pub fn errno(&self) -> Option<i32> {
    self.native().map(NativeError::errno)
  }

  /// True when the attached errno is "no such entry".
  pub fn is_not_found(&self) -> bool {
    self.errno() == Some(platform::ENOENT)
  }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
