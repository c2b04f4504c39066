// src/utils/logging.rs

use env_logger::{Builder, Env};

/// Environment variable holding the log filter, e.g. `debug` or
/// `pty_launcher::launcher=trace`.
pub const LOG_ENV: &str = "PTY_LAUNCHER_LOG";

/// Installs `env_logger` as the global logger.
///
/// The level defaults to `info` and follows `PTY_LAUNCHER_LOG` when set.
/// Calling this more than once is harmless; later calls leave the first
/// logger in place.
///
/// # Examples
///
/// ```rust
/// pty_launcher::utils::logging::initialize_logging();
/// log::info!("Logging has been initialized.");
/// ```
pub fn initialize_logging() {
  let env = Env::default().filter_or(LOG_ENV, "info");
  if Builder::from_env(env).try_init().is_ok() {
    log::debug!("Logging initialized");
  }
}

/// Logger for tests: output is captured by the test harness.
pub fn initialize_test_logging() {
  let env = Env::default().filter_or(LOG_ENV, "debug");
  let _ = Builder::from_env(env).is_test(true).try_init();
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn repeated_initialization_is_harmless() {
    initialize_test_logging();
    initialize_logging();
    initialize_logging();
    log::info!("still logging");
  }
}
