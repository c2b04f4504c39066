// src/config.rs

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pty::WindowSize;

pub const STRATEGY_ENV: &str = "PTY_LAUNCHER_STRATEGY";
pub const TERM_ENV: &str = "PTY_LAUNCHER_TERM";
pub const SHELL_ENV: &str = "PTY_LAUNCHER_SHELL";

/// Which process-creation strategy the launcher may pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyPreference {
  /// posix_spawn unless the request needs fork/exec.
  #[default]
  Auto,
  /// Always fork/exec.
  ForkExec,
}

impl FromStr for StrategyPreference {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_ascii_lowercase().as_str() {
      "auto" | "posix_spawn" => Ok(StrategyPreference::Auto),
      "fork_exec" | "fork" => Ok(StrategyPreference::ForkExec),
      other => Err(Error::Config(format!("unknown spawn strategy `{}`", other))),
    }
  }
}

/// Launcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
  pub strategy: StrategyPreference,
  /// `TERM` given to children whose environment lacks one.
  pub term: String,
  /// Size applied to a new session before its child starts.
  pub initial_size: WindowSize,
  /// Shell for [`crate::SpawnRequest::shell`]; the user's shell when unset.
  pub default_shell: Option<PathBuf>,
  pub read_chunk_size: usize,
}

impl Default for LauncherConfig {
  fn default() -> Self {
    LauncherConfig {
      strategy: StrategyPreference::Auto,
      term: "xterm-256color".to_string(),
      initial_size: WindowSize::default(),
      default_shell: None,
      read_chunk_size: 4096,
    }
  }
}

impl LauncherConfig {
  /// Defaults with `PTY_LAUNCHER_*` overrides from the environment.
  pub fn from_env() -> Result<Self> {
    LauncherConfig::default().with_env_overrides()
  }

  pub fn with_env_overrides(self) -> Result<Self> {
    self.apply_overrides(|key| env::var(key).ok())
  }

  pub fn from_json(json: &str) -> Result<Self> {
    let config: LauncherConfig =
      serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
    config.validate()
  }

  pub fn to_json(&self) -> Result<String> {
    serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
  }

  fn apply_overrides<F>(mut self, lookup: F) -> Result<Self>
  where
    F: Fn(&str) -> Option<String>,
  {
    if let Some(strategy) = lookup(STRATEGY_ENV) {
      self.strategy = strategy.parse()?;
      debug!("{} set strategy to {:?}", STRATEGY_ENV, self.strategy);
    }
    if let Some(term) = lookup(TERM_ENV) {
      self.term = term;
    }
    if let Some(shell) = lookup(SHELL_ENV) {
      if shell.is_empty() {
        warn!("Ignoring empty {}", SHELL_ENV);
      } else {
        self.default_shell = Some(PathBuf::from(shell));
      }
    }
    self.validate()
  }

  fn validate(self) -> Result<Self> {
    if self.read_chunk_size == 0 {
      return Err(Error::Config("read_chunk_size must be positive".to_string()));
    }
    Ok(self)
  }
}
