// src/path/mod.rs

use std::env;
use std::ffi::OsStr;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use log::{debug, error};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::error::{Error, Result};

/// Search path used when neither the child nor the parent has `PATH`.
const FALLBACK_SEARCH_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

const FALLBACK_SHELLS: [&str; 2] = ["/bin/bash", "/bin/sh"];

static ENV_REFERENCE: Lazy<Regex> = Lazy::new(|| {
  Regex::new(r"\$\{(\w+)\}").unwrap_or_else(|e| panic!("invalid variable pattern: {}", e))
});

/// The current user's home directory.
pub fn home_dir() -> Option<PathBuf> {
  dirs_next::home_dir()
}

/// The shell to start when a request does not name a program.
///
/// `$SHELL` when it names an existing file, then `/bin/bash`, then `/bin/sh`.
pub fn default_shell() -> PathBuf {
  if let Some(shell) = env::var_os("SHELL") {
    let shell = PathBuf::from(shell);
    if shell.is_file() {
      debug!("Default shell from SHELL: {}", shell.display());
      return shell;
    }
    error!("SHELL points to a non-file: {}", shell.display());
  }
  FALLBACK_SHELLS
    .iter()
    .map(PathBuf::from)
    .find(|shell| shell.is_file())
    .unwrap_or_else(|| PathBuf::from("/bin/sh"))
}

/// Expands a leading `~` and every `${VAR}` reference.
///
/// # Arguments
///
/// * `path` - The path to expand.
///
/// # Errors
///
/// Returns `Error::InvalidRequest` if the home directory is unknown or a
/// referenced variable is not set.
pub fn expand_path(path: &str) -> Result<PathBuf> {
  let mut expanded = String::with_capacity(path.len());
  if path == "~" || path.starts_with("~/") {
    let home = home_dir().ok_or_else(|| {
      error!("Home directory not found for tilde expansion");
      Error::InvalidRequest("home directory not found for tilde expansion".to_string())
    })?;
    expanded.push_str(&home.to_string_lossy());
    expanded.push_str(&path[1..]);
  } else {
    expanded.push_str(path);
  }

  let mut missing = None;
  let replaced = ENV_REFERENCE.replace_all(&expanded, |caps: &Captures<'_>| match env::var(&caps[1]) {
    Ok(value) => value,
    Err(_) => {
      missing.get_or_insert_with(|| caps[1].to_string());
      String::new()
    }
  });
  if let Some(var) = missing {
    error!("Environment variable {} is not set", var);
    return Err(Error::InvalidRequest(format!(
      "environment variable `{}` in `{}` is not set",
      var, path
    )));
  }

  debug!("Expanded path {} to {}", path, replaced);
  Ok(PathBuf::from(replaced.into_owned()))
}

/// Finds `program` in `search_path`, or the parent's `PATH` when `None`.
///
/// Only regular files with an execute bit set are considered.
pub fn locate_program(program: &OsStr, search_path: Option<&OsStr>) -> Option<PathBuf> {
  let inherited = env::var_os("PATH");
  let search_path = search_path
    .or(inherited.as_deref())
    .unwrap_or_else(|| OsStr::new(FALLBACK_SEARCH_PATH));
  env::split_paths(search_path)
    .map(|dir| {
      if dir.as_os_str().is_empty() {
        PathBuf::from(".").join(program)
      } else {
        dir.join(program)
      }
    })
    .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
  fs::metadata(path)
    .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;

  #[test]
  #[serial]
  fn expands_tilde_and_variables() {
    env::set_var("PTY_LAUNCHER_TEST_DIR", "projects");
    let home = home_dir().expect("home directory");
    let expanded = expand_path("~/${PTY_LAUNCHER_TEST_DIR}/src").unwrap();
    assert_eq!(expanded, home.join("projects/src"));
    env::remove_var("PTY_LAUNCHER_TEST_DIR");
  }

  #[test]
  fn plain_paths_are_untouched() {
    assert_eq!(expand_path("/tmp/a~b").unwrap(), PathBuf::from("/tmp/a~b"));
  }

  #[test]
  #[serial]
  fn unset_variable_is_rejected() {
    env::remove_var("PTY_LAUNCHER_UNSET_VAR");
    let err = expand_path("/tmp/${PTY_LAUNCHER_UNSET_VAR}").unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)));
    assert!(err.to_string().contains("PTY_LAUNCHER_UNSET_VAR"));
  }

  #[test]
  fn locates_programs_on_the_given_path() {
    let found = locate_program(OsStr::new("sh"), Some(OsStr::new("/nonexistent:/bin"))).unwrap();
    assert_eq!(found, PathBuf::from("/bin/sh"));
    assert!(locate_program(OsStr::new("sh"), Some(OsStr::new("/nonexistent"))).is_none());
  }

  #[test]
  fn non_executable_files_are_skipped() {
    // /etc/passwd exists everywhere and is never executable.
    assert!(locate_program(OsStr::new("passwd"), Some(OsStr::new("/etc"))).is_none());
  }

  #[test]
  fn default_shell_exists() {
    assert!(default_shell().is_file());
  }
}
