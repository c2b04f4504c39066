// src/launcher/mod.rs

//! Process creation on the slave side of a PTY.
//!
//! Two strategies are available. `posix_spawn` is preferred; fork/exec is
//! used whenever the child must become a session leader with the slave as
//! its controlling terminal, because that step cannot be expressed as a
//! spawn attribute. Everything the child needs (program path, argv, envp,
//! the working directory) is converted to C strings before either strategy
//! starts.

pub mod child;
pub mod file_actions;
mod fork_exec;
mod posix_spawn;

use std::env;
use std::ffi::{CString, OsStr, OsString};
use std::fmt;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};
use std::ptr;

use log::{debug, error, info, warn};

use crate::config::{LauncherConfig, StrategyPreference};
use crate::errno::NativeError;
use crate::error::{Error, Result};
use crate::path;
use crate::platform;
use crate::pty::PtyPair;

pub use child::{ChildProcess, ExitStatus, LifecycleState};
pub use file_actions::{FileAction, FileActions};

/// How a child process gets created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpawnStrategy {
  PosixSpawn,
  ForkExec,
}

impl fmt::Display for SpawnStrategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SpawnStrategy::PosixSpawn => f.write_str("posix_spawn"),
      SpawnStrategy::ForkExec => f.write_str("fork/exec"),
    }
  }
}

/// What to run and in what surroundings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
  program: PathBuf,
  args: Vec<OsString>,
  inherit_environment: bool,
  env: Vec<(OsString, OsString)>,
  working_directory: Option<PathBuf>,
  controlling_terminal: bool,
}

impl SpawnRequest {
  /// A request for `program` with no arguments, the parent's environment,
  /// and the slave as controlling terminal.
  pub fn new(program: impl AsRef<Path>) -> Self {
    SpawnRequest {
      program: program.as_ref().to_path_buf(),
      args: Vec::new(),
      inherit_environment: true,
      env: Vec::new(),
      working_directory: None,
      controlling_terminal: true,
    }
  }

  /// A login shell: the configured one, else the user's.
  pub fn shell(config: &LauncherConfig) -> Self {
    let shell = config
      .default_shell
      .clone()
      .unwrap_or_else(path::default_shell);
    SpawnRequest::new(shell).arg("-l")
  }

  pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
    self.args.push(arg.as_ref().to_os_string());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
  {
    self
      .args
      .extend(args.into_iter().map(|arg| arg.as_ref().to_os_string()));
    self
  }

  /// Sets or overrides one environment variable.
  pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
    let key = key.as_ref().to_os_string();
    self.env.retain(|(existing, _)| *existing != key);
    self.env.push((key, value.as_ref().to_os_string()));
    self
  }

  /// Starts from an empty environment instead of the parent's.
  pub fn env_clear(mut self) -> Self {
    self.inherit_environment = false;
    self.env.clear();
    self
  }

  pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
    self.working_directory = Some(dir.as_ref().to_path_buf());
    self
  }

  /// Whether the child becomes a session leader owning the slave as its
  /// controlling terminal. Defaults to `true`.
  pub fn controlling_terminal(mut self, enabled: bool) -> Self {
    self.controlling_terminal = enabled;
    self
  }

  pub fn program(&self) -> &Path {
    &self.program
  }

  pub fn get_args(&self) -> &[OsString] {
    &self.args
  }

  pub fn working_directory(&self) -> Option<&Path> {
    self.working_directory.as_deref()
  }

  pub fn wants_controlling_terminal(&self) -> bool {
    self.controlling_terminal
  }
}

/// Creates children on PTY slaves according to a [`LauncherConfig`].
#[derive(Debug, Clone, Default)]
pub struct Launcher {
  config: LauncherConfig,
}

impl Launcher {
  pub fn new(config: LauncherConfig) -> Self {
    Launcher { config }
  }

  pub fn config(&self) -> &LauncherConfig {
    &self.config
  }

  /// The strategy [`Launcher::spawn`] would use for `request`.
  pub fn strategy_for(&self, request: &SpawnRequest) -> SpawnStrategy {
    if self.config.strategy == StrategyPreference::ForkExec || request.controlling_terminal {
      return SpawnStrategy::ForkExec;
    }
    if request.working_directory.is_some() && !posix_spawn::supports_chdir() {
      warn!("posix_spawn cannot change directory on this system, using fork/exec");
      return SpawnStrategy::ForkExec;
    }
    SpawnStrategy::PosixSpawn
  }

  /// [`Launcher::strategy_for`], refined by the descriptor plan.
  ///
  /// A `posix_spawn` dup2 of a descriptor onto itself may leave it
  /// close-on-exec, so a slave on 0..=2 goes through fork/exec.
  pub(crate) fn strategy_with(&self, request: &SpawnRequest, actions: &FileActions) -> SpawnStrategy {
    let strategy = self.strategy_for(request);
    if strategy == SpawnStrategy::PosixSpawn && actions.dups_in_place() {
      debug!("Slave is already a standard stream, using fork/exec");
      return SpawnStrategy::ForkExec;
    }
    strategy
  }

  /// Starts `request` with its standard streams on the slave of `pair`.
  ///
  /// On success the parent's copy of the slave is closed and the returned
  /// child records the master descriptor. On failure the pair is left as it
  /// was and every descriptor opened for the attempt has been closed.
  ///
  /// # Errors
  ///
  /// * `Error::InvalidRequest` for NUL bytes, an empty program, or a bad
  ///   working directory expansion.
  /// * `Error::SpawnFailed` for a program that cannot be found or executed,
  ///   carrying the failing step and its errno.
  pub fn spawn(&self, request: &SpawnRequest, pair: &mut PtyPair) -> Result<ChildProcess> {
    let mut state = LifecycleState::Idle;
    let plan = LaunchPlan::build(request, &self.config)?;
    let actions = FileActions::prepare(pair, plan.working_directory.clone())?;
    child::advance(&mut state, LifecycleState::FileActionsPrepared);

    let strategy = self.strategy_with(request, &actions);
    child::advance(&mut state, LifecycleState::Spawning);
    debug!("Spawning via {} on {}: {:?}", strategy, pair.slave_path().display(), plan);

    let spawned = match strategy {
      SpawnStrategy::PosixSpawn => posix_spawn::spawn(&plan, &actions),
      SpawnStrategy::ForkExec => fork_exec::spawn(&plan, &actions, request.controlling_terminal),
    };
    let pid = spawned.map_err(|e| {
      error!("Failed to spawn {}: {}", request.program.display(), e);
      e
    })?;

    child::advance(&mut state, LifecycleState::Spawned);
    pair.release_slave();
    info!("Spawned {} as pid {}", request.program.display(), pid);
    Ok(ChildProcess::new(pid, pair.downgrade_master(), strategy, state))
  }
}

/// C-ready form of a [`SpawnRequest`].
///
/// The pointer vectors point into the owned `CString`s, whose heap buffers
/// do not move when the vectors holding them do.
pub(crate) struct LaunchPlan {
  program: CString,
  argv_storage: Vec<CString>,
  argv_ptrs: Vec<*const libc::c_char>,
  envp_storage: Vec<CString>,
  envp_ptrs: Vec<*const libc::c_char>,
  working_directory: Option<CString>,
}

impl LaunchPlan {
  pub(crate) fn build(request: &SpawnRequest, config: &LauncherConfig) -> Result<Self> {
    if request.program.as_os_str().is_empty() {
      return Err(Error::InvalidRequest("program is empty".to_string()));
    }

    let environment = build_environment(request, config);
    let program = resolve_program(&request.program, &environment)?;

    let mut argv = Vec::with_capacity(request.args.len() + 1);
    argv.push(c_string(request.program.as_os_str(), "program")?);
    for arg in &request.args {
      argv.push(c_string(arg, "argument")?);
    }

    let mut envp = Vec::with_capacity(environment.len());
    for (key, value) in &environment {
      if key.is_empty() || key.as_bytes().contains(&b'=') {
        return Err(Error::InvalidRequest(format!(
          "invalid environment variable name {:?}",
          key
        )));
      }
      let mut entry = key.clone().into_vec();
      entry.push(b'=');
      entry.extend_from_slice(value.as_bytes());
      envp.push(c_string(OsStr::from_bytes(&entry), "environment entry")?);
    }

    let working_directory = match &request.working_directory {
      Some(dir) => {
        let raw = dir
          .to_str()
          .ok_or_else(|| Error::InvalidRequest(format!("working directory {:?} is not UTF-8", dir)))?;
        let expanded = path::expand_path(raw)?;
        Some(c_string(expanded.as_os_str(), "working directory")?)
      }
      None => None,
    };

    Ok(LaunchPlan {
      program: c_string(program.as_os_str(), "program")?,
      argv_ptrs: null_terminated(&argv),
      argv_storage: argv,
      envp_ptrs: null_terminated(&envp),
      envp_storage: envp,
      working_directory,
    })
  }

  pub(crate) fn program(&self) -> &CString {
    &self.program
  }

  pub(crate) fn argv(&self) -> *const *const libc::c_char {
    self.argv_ptrs.as_ptr()
  }

  pub(crate) fn envp(&self) -> *const *const libc::c_char {
    self.envp_ptrs.as_ptr()
  }

  #[cfg(test)]
  fn argv_strings(&self) -> &[CString] {
    &self.argv_storage
  }

  #[cfg(test)]
  fn envp_strings(&self) -> &[CString] {
    &self.envp_storage
  }
}

impl fmt::Debug for LaunchPlan {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LaunchPlan")
      .field("program", &self.program)
      .field("argv", &self.argv_storage)
      .field("env_entries", &self.envp_storage.len())
      .field("working_directory", &self.working_directory)
      .finish()
  }
}

fn c_string(value: &OsStr, what: &str) -> Result<CString> {
  CString::new(value.as_bytes())
    .map_err(|_| Error::InvalidRequest(format!("{} {:?} contains a NUL byte", what, value)))
}

fn null_terminated(strings: &[CString]) -> Vec<*const libc::c_char> {
  strings
    .iter()
    .map(|s| s.as_ptr())
    .chain(std::iter::once(ptr::null()))
    .collect()
}

/// Parent snapshot (unless cleared), then request overrides, then `TERM`.
fn build_environment(request: &SpawnRequest, config: &LauncherConfig) -> Vec<(OsString, OsString)> {
  let mut environment: Vec<(OsString, OsString)> = if request.inherit_environment {
    env::vars_os().collect()
  } else {
    Vec::new()
  };
  for (key, value) in &request.env {
    match environment.iter_mut().find(|(existing, _)| existing == key) {
      Some(entry) => entry.1 = value.clone(),
      None => environment.push((key.clone(), value.clone())),
    }
  }
  if !config.term.is_empty() && !environment.iter().any(|(key, _)| key == "TERM") {
    environment.push((OsString::from("TERM"), OsString::from(&config.term)));
  }
  environment
}

/// A program with a `/` is used as given; a bare name is searched in the
/// child's `PATH`, falling back to the parent's.
fn resolve_program(program: &Path, environment: &[(OsString, OsString)]) -> Result<PathBuf> {
  if program.as_os_str().as_bytes().contains(&b'/') {
    return Ok(program.to_path_buf());
  }
  let search_path = environment
    .iter()
    .find(|(key, _)| key == "PATH")
    .map(|(_, value)| value.as_os_str());
  path::locate_program(program.as_os_str(), search_path).ok_or_else(|| {
    debug!("{} not found on PATH", program.display());
    Error::SpawnFailed(NativeError::from_errno("execve", platform::ENOENT))
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;

  fn plan_for(request: &SpawnRequest) -> LaunchPlan {
    LaunchPlan::build(request, &LauncherConfig::default()).unwrap()
  }

  fn env_entries(plan: &LaunchPlan) -> Vec<String> {
    plan
      .envp_strings()
      .iter()
      .map(|entry| entry.to_string_lossy().into_owned())
      .collect()
  }

  #[test]
  fn argv_keeps_the_program_as_given() {
    let request = SpawnRequest::new("sh").args(["-c", "true"]);
    let plan = plan_for(&request);
    let argv: Vec<_> = plan.argv_strings().iter().map(|s| s.to_str().unwrap()).collect();
    assert_eq!(argv, ["sh", "-c", "true"]);
    assert!(plan.program().to_str().unwrap().ends_with("/sh"));
    assert_eq!(plan.argv_ptrs.len(), 4);
    assert!(plan.argv_ptrs[3].is_null());
    assert!(plan.envp_ptrs.last().unwrap().is_null());
  }

  #[test]
  fn unknown_bare_name_is_enoent_before_anything_opens() {
    let request = SpawnRequest::new("pty-launcher-no-such-program");
    let err = LaunchPlan::build(&request, &LauncherConfig::default())
      .err()
      .unwrap();
    assert!(matches!(err, Error::SpawnFailed(_)));
    assert!(err.is_not_found());
  }

  #[test]
  fn nul_bytes_are_rejected() {
    let request = SpawnRequest::new("/bin/echo").arg("a\0b");
    let err = LaunchPlan::build(&request, &LauncherConfig::default())
      .err()
      .unwrap();
    assert!(matches!(err, Error::InvalidRequest(_)));

    let err = LaunchPlan::build(&SpawnRequest::new(""), &LauncherConfig::default())
      .err()
      .unwrap();
    assert!(matches!(err, Error::InvalidRequest(_)));
  }

  #[test]
  fn overrides_replace_inherited_values_and_term_is_injected() {
    let request = SpawnRequest::new("/bin/true")
      .env_clear()
      .env("FOO", "1")
      .env("FOO", "2")
      .env("PATH", "/usr/bin:/bin");
    let entries = env_entries(&plan_for(&request));
    assert_eq!(entries, ["FOO=2", "PATH=/usr/bin:/bin", "TERM=xterm-256color"]);
  }

  #[test]
  fn explicit_term_wins_over_configuration() {
    let request = SpawnRequest::new("/bin/true").env_clear().env("TERM", "dumb");
    let entries = env_entries(&plan_for(&request));
    assert_eq!(entries, ["TERM=dumb"]);
  }

  #[test]
  #[serial]
  fn controlling_terminal_forces_fork_exec() {
    let launcher = Launcher::default();
    let request = SpawnRequest::new("/bin/true");
    assert_eq!(launcher.strategy_for(&request), SpawnStrategy::ForkExec);

    let config = LauncherConfig {
      strategy: StrategyPreference::ForkExec,
      ..LauncherConfig::default()
    };
    let request = request.controlling_terminal(false);
    assert_eq!(Launcher::new(config).strategy_for(&request), SpawnStrategy::ForkExec);
    assert_eq!(launcher.strategy_for(&request), SpawnStrategy::PosixSpawn);
  }

  #[test]
  #[serial]
  fn slave_on_a_standard_stream_goes_through_fork_exec() {
    let launcher = Launcher::default();
    let request = SpawnRequest::new("/bin/true").controlling_terminal(false);

    let high = FileActions::from_descriptors(5, 6, None);
    assert_eq!(launcher.strategy_with(&request, &high), SpawnStrategy::PosixSpawn);

    let stdin_slave = FileActions::from_descriptors(5, 0, None);
    assert_eq!(launcher.strategy_with(&request, &stdin_slave), SpawnStrategy::ForkExec);
  }

  #[test]
  fn shell_request_uses_configured_shell() {
    let config = LauncherConfig {
      default_shell: Some(PathBuf::from("/bin/sh")),
      ..LauncherConfig::default()
    };
    let request = SpawnRequest::shell(&config);
    assert_eq!(request.program(), Path::new("/bin/sh"));
    assert_eq!(request.get_args(), [OsString::from("-l")]);
  }
}
