// src/launcher/posix_spawn.rs

use std::collections::HashSet;
use std::mem::MaybeUninit;

use log::{debug, warn};
use nix::unistd::Pid;

use super::file_actions::{FileAction, FileActions};
use super::LaunchPlan;
use crate::errno::{self, NativeError};
use crate::error::{Error, Result};
use crate::platform;
use crate::resolver;

type AddChdirNp =
  unsafe extern "C" fn(*mut libc::posix_spawn_file_actions_t, *const libc::c_char) -> libc::c_int;
type AddClosefromNp =
  unsafe extern "C" fn(*mut libc::posix_spawn_file_actions_t, libc::c_int) -> libc::c_int;

const ADDCHDIR_NP: &str = "posix_spawn_file_actions_addchdir_np";
const ADDCLOSEFROM_NP: &str = "posix_spawn_file_actions_addclosefrom_np";

fn lookup<F: Copy>(name: &'static str) -> Option<F> {
  match unsafe { resolver::resolve_optional::<F>(name) } {
    Ok(found) => found,
    Err(e) => {
      warn!("Cannot look up {}: {}", name, e);
      None
    }
  }
}

/// Whether a spawned child can be given a working directory.
pub(crate) fn supports_chdir() -> bool {
  lookup::<AddChdirNp>(ADDCHDIR_NP).is_some()
}

struct SpawnFileActions(libc::posix_spawn_file_actions_t);

impl SpawnFileActions {
  fn new() -> std::result::Result<Self, NativeError> {
    let mut raw = MaybeUninit::uninit();
    errno::check_status("posix_spawn_file_actions_init", unsafe {
      libc::posix_spawn_file_actions_init(raw.as_mut_ptr())
    })?;
    Ok(SpawnFileActions(unsafe { raw.assume_init() }))
  }

  fn as_mut_ptr(&mut self) -> *mut libc::posix_spawn_file_actions_t {
    &mut self.0
  }

  fn as_ptr(&self) -> *const libc::posix_spawn_file_actions_t {
    &self.0
  }
}

impl Drop for SpawnFileActions {
  fn drop(&mut self) {
    unsafe { libc::posix_spawn_file_actions_destroy(&mut self.0) };
  }
}

struct SpawnAttributes(libc::posix_spawnattr_t);

impl SpawnAttributes {
  /// Attributes that clear the signal mask and restore the default
  /// `SIGPIPE` disposition in the child.
  fn new() -> std::result::Result<Self, NativeError> {
    let mut raw = MaybeUninit::uninit();
    errno::check_status("posix_spawnattr_init", unsafe {
      libc::posix_spawnattr_init(raw.as_mut_ptr())
    })?;
    let mut attrs = SpawnAttributes(unsafe { raw.assume_init() });

    unsafe {
      let mut empty = MaybeUninit::<libc::sigset_t>::uninit();
      libc::sigemptyset(empty.as_mut_ptr());
      let empty = empty.assume_init();
      errno::check_status(
        "posix_spawnattr_setsigmask",
        libc::posix_spawnattr_setsigmask(&mut attrs.0, &empty),
      )?;

      let mut defaults = MaybeUninit::<libc::sigset_t>::uninit();
      libc::sigemptyset(defaults.as_mut_ptr());
      let mut defaults = defaults.assume_init();
      libc::sigaddset(&mut defaults, libc::SIGPIPE);
      errno::check_status(
        "posix_spawnattr_setsigdefault",
        libc::posix_spawnattr_setsigdefault(&mut attrs.0, &defaults),
      )?;
    }

    let mut flags = (libc::POSIX_SPAWN_SETSIGMASK | libc::POSIX_SPAWN_SETSIGDEF) as libc::c_short;
    if let Some(cloexec_default) = platform::SPAWN_CLOEXEC_DEFAULT {
      flags |= cloexec_default;
    }
    errno::check_status("posix_spawnattr_setflags", unsafe {
      libc::posix_spawnattr_setflags(&mut attrs.0, flags)
    })?;
    Ok(attrs)
  }

  fn as_ptr(&self) -> *const libc::posix_spawnattr_t {
    &self.0
  }
}

impl Drop for SpawnAttributes {
  fn drop(&mut self) {
    unsafe { libc::posix_spawnattr_destroy(&mut self.0) };
  }
}

/// Starts `plan` with `posix_spawn`.
///
/// The child stays in the caller's session. Both attribute objects are
/// destroyed on every return path.
pub(crate) fn spawn(plan: &LaunchPlan, actions: &FileActions) -> Result<Pid> {
  let mut file_actions = SpawnFileActions::new().map_err(Error::SpawnFailed)?;
  translate(actions, &mut file_actions).map_err(Error::SpawnFailed)?;
  let attrs = SpawnAttributes::new().map_err(Error::SpawnFailed)?;

  let mut pid: libc::pid_t = 0;
  errno::check_status("posix_spawn", unsafe {
    libc::posix_spawn(
      &mut pid,
      plan.program().as_ptr(),
      file_actions.as_ptr(),
      attrs.as_ptr(),
      plan.argv() as *const *mut libc::c_char,
      plan.envp() as *const *mut libc::c_char,
    )
  })
  .map_err(Error::SpawnFailed)?;
  debug!("posix_spawn started pid {}", pid);
  Ok(Pid::from_raw(pid))
}

fn translate(actions: &FileActions, target: &mut SpawnFileActions) -> std::result::Result<(), NativeError> {
  let explicitly_closed: HashSet<_> = actions
    .actions()
    .iter()
    .filter_map(|action| match action {
      FileAction::Close(fd) => Some(*fd),
      _ => None,
    })
    .collect();

  for action in actions.actions() {
    match action {
      FileAction::Dup2 { from, to } => errno::check_status("posix_spawn_file_actions_adddup2", unsafe {
        libc::posix_spawn_file_actions_adddup2(target.as_mut_ptr(), *from, *to)
      })?,
      FileAction::Close(fd) => errno::check_status("posix_spawn_file_actions_addclose", unsafe {
        libc::posix_spawn_file_actions_addclose(target.as_mut_ptr(), *fd)
      })?,
      FileAction::CloseFrom(first) => {
        if platform::SPAWN_CLOEXEC_DEFAULT.is_some() {
          // Covered by the spawn flag.
          continue;
        }
        if let Some(closefrom) = lookup::<AddClosefromNp>(ADDCLOSEFROM_NP) {
          errno::check_status(ADDCLOSEFROM_NP, unsafe { closefrom(target.as_mut_ptr(), *first) })?;
          continue;
        }
        for fd in platform::open_descriptors() {
          if fd >= *first && fd < actions.table_limit() && !explicitly_closed.contains(&fd) {
            errno::check_status("posix_spawn_file_actions_addclose", unsafe {
              libc::posix_spawn_file_actions_addclose(target.as_mut_ptr(), fd)
            })?;
          }
        }
      }
      FileAction::Chdir(dir) => {
        let chdir = lookup::<AddChdirNp>(ADDCHDIR_NP)
          .ok_or_else(|| NativeError::from_errno(ADDCHDIR_NP, libc::ENOSYS))?;
        errno::check_status(ADDCHDIR_NP, unsafe { chdir(target.as_mut_ptr(), dir.as_ptr()) })?;
      }
    }
  }
  Ok(())
}
