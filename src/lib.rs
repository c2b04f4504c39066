// src/lib.rs

//! Pseudo-terminal allocation and process launching for terminal front ends.
//!
//! ```no_run
//! use pty_launcher::{allocate_pty, spawn, SpawnRequest, WindowSize};
//!
//! let mut pair = allocate_pty()?;
//! let mut child = spawn(&SpawnRequest::new("/bin/echo").arg("hi"), &mut pair)?;
//! pty_launcher::resize(&child, WindowSize::new(40, 120))?;
//! let mut buf = [0u8; 64];
//! let n = pty_launcher::read(pair.master(), &mut buf)?;
//! child.wait()?;
//! # let _ = n;
//! # Ok::<(), pty_launcher::Error>(())
//! ```

pub mod config;
pub mod errno;
pub mod error;
pub mod launcher;
pub mod path;
pub mod platform;
pub mod pty;
pub mod reader;
pub mod resolver;
pub mod session;
pub mod utils;

#[cfg(test)]
mod test;

pub use config::{LauncherConfig, StrategyPreference};
pub use errno::NativeError;
pub use error::{Error, Result};
pub use launcher::{ChildProcess, ExitStatus, Launcher, LifecycleState, SpawnRequest, SpawnStrategy};
pub use nix::sys::signal::Signal;
pub use platform::OsFamily;
pub use pty::io::{read, write, write_all};
pub use pty::{PtyPair, WindowSize};
pub use reader::{OutputReader, ReaderEvent, READER_QUEUE_DEPTH};
pub use session::PtySession;

/// Opens a new PTY master/slave pair.
pub fn allocate_pty() -> Result<PtyPair> {
  pty::allocate()
}

/// Spawns `request` on `pair` with the default launcher configuration.
pub fn spawn(request: &SpawnRequest, pair: &mut PtyPair) -> Result<ChildProcess> {
  Launcher::default().spawn(request, pair)
}

/// Resizes the terminal `child` runs on.
pub fn resize(child: &ChildProcess, size: WindowSize) -> Result<()> {
  child.resize(size)
}

/// Sends `signal` to `child`.
pub fn terminate(child: &ChildProcess, signal: Signal) -> Result<()> {
  child.signal(signal)
}
