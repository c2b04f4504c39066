// src/platform/mod.rs

// Per-target constants and the few calls whose shape differs between kernels.
#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
compile_error!("pty-launcher supports Linux and macOS targets only");

#[cfg(target_os = "linux")]
pub use linux::*;

#[cfg(target_os = "macos")]
pub use macos::*;

use std::os::fd::RawFd;

/// Upper bound on descriptors scanned when the table limit is effectively unlimited.
const DESCRIPTOR_SCAN_CEILING: libc::c_long = 1 << 16;

/// Fallback when `sysconf(_SC_OPEN_MAX)` reports nothing usable.
const DEFAULT_DESCRIPTOR_TABLE_SIZE: RawFd = 1024;

/// The operating-system family, which decides the runtime library and the
/// numeric values of terminal ioctl requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OsFamily {
  Linux,
  Apple,
}

impl OsFamily {
  /// The family this binary was compiled for.
  pub const fn current() -> Self {
    FAMILY
  }

  /// Name of the C runtime that exports the dynamically resolved entry points.
  pub const fn runtime_library(self) -> &'static str {
    match self {
      OsFamily::Linux => "libc.so.6",
      OsFamily::Apple => "/usr/lib/libSystem.B.dylib",
    }
  }
}

/// Size of the process descriptor table, capped so close loops stay bounded.
pub fn descriptor_table_size() -> RawFd {
  let size = unsafe { libc::sysconf(libc::_SC_OPEN_MAX) };
  if size <= 0 {
    DEFAULT_DESCRIPTOR_TABLE_SIZE
  } else {
    size.min(DESCRIPTOR_SCAN_CEILING) as RawFd
  }
}
