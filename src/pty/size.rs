// src/pty/size.rs

use std::os::fd::{AsRawFd, BorrowedFd};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::errno;
use crate::error::{Error, Result};
use crate::platform;

/// Terminal dimensions in character cells, with optional pixel extents.
///
/// Laid out exactly like the kernel's `struct winsize`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSize {
  pub rows: u16,
  pub columns: u16,
  pub pixel_width: u16,
  pub pixel_height: u16,
}

const _: () = assert!(std::mem::size_of::<WindowSize>() == std::mem::size_of::<libc::winsize>());

impl Default for WindowSize {
  fn default() -> Self {
    WindowSize::new(24, 80)
  }
}

impl WindowSize {
  pub const fn new(rows: u16, columns: u16) -> Self {
    WindowSize {
      rows,
      columns,
      pixel_width: 0,
      pixel_height: 0,
    }
  }

  pub fn with_pixels(mut self, pixel_width: u16, pixel_height: u16) -> Self {
    self.pixel_width = pixel_width;
    self.pixel_height = pixel_height;
    self
  }

  pub fn to_winsize(self) -> libc::winsize {
    libc::winsize {
      ws_row: self.rows,
      ws_col: self.columns,
      ws_xpixel: self.pixel_width,
      ws_ypixel: self.pixel_height,
    }
  }
}

impl From<libc::winsize> for WindowSize {
  fn from(ws: libc::winsize) -> Self {
    WindowSize {
      rows: ws.ws_row,
      columns: ws.ws_col,
      pixel_width: ws.ws_xpixel,
      pixel_height: ws.ws_ypixel,
    }
  }
}

/// Informs the terminal behind `fd` of new dimensions.
///
/// The kernel delivers `SIGWINCH` to the foreground process group of the
/// slave. Setting the same size twice is harmless.
pub fn resize(fd: BorrowedFd<'_>, size: WindowSize) -> Result<()> {
  resize_with(fd, size, |fd, ws| unsafe {
    libc::ioctl(fd.as_raw_fd(), platform::TIOCSWINSZ, ws as *const libc::winsize)
  })
}

/// Current dimensions of the terminal behind `fd`.
pub fn window_size(fd: BorrowedFd<'_>) -> Result<WindowSize> {
  window_size_with(fd, |fd, ws| unsafe {
    libc::ioctl(fd.as_raw_fd(), platform::TIOCGWINSZ, ws as *mut libc::winsize)
  })
}

pub(crate) fn resize_with<F>(fd: BorrowedFd<'_>, size: WindowSize, mut ioctl: F) -> Result<()>
where
  F: FnMut(BorrowedFd<'_>, &libc::winsize) -> libc::c_int,
{
  let ws = size.to_winsize();
  errno::retry_immediately(|| errno::check("ioctl(TIOCSWINSZ)", ioctl(fd, &ws))).map_err(|e| {
    debug!("Resize of fd {} to {}x{} failed: {}", fd.as_raw_fd(), size.columns, size.rows, e);
    Error::Io(e)
  })?;
  debug!("Resized fd {} to {}x{}", fd.as_raw_fd(), size.columns, size.rows);
  Ok(())
}

pub(crate) fn window_size_with<F>(fd: BorrowedFd<'_>, mut ioctl: F) -> Result<WindowSize>
where
  F: FnMut(BorrowedFd<'_>, &mut libc::winsize) -> libc::c_int,
{
  let mut ws = WindowSize::default().to_winsize();
  errno::retry_immediately(|| errno::check("ioctl(TIOCGWINSZ)", ioctl(fd, &mut ws))).map_err(Error::Io)?;
  Ok(WindowSize::from(ws))
}
