// src/reader.rs

//! A dedicated thread that drains a PTY master into a channel.

use std::io;
use std::os::fd::{AsFd, OwnedFd};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use log::{debug, error, trace};

use crate::errno::NativeError;
use crate::error::{Error, Result};
use crate::pty::io as pty_io;

/// Chunks the reader thread may queue before it stops reading.
///
/// A full queue blocks the thread, which leaves further output in the
/// kernel's PTY buffer and in turn blocks the child's writes.
pub const READER_QUEUE_DEPTH: usize = 64;

/// What the reader thread reports.
#[derive(Debug)]
pub enum ReaderEvent {
  Data(Bytes),
  /// End of stream: every slave descriptor is closed.
  Closed,
  Failed(Error),
}

/// Owns the reader thread and the receiving end of its channel.
///
/// The thread exits after sending `Closed` or `Failed`, or once the
/// receiver is gone.
#[derive(Debug)]
pub struct OutputReader {
  events: Receiver<ReaderEvent>,
  handle: Option<JoinHandle<()>>,
}

impl OutputReader {
  /// Starts a thread named `pty-reader-{label}` reading `master` in chunks
  /// of `chunk_size` bytes, at most [`READER_QUEUE_DEPTH`] of them unread.
  pub fn spawn(master: OwnedFd, chunk_size: usize, label: &str) -> Result<Self> {
    let (sender, events) = bounded(READER_QUEUE_DEPTH);
    let name = format!("pty-reader-{}", label);
    let handle = thread::Builder::new()
      .name(name.clone())
      .spawn(move || {
        let mut buf = vec![0u8; chunk_size.max(1)];
        loop {
          let event = match pty_io::read(master.as_fd(), &mut buf) {
            Ok(0) => ReaderEvent::Closed,
            Ok(n) => ReaderEvent::Data(Bytes::copy_from_slice(&buf[..n])),
            Err(e) => {
              error!("{}: read failed: {}", name, e);
              ReaderEvent::Failed(e)
            }
          };
          let last = !matches!(event, ReaderEvent::Data(_));
          if sender.send(event).is_err() {
            trace!("{}: receiver dropped", name);
            break;
          }
          if last {
            debug!("{}: finished", name);
            break;
          }
        }
      })
      .map_err(|e: io::Error| Error::Io(NativeError::from_io("thread spawn", &e)))?;

    Ok(OutputReader {
      events,
      handle: Some(handle),
    })
  }

  pub fn events(&self) -> &Receiver<ReaderEvent> {
    &self.events
  }

  /// Next event, or `None` if nothing arrived within `timeout`.
  pub fn recv_timeout(&self, timeout: Duration) -> Option<ReaderEvent> {
    match self.events.recv_timeout(timeout) {
      Ok(event) => Some(event),
      Err(RecvTimeoutError::Timeout) => None,
      Err(RecvTimeoutError::Disconnected) => Some(ReaderEvent::Closed),
    }
  }

  /// Collects output until end of stream.
  ///
  /// # Errors
  ///
  /// Returns the reader's failure, or `Error::Io` with `ETIMEDOUT` if the
  /// stream is still open after `timeout`.
  pub fn drain_until_closed(&self, timeout: Duration) -> Result<Vec<u8>> {
    let deadline = Instant::now() + timeout;
    let mut output = Vec::new();
    loop {
      let remaining = deadline.saturating_duration_since(Instant::now());
      match self.recv_timeout(remaining) {
        Some(ReaderEvent::Data(chunk)) => output.extend_from_slice(&chunk),
        Some(ReaderEvent::Closed) => return Ok(output),
        Some(ReaderEvent::Failed(e)) => return Err(e),
        None => {
          return Err(Error::Io(NativeError::from_errno(
            "read(pty reader)",
            libc::ETIMEDOUT,
          )))
        }
      }
    }
  }

  /// Waits for the thread to finish.
  pub fn join(mut self) {
    if let Some(handle) = self.handle.take() {
      if handle.join().is_err() {
        error!("PTY reader thread panicked");
      }
    }
  }
}
