// src/resolver.rs

//! Run-time lookup of C runtime entry points that the `libc` crate does not
//! bind on every target.
//!
//! The platform runtime library is opened once per process. Each symbol is
//! looked up at most once and its address is kept in a process-wide table;
//! later lookups only take the read lock.

use std::collections::HashMap;
use std::mem;

use libloading::Library;
use log::{debug, warn};
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::platform::OsFamily;

static LIBRARY: OnceCell<Library> = OnceCell::new();

static SYMBOLS: Lazy<RwLock<HashMap<&'static str, usize>>> =
  Lazy::new(|| RwLock::new(HashMap::new()));

/// Name of the runtime library for the current target.
pub fn runtime_library() -> &'static str {
  OsFamily::current().runtime_library()
}

fn library() -> Result<&'static Library> {
  LIBRARY.get_or_try_init(|| {
    let name = runtime_library();
    debug!("Opening runtime library {}", name);
    unsafe { Library::new(name) }.map_err(|e| {
      warn!("Failed to open runtime library {}: {}", name, e);
      Error::LibraryUnavailable {
        library: name,
        reason: e.to_string(),
      }
    })
  })
}

/// Address of `name` in the runtime library, resolving it on first use.
pub fn address_of(name: &'static str) -> Result<usize> {
  if let Some(address) = SYMBOLS.read().get(name) {
    return Ok(*address);
  }

  let library = library()?;
  let mut symbols = SYMBOLS.write();
  // Another thread may have won the race for the write lock.
  if let Some(address) = symbols.get(name) {
    return Ok(*address);
  }

  let address = unsafe { library.get::<*mut libc::c_void>(name.as_bytes()) }
    .map(|symbol| *symbol as usize)
    .map_err(|e| {
      debug!("dlsym({}) failed: {}", name, e);
      Error::SymbolResolution {
        symbol: name.to_string(),
        library: runtime_library(),
      }
    })?;
  if address == 0 {
    return Err(Error::SymbolResolution {
      symbol: name.to_string(),
      library: runtime_library(),
    });
  }

  debug!("Resolved {} at {:#x}", name, address);
  symbols.insert(name, address);
  Ok(address)
}

/// Resolves `name` as a function pointer of type `F`.
///
/// # Safety
///
/// `F` must be an `extern "C" fn` type matching the real signature of the
/// exported symbol.
///
/// # Errors
///
/// `Error::InvalidRequest` if `F` is not pointer-sized, before any lookup.
pub unsafe fn resolve<F: Copy>(name: &'static str) -> Result<F> {
  if mem::size_of::<F>() != mem::size_of::<usize>() {
    return Err(Error::InvalidRequest(format!(
      "{} cannot be resolved as a {}-byte value",
      name,
      mem::size_of::<F>()
    )));
  }
  let address = address_of(name)?;
  Ok(mem::transmute_copy::<usize, F>(&address))
}

/// Like [`resolve`], but an absent symbol yields `Ok(None)`.
///
/// A library that cannot be opened is still an error.
///
/// # Safety
///
/// Same contract as [`resolve`].
pub unsafe fn resolve_optional<F: Copy>(name: &'static str) -> Result<Option<F>> {
  match resolve(name) {
    Ok(f) => Ok(Some(f)),
    Err(Error::SymbolResolution { .. }) => Ok(None),
    Err(e) => Err(e),
  }
}

/// Number of symbols resolved so far.
pub fn resolved_count() -> usize {
  SYMBOLS.read().len()
}
