//! Background page-in task.
//!
//! A thread that periodically reads (never writes) the bytes of the
//! ephemeral key and the RNG pool, to discourage the OS from paging the
//! working set holding them out to disk. The task polls a stop flag every
//! 80 ms and is joined deterministically at database drop, strictly
//! before the secrets it touches are scrubbed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use zeroize::Zeroizing;

use crate::rng::EntropyPool;

const POLL_INTERVAL: Duration = Duration::from_millis(80);

pub(crate) type SharedKey = Arc<Mutex<Zeroizing<[u8; 32]>>>;
pub(crate) type SharedRng = Arc<Mutex<EntropyPool>>;

/// Reads every byte of `bytes` through a volatile load the compiler may
/// not elide.
fn touch(bytes: &[u8]) {
  for byte in bytes {
    // Safety: `byte` is a valid reference for the duration of the read.
    let _ = unsafe { std::ptr::read_volatile(byte) };
  }
}

pub(crate) struct PageInTask {
  stop: Arc<AtomicBool>,
  handle: Option<JoinHandle<()>>,
}

impl PageInTask {
  pub(crate) fn spawn(key: SharedKey, rng: SharedRng) -> Self {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    let handle = thread::spawn(move || {
      log::debug!("page-in task started");
      while !stop_flag.load(Ordering::Relaxed) {
        if let Ok(key) = key.lock() {
          touch(&key[..]);
        }
        if let Ok(rng) = rng.lock() {
          touch(rng.pool_bytes());
        }
        thread::sleep(POLL_INTERVAL);
      }
      log::debug!("page-in task stopped");
    });

    PageInTask {
      stop,
      handle: Some(handle),
    }
  }

  /// Signals the task to stop and joins it.
  pub(crate) fn shutdown(mut self) {
    self.stop.store(true, Ordering::Relaxed);
    if let Some(handle) = self.handle.take() {
      let _ = handle.join();
    }
  }
}

impl Drop for PageInTask {
  fn drop(&mut self) {
    self.stop.store(true, Ordering::Relaxed);
    if let Some(handle) = self.handle.take() {
      let _ = handle.join();
    }
  }
}
