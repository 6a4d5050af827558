use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::{CanManager, Result, TransportError};

/// Cloneable, lock-protected [`CanManager`] for use from more than one thread.
///
/// Callbacks run while the lock is held and must not lock the manager again.
#[derive(Clone)]
pub struct SharedManager {
    inner: Arc<Mutex<CanManager>>,
}

impl SharedManager {
    pub fn new(manager: CanManager) -> Self {
        Self {
            inner: Arc::new(Mutex::new(manager)),
        }
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, CanManager>> {
        self.inner.lock().map_err(|_| TransportError::Poisoned)
    }

    /// Run `f` with exclusive access to the manager.
    pub fn with<R>(&self, f: impl FnOnce(&mut CanManager) -> R) -> Result<R> {
        let mut guard = self.lock()?;
        Ok(f(&mut guard))
    }

    /// Pump every `period` on a background thread until the handle is stopped or dropped.
    pub fn spawn_pump(&self, period: Duration) -> Result<PumpHandle> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let shared = self.clone();
        let thread = thread::Builder::new()
            .name("can-pump".to_string())
            .spawn(move || {
                debug!(period_ms = period.as_millis() as u64, "pump thread started");
                while !flag.load(Ordering::Acquire) {
                    match shared.lock() {
                        Ok(mut mgr) => {
                            mgr.pump();
                        }
                        Err(e) => {
                            warn!(error = %e, "pump thread exiting");
                            break;
                        }
                    }
                    thread::sleep(period);
                }
                debug!("pump thread stopped");
            })
            .map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(PumpHandle {
            stop,
            thread: Some(thread),
        })
    }
}

/// Owner of a background pump thread.
pub struct PumpHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl PumpHandle {
    /// Signal the thread and wait for it to finish its current cycle.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for PumpHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
