//! Cooperative query cancellation.

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// One-shot deadline polled at suspension points.
///
/// The flag trips either when the wall-clock ceiling passes or when a
/// [`CancelHandle`] is used. Once tripped it stays tripped.
#[derive(Debug, Clone)]
pub struct Deadline {
    expires_at: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

/// Cancels a running query from another thread.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

impl Deadline {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            expires_at: timeout.and_then(|timeout| Instant::now().checked_add(timeout)),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Never expires on its own; only an explicit cancel stops the query.
    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// Arms the timer the configuration allows for this build.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.effective_timeout())
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_expired(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return true;
        }
        match self.expires_at {
            Some(at) if Instant::now() >= at => {
                self.cancelled.store(true, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    pub fn check(&self) -> Result<()> {
        if self.is_expired() {
            warn!("query deadline reached, aborting");
            Err(Error::Timeout)
        } else {
            Ok(())
        }
    }
}
