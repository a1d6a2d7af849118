//! Browser session pool
//!
//! A fixed arena of rendering endpoints. Leasing waits on a semaphore up to
//! a configured bound, then fails fast so the run can defer instead of
//! hanging. The lease token carries its slot index and releases on drop, so
//! every exit path (normal, error, timeout, cancellation) returns the
//! slot.

use crate::config::BrowserConfig;
use crate::pool::PoolError;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

#[derive(Debug)]
struct BrowserSlot {
    endpoint: String,
    /// Bumped on session replacement
    generation: u64,
    in_use: bool,
}

/// Fixed-capacity pool of browser rendering sessions
pub struct BrowserPool {
    slots: Arc<Mutex<Vec<BrowserSlot>>>,
    semaphore: Arc<Semaphore>,
    lease_wait: Duration,
    render_timeout: Duration,
}

/// An exclusive claim on one browser session
///
/// Holds the slot index and the concurrency permit; dropping the lease
/// returns both.
pub struct BrowserLease {
    slots: Arc<Mutex<Vec<BrowserSlot>>>,
    index: usize,
    endpoint: String,
    generation: u64,
    _permit: OwnedSemaphorePermit,
}

impl BrowserPool {
    /// Creates a pool with one slot per configured endpoint
    pub fn new(config: &BrowserConfig) -> Self {
        let slots: Vec<BrowserSlot> = config
            .endpoints
            .iter()
            .map(|endpoint| BrowserSlot {
                endpoint: endpoint.clone(),
                generation: 0,
                in_use: false,
            })
            .collect();

        let capacity = slots.len();
        Self {
            slots: Arc::new(Mutex::new(slots)),
            semaphore: Arc::new(Semaphore::new(capacity)),
            lease_wait: Duration::from_secs(config.lease_wait_secs),
            render_timeout: Duration::from_secs(config.render_timeout_secs),
        }
    }

    /// Leases a session, waiting up to the configured bound
    ///
    /// # Returns
    ///
    /// * `Ok(BrowserLease)` - An exclusive session claim
    /// * `Err(PoolError::BrowserUnavailable)` - No session freed up in time
    pub async fn lease(&self) -> Result<BrowserLease, PoolError> {
        let waited_ms = self.lease_wait.as_millis() as u64;

        let permit = tokio::time::timeout(self.lease_wait, self.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| PoolError::BrowserUnavailable { waited_ms })?
            .map_err(|_| PoolError::BrowserUnavailable { waited_ms })?;

        let mut slots = self.slots.lock().unwrap();
        let Some(index) = slots.iter().position(|slot| !slot.in_use) else {
            // The permit count matches the slot count, so a free slot must
            // exist; fail fast rather than hang if that ever breaks
            return Err(PoolError::BrowserUnavailable { waited_ms: 0 });
        };

        slots[index].in_use = true;
        let endpoint = slots[index].endpoint.clone();
        let generation = slots[index].generation;
        debug!(endpoint = %endpoint, slot = index, "browser session leased");

        Ok(BrowserLease {
            slots: Arc::clone(&self.slots),
            index,
            endpoint,
            generation,
            _permit: permit,
        })
    }

    /// Rendering timeout for pages fetched through this pool
    pub fn render_timeout(&self) -> Duration {
        self.render_timeout
    }

    /// Number of sessions currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl BrowserLease {
    /// The leased session's render endpoint
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The session generation, bumped on each replacement
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Replaces the session behind this lease
    ///
    /// The slot keeps its endpoint but starts a fresh session generation.
    /// Used after a render failure before the single retry.
    pub fn replace_session(&mut self) {
        let mut slots = self.slots.lock().unwrap();
        slots[self.index].generation += 1;
        self.generation = slots[self.index].generation;
        debug!(endpoint = %self.endpoint, generation = self.generation, "browser session replaced");
    }
}

impl Drop for BrowserLease {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap();
        slots[self.index].in_use = false;
        debug!(endpoint = %self.endpoint, slot = self.index, "browser session released");
    }
}
