//! Proxy pool with rolling health
//!
//! Each configured proxy endpoint gets a slot holding a prebuilt HTTP
//! client. Jobs lease a slot per run, rotating through the pool or sticking
//! to the same slot per target, and report request outcomes back. A slot
//! that fails enough times in a row is demoted for a cooldown, then
//! re-admitted with a clean record.
//!
//! Proxy leasing never waits: if no healthy free slot exists the lease fails
//! immediately and the run defers.

use crate::config::{FetchConfig, ProxyConfig, ProxyPolicy, UserAgentConfig};
use crate::fetch::build_http_client;
use crate::pool::PoolError;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug)]
struct ProxySlot {
    endpoint: String,
    client: Client,
    consecutive_failures: u32,
    /// Set while the slot sits out a demotion cooldown
    demoted_until: Option<Instant>,
    in_use: bool,
}

struct ProxyInner {
    slots: Vec<ProxySlot>,
    /// Next slot considered under the rotate policy
    cursor: usize,
    /// Target slug to slot index, for the sticky policy
    sticky: HashMap<String, usize>,
    failure_threshold: u32,
    cooldown: Duration,
}

/// Fixed-capacity proxy pool shared across crawl jobs
pub struct ProxyPool {
    inner: Arc<Mutex<ProxyInner>>,
}

/// An exclusive claim on one proxy slot
///
/// Carries the slot's prebuilt client; dropping the lease frees the slot.
pub struct ProxyLease {
    inner: Arc<Mutex<ProxyInner>>,
    index: usize,
    endpoint: String,
    client: Client,
}

impl ProxyPool {
    /// Builds the pool, constructing one proxied HTTP client per endpoint
    pub fn new(
        config: &ProxyConfig,
        agent: &UserAgentConfig,
        fetch: &FetchConfig,
    ) -> Result<Self, PoolError> {
        let mut slots = Vec::with_capacity(config.endpoints.len());
        for endpoint in &config.endpoints {
            let client = build_http_client(agent, fetch, Some(endpoint)).map_err(|source| {
                PoolError::ProxyClient {
                    endpoint: endpoint.clone(),
                    source,
                }
            })?;
            slots.push(ProxySlot {
                endpoint: endpoint.clone(),
                client,
                consecutive_failures: 0,
                demoted_until: None,
                in_use: false,
            });
        }

        Ok(Self {
            inner: Arc::new(Mutex::new(ProxyInner {
                slots,
                cursor: 0,
                sticky: HashMap::new(),
                failure_threshold: config.failure_threshold,
                cooldown: Duration::from_secs(config.cooldown_secs),
            })),
        })
    }

    /// Leases a proxy for one run under the target's policy
    ///
    /// # Arguments
    ///
    /// * `policy` - The target's proxy selection policy
    /// * `target_slug` - Used as the sticky key
    /// * `now` - The current time instant, for cooldown re-admission
    ///
    /// # Returns
    ///
    /// * `Ok(None)` - The policy does not use the pool
    /// * `Ok(Some(ProxyLease))` - An exclusive slot claim
    /// * `Err(PoolError::ProxyUnavailable)` - No healthy free slot
    pub fn lease(
        &self,
        policy: ProxyPolicy,
        target_slug: &str,
        now: Instant,
    ) -> Result<Option<ProxyLease>, PoolError> {
        if !policy.uses_pool() {
            return Ok(None);
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.slots.is_empty() {
            return Err(PoolError::ProxyUnavailable);
        }

        let index = match policy {
            ProxyPolicy::None => unreachable!("checked by uses_pool"),
            ProxyPolicy::Rotate => inner.pick_rotating(now),
            ProxyPolicy::Sticky => inner.pick_sticky(target_slug, now),
        }
        .ok_or(PoolError::ProxyUnavailable)?;

        inner.slots[index].in_use = true;
        let endpoint = inner.slots[index].endpoint.clone();
        let client = inner.slots[index].client.clone();
        debug!(endpoint = %endpoint, slot = index, target = target_slug, "proxy leased");

        Ok(Some(ProxyLease {
            inner: Arc::clone(&self.inner),
            index,
            endpoint,
            client,
        }))
    }

    /// Number of slots neither leased nor demoted
    pub fn usable(&self, now: Instant) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let len = inner.slots.len();
        (0..len).filter(|&i| inner.slot_is_usable(i, now)).count()
    }
}

impl ProxyInner {
    /// Re-admits the slot if its cooldown has passed, then reports whether
    /// it can be leased
    fn slot_is_usable(&mut self, index: usize, now: Instant) -> bool {
        let slot = &mut self.slots[index];
        if let Some(until) = slot.demoted_until {
            if now >= until {
                slot.demoted_until = None;
                slot.consecutive_failures = 0;
                debug!(endpoint = %slot.endpoint, "proxy re-admitted after cooldown");
            } else {
                return false;
            }
        }
        !slot.in_use
    }

    fn pick_rotating(&mut self, now: Instant) -> Option<usize> {
        let len = self.slots.len();
        for offset in 0..len {
            let index = (self.cursor + offset) % len;
            if self.slot_is_usable(index, now) {
                self.cursor = (index + 1) % len;
                return Some(index);
            }
        }
        None
    }

    fn pick_sticky(&mut self, target_slug: &str, now: Instant) -> Option<usize> {
        if let Some(&index) = self.sticky.get(target_slug) {
            if self.slot_is_usable(index, now) {
                return Some(index);
            }
        }
        // Assigned slot is demoted or busy: pick a fresh one and remember it
        let index = self.pick_rotating(now)?;
        self.sticky.insert(target_slug.to_string(), index);
        Some(index)
    }
}

impl ProxyLease {
    /// The leased proxy's endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// HTTP client routed through the leased proxy
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Records a failed request through this proxy
    ///
    /// Crossing the failure threshold demotes the slot until `now` plus the
    /// pool cooldown.
    pub fn report_failure(&self, now: Instant) {
        let mut inner = self.inner.lock().unwrap();
        let threshold = inner.failure_threshold;
        let cooldown = inner.cooldown;
        let slot = &mut inner.slots[self.index];

        slot.consecutive_failures += 1;
        if slot.consecutive_failures >= threshold && slot.demoted_until.is_none() {
            slot.demoted_until = Some(now + cooldown);
            warn!(
                endpoint = %slot.endpoint,
                failures = slot.consecutive_failures,
                cooldown_secs = cooldown.as_secs(),
                "proxy demoted"
            );
        }
    }

    /// Records a successful request through this proxy, clearing its streak
    pub fn report_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.slots[self.index].consecutive_failures = 0;
    }
}

impl Drop for ProxyLease {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        inner.slots[self.index].in_use = false;
        debug!(endpoint = %self.endpoint, slot = self.index, "proxy released");
    }
}
