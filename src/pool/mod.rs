//! Resource pools: browser sessions and proxies
//!
//! Both pools are fixed arenas handing out drop-released lease tokens. A
//! failed lease is never fatal to the engine; the requesting run defers and
//! the scheduler retries it later.

mod browser;
mod proxy;

pub use browser::{BrowserLease, BrowserPool};
pub use proxy::{ProxyLease, ProxyPool};

use thiserror::Error;

/// Errors from leasing pool resources
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every browser session stayed busy for the whole lease wait
    #[error("no browser session available within {waited_ms}ms")]
    BrowserUnavailable { waited_ms: u64 },

    /// No proxy slot is both healthy and free
    #[error("no healthy proxy available")]
    ProxyUnavailable,

    /// A proxied HTTP client could not be built at startup
    #[error("failed to build proxy client for {endpoint}: {source}")]
    ProxyClient {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
}

impl PoolError {
    /// Whether the error means "try again later" rather than "broken"
    ///
    /// Unavailability defers the run; a client build failure is a
    /// configuration problem and fails it.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            PoolError::BrowserUnavailable { .. } | PoolError::ProxyUnavailable
        )
    }
}
