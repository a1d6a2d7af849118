//! Notification dispatch
//!
//! Delivery is fire-and-forget from the engine's point of view: a failed
//! delivery is logged and dropped, never retried, and never fails the run.
//! Exactly-once delivery is not promised: the dedup insert happens before
//! dispatch, so a crash between the two loses at most that one message
//! while a crash before the insert re-delivers it.

mod template;
mod webhook;

pub use template::{contains_ignore_token, render_message};
pub use webhook::{LogNotifier, WebhookNotifier};

use crate::config::NotifyConfig;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors from a delivery attempt
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook returned HTTP {status}")]
    Status { status: u16 },

    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// One rendered notification ready for a transport
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The target the item belongs to
    pub target_slug: String,
    /// Routing hint for the receiving side, if the target carries one
    pub channel: Option<String>,
    /// The rendered message
    pub message: String,
    /// The new item's URL
    pub item_url: String,
}

/// A delivery transport
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivers one notification; a single attempt, no retry
    async fn deliver(&self, delivery: &Delivery) -> Result<(), NotifyError>;
}

/// Builds the configured transport: webhook when a URL is set, log-only
/// otherwise
pub fn build_notifier(config: &NotifyConfig) -> Result<Arc<dyn Notifier>, NotifyError> {
    match &config.webhook_url {
        Some(url) => Ok(Arc::new(WebhookNotifier::new(
            url.clone(),
            Duration::from_secs(config.timeout_secs),
        )?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_notifier_prefers_webhook() {
        let config = NotifyConfig {
            webhook_url: Some("https://hooks.example.com/watch".to_string()),
            ..NotifyConfig::default()
        };
        assert!(build_notifier(&config).is_ok());
    }

    #[test]
    fn test_build_notifier_falls_back_to_log() {
        let config = NotifyConfig::default();
        assert!(build_notifier(&config).is_ok());
    }
}
