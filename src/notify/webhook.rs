//! Delivery transports

use crate::notify::{Delivery, Notifier, NotifyError};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::info;

/// Delivers new items as JSON POSTs to a single webhook URL
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
}

impl WebhookNotifier {
    /// Builds the notifier with its own short-timeout client
    pub fn new(webhook_url: String, timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            webhook_url,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, delivery: &Delivery) -> Result<(), NotifyError> {
        let payload = serde_json::json!({
            "target": delivery.target_slug,
            "channel": delivery.channel,
            "message": delivery.message,
            "url": delivery.item_url,
        });

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status {
                status: status.as_u16(),
            });
        }

        Ok(())
    }
}

/// Logs new items instead of delivering them
///
/// The fallback transport when no webhook URL is configured; useful when
/// first setting up a target's rules.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, delivery: &Delivery) -> Result<(), NotifyError> {
        info!(
            target = %delivery.target_slug,
            url = %delivery.item_url,
            channel = delivery.channel.as_deref().unwrap_or("-"),
            "new item: {}",
            delivery.message
        );
        Ok(())
    }
}
