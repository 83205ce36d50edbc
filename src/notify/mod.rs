use reqwest::Client;
use std::time::Duration;

use crate::models::Notification;
use crate::Result;

const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Webhook notification sender.
///
/// Delivery is strictly best-effort: the ledger has already been committed
/// by the time a notification goes out, so failures here are logged and
/// swallowed, never propagated.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self { client, url })
    }

    /// Build from NOTIFY_WEBHOOK_URL; None disables notifications
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("NOTIFY_WEBHOOK_URL").ok()?;

        match Self::new(url) {
            Ok(notifier) => {
                tracing::info!("Notifications enabled via webhook");
                Some(notifier)
            }
            Err(e) => {
                tracing::warn!("Failed to build notification client: {}", e);
                None
            }
        }
    }

    /// POST the payload as JSON. Never fails the caller.
    pub async fn send(&self, notification: &Notification) {
        let result = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!("Delivered notification: {}", notification.title);
            }
            Ok(response) => {
                tracing::warn!(
                    "Notification webhook returned {}: {}",
                    response.status(),
                    notification.title
                );
            }
            Err(e) => {
                tracing::warn!("Notification delivery failed: {}", e);
            }
        }
    }
}
