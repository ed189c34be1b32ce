//! Incoming-webhook notifier.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use super::{Notification, Notifier};
use crate::error::{ControlError, ControlResult};

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
}

/// Posts notifications as `{"text": ...}` to an incoming-webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    /// Create a notifier posting to `url`.
    pub fn new(url: impl Into<String>, timeout: Duration) -> ControlResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ControlError::Http)?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> ControlResult<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload {
                text: &notification.text,
            })
            .send()
            .await
            .map_err(ControlError::Http)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ControlError::Notification(format!(
                "webhook rejected notification: {status}"
            )));
        }

        Ok(())
    }
}
