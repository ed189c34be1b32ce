//! Notification side channel.
//!
//! Deploy and delete outcomes are reported through a [`Notifier`]. Delivery
//! failures are logged by the caller and never change a run's result.

mod webhook;

pub use webhook::WebhookNotifier;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::NotifierConfig;
use crate::error::{ControlError, ControlResult};

/// Outcome a notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    /// A run completed.
    Success,
    /// A run or request failed.
    Failure,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Failure => "failure",
        })
    }
}

/// A message for the people watching an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Outcome.
    pub level: NotificationLevel,
    /// Message text.
    pub text: String,
}

impl Notification {
    /// A success message.
    #[must_use]
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Success,
            text: text.into(),
        }
    }

    /// A failure message.
    #[must_use]
    pub fn failure(text: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Failure,
            text: text.into(),
        }
    }
}

/// Delivers notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one notification.
    async fn send(&self, notification: &Notification) -> ControlResult<()>;
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> ControlResult<()> {
        match notification.level {
            NotificationLevel::Success => info!(text = %notification.text, "notification"),
            NotificationLevel::Failure => warn!(text = %notification.text, "notification"),
        }
        Ok(())
    }
}

/// Records notifications in memory.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl MemoryNotifier {
    /// Create an empty notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `send` fail (after recording) until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Everything sent so far, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Texts of notifications with `level`, in order.
    #[must_use]
    pub fn texts(&self, level: NotificationLevel) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|n| n.level == level)
            .map(|n| n.text)
            .collect()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, notification: &Notification) -> ControlResult<()> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification.clone());

        if self.failing.load(Ordering::SeqCst) {
            return Err(ControlError::Notification("delivery disabled".to_owned()));
        }
        Ok(())
    }
}

/// Create a notifier from configuration.
///
/// A webhook notifier when a URL is configured, otherwise a log notifier.
pub fn create_notifier(config: &NotifierConfig) -> ControlResult<Arc<dyn Notifier>> {
    match &config.webhook_url {
        Some(url) => {
            let notifier =
                WebhookNotifier::new(url.clone(), Duration::from_secs(config.timeout_secs))?;
            info!("webhook notifier configured");
            Ok(Arc::new(notifier))
        }
        None => Ok(Arc::new(LogNotifier)),
    }
}
