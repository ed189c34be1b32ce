//! Configuration for ephemera-control.

use std::time::Duration;

use ephemera_store::StoreConfig;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{ControlError, ControlResult};

/// Top-level configuration for the control plane.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ControlConfig {
    /// Instance persistence.
    #[serde(default)]
    pub store: StoreSettings,

    /// Target cluster.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Instance lifecycle.
    #[serde(default)]
    pub instances: InstanceConfig,

    /// Reconciliation timings.
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Expiration sweep.
    #[serde(default)]
    pub sweep: SweepConfig,

    /// Notification delivery.
    #[serde(default)]
    pub notifier: NotifierConfig,
}

impl ControlConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `ephemera.toml` in the current directory (if present)
    /// 3. Environment variables with `EPHEMERA_` prefix, `__` separating sections
    pub fn load() -> ControlResult<Self> {
        Self::from_file("ephemera.toml")
    }

    /// Load configuration from a specific TOML file, with environment overrides.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("EPHEMERA_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }
}

/// Instance persistence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    /// Key prefix under which instances are stored.
    #[serde(default = "default_root")]
    pub root: String,

    /// Key/value backend.
    #[serde(default)]
    pub kv: StoreConfig,
}

fn default_root() -> String {
    "ephemera".to_owned()
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            root: default_root(),
            kv: StoreConfig::default(),
        }
    }
}

/// Target cluster configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// Namespace every resource is reconciled in.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_namespace() -> String {
    "default".to_owned()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
        }
    }
}

/// Instance lifecycle configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct InstanceConfig {
    /// Days from creation until an instance expires.
    #[serde(default = "default_expiration_days")]
    pub expiration_days: u32,
}

const fn default_expiration_days() -> u32 {
    7
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            expiration_days: default_expiration_days(),
        }
    }
}

/// Reconciliation timings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReconcileConfig {
    /// Upper bound on waiting for a provisioning resource to finish.
    #[serde(default = "default_watch_timeout_secs")]
    pub watch_timeout_secs: u64,

    /// Delay between checks while a replaced resource terminates.
    #[serde(default = "default_scale_down_poll_ms")]
    pub scale_down_poll_ms: u64,

    /// Checks before a terminating resource is reported as stuck.
    #[serde(default = "default_scale_down_attempts")]
    pub scale_down_attempts: u32,

    /// Pause after deleting a leftover provisioning resource.
    #[serde(default = "default_deletion_settle_ms")]
    pub deletion_settle_ms: u64,
}

const fn default_watch_timeout_secs() -> u64 {
    600
}

const fn default_scale_down_poll_ms() -> u64 {
    1_000
}

const fn default_scale_down_attempts() -> u32 {
    60
}

const fn default_deletion_settle_ms() -> u64 {
    2_000
}

impl ReconcileConfig {
    /// Provisioning wait bound.
    #[must_use]
    pub const fn watch_timeout(&self) -> Duration {
        Duration::from_secs(self.watch_timeout_secs)
    }

    /// Scale-down poll delay.
    #[must_use]
    pub const fn scale_down_poll(&self) -> Duration {
        Duration::from_millis(self.scale_down_poll_ms)
    }

    /// Settle delay after deleting a provisioning resource.
    #[must_use]
    pub const fn deletion_settle(&self) -> Duration {
        Duration::from_millis(self.deletion_settle_ms)
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            watch_timeout_secs: default_watch_timeout_secs(),
            scale_down_poll_ms: default_scale_down_poll_ms(),
            scale_down_attempts: default_scale_down_attempts(),
            deletion_settle_ms: default_deletion_settle_ms(),
        }
    }
}

/// Expiration sweep configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Seconds between sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
}

const fn default_sweep_interval_secs() -> u64 {
    3_600
}

impl SweepConfig {
    /// Sweep interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Notification delivery configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    /// Incoming-webhook URL. Notifications are only logged when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Webhook request timeout in seconds.
    #[serde(default = "default_notifier_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_notifier_timeout_secs() -> u64 {
    10
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_notifier_timeout_secs(),
        }
    }
}
