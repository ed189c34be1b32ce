//! Periodic expiration sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::DeploymentService;
use crate::config::SweepConfig;

const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Runs [`DeploymentService::remove_expired_instances`] on a fixed interval
/// until cancelled.
#[derive(Debug)]
pub struct ExpirationSweeper {
    service: Arc<DeploymentService>,
    interval: Duration,
    cancel: CancellationToken,
}

impl ExpirationSweeper {
    /// Create a sweeper. The first sweep runs immediately.
    ///
    /// Intervals shorter than one second are raised to one second.
    #[must_use]
    pub fn new(service: Arc<DeploymentService>, interval: Duration) -> Self {
        if interval < MIN_INTERVAL {
            warn!(?interval, "sweep interval too short, using one second");
        }

        Self {
            service,
            interval: interval.max(MIN_INTERVAL),
            cancel: CancellationToken::new(),
        }
    }

    /// Create a sweeper running every `config.interval_secs`.
    #[must_use]
    pub fn from_config(service: Arc<DeploymentService>, config: &SweepConfig) -> Self {
        Self::new(service, config.interval())
    }

    /// Time between sweeps.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Use `cancel` to stop the loop.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the loop when cancelled.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Sweep until cancelled. Returns the number of sweeps run.
    ///
    /// A sweep in progress is allowed to finish.
    pub async fn run(self) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweeps = 0;

        info!(interval_secs = self.interval.as_secs(), "expiration sweeper started");

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.service.remove_expired_instances(Utc::now()).await {
                        Ok(report) => info!(
                            removed = report.removed.len(),
                            failed = report.failed.len(),
                            "expiration sweep finished"
                        ),
                        Err(e) => error!(error = %e, "expiration sweep failed"),
                    }
                    sweeps += 1;
                }
            }
        }

        info!(sweeps, "expiration sweeper stopped");
        sweeps
    }

    /// Run the loop on a new task.
    pub fn spawn(self) -> JoinHandle<u64> {
        tokio::spawn(self.run())
    }
}
