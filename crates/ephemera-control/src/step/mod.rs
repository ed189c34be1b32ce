//! Reconciliation steps.
//!
//! A [`Step`] reconciles one rendered resource against the cluster. The
//! variant is chosen from the shape of the task when the run is planned:
//! ordinary manifests become [`ResourceStep`]s, a task's pod manifest becomes
//! a [`ProvisioningStep`].

mod provisioning;
mod resource;

pub use provisioning::ProvisioningStep;
pub use resource::ResourceStep;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cluster::ClusterApi;
use crate::config::ReconcileConfig;
use crate::error::StepError;
use crate::resource::Resource;

/// Everything a step needs to talk to the cluster.
#[derive(Clone)]
pub struct StepContext {
    /// Cluster client.
    pub cluster: Arc<dyn ClusterApi>,
    /// Namespace resources are reconciled in.
    pub namespace: String,
    /// Timings.
    pub reconcile: ReconcileConfig,
    /// Aborts waits when cancelled.
    pub cancel: CancellationToken,
}

impl StepContext {
    /// Create a context with a fresh cancellation token.
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        namespace: impl Into<String>,
        reconcile: ReconcileConfig,
    ) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
            reconcile,
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Sleep for `duration`, returning early with `Cancelled` if the context
    /// is cancelled.
    pub(crate) async fn pause(&self, duration: Duration, name: &str) -> Result<(), StepError> {
        tokio::select! {
            () = self.cancel.cancelled() => Err(StepError::Cancelled { name: name.to_owned() }),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

impl fmt::Debug for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("namespace", &self.namespace)
            .field("reconcile", &self.reconcile)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Which reconciliation strategy a step uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Create, or diff and replace.
    Resource,
    /// Create, wait for completion, delete.
    Provisioning,
}

/// One unit of reconciliation work.
#[derive(Debug, Clone)]
pub enum Step {
    /// See [`ResourceStep`].
    Resource(ResourceStep),
    /// See [`ProvisioningStep`].
    Provisioning(ProvisioningStep),
}

impl Step {
    /// The desired resource.
    #[must_use]
    pub fn resource(&self) -> &Resource {
        match self {
            Self::Resource(step) => step.resource(),
            Self::Provisioning(step) => step.resource(),
        }
    }

    /// `Kind/name` of the desired resource.
    #[must_use]
    pub fn name(&self) -> String {
        self.resource().to_string()
    }

    /// Strategy used by this step.
    #[must_use]
    pub const fn kind(&self) -> StepKind {
        match self {
            Self::Resource(_) => StepKind::Resource,
            Self::Provisioning(_) => StepKind::Provisioning,
        }
    }

    /// Bring the cluster in line with the desired resource.
    pub async fn deploy(&self, ctx: &StepContext) -> Result<(), StepError> {
        match self {
            Self::Resource(step) => step.deploy(ctx).await,
            Self::Provisioning(step) => step.deploy(ctx).await,
        }
    }

    /// Remove the resource from the cluster.
    pub async fn destroy(&self, ctx: &StepContext) -> Result<(), StepError> {
        match self {
            Self::Resource(step) => step.destroy(ctx).await,
            Self::Provisioning(step) => step.destroy(ctx).await,
        }
    }
}
