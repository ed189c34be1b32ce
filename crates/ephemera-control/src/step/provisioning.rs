//! Run-to-completion reconciliation.

use tracing::{debug, info, warn};

use super::StepContext;
use crate::cluster::{WatchEventKind, WatchSubscription};
use crate::error::{ClusterError, StepError};
use crate::resource::{PodPhase, Resource};

/// Reconciles a resource that must run to completion, such as a seeding or
/// migration pod.
///
/// Any leftover object with the same name is removed first. The new object
/// is watched until it reaches a terminal phase; on success it is deleted,
/// on failure it is left in place for inspection.
#[derive(Debug, Clone)]
pub struct ProvisioningStep {
    resource: Resource,
}

impl ProvisioningStep {
    /// Wrap a desired resource.
    #[must_use]
    pub const fn new(resource: Resource) -> Self {
        Self { resource }
    }

    /// The desired resource.
    #[must_use]
    pub const fn resource(&self) -> &Resource {
        &self.resource
    }

    pub(super) async fn deploy(&self, ctx: &StepContext) -> Result<(), StepError> {
        let kind = self.resource.kind.as_str();
        let name = self.resource.name();
        let label = self.resource.to_string();

        if ctx.cluster.get(kind, &ctx.namespace, name).await?.is_some() {
            info!(resource = %label, "removing leftover resource");
            delete_if_present(ctx, kind, name).await?;
            ctx.pause(ctx.reconcile.deletion_settle(), &label).await?;
        }

        // Subscribe first so no transition between create and watch is lost.
        let mut watch = ctx.cluster.watch(kind, &ctx.namespace, name).await?;
        ctx.cluster
            .create(kind, &ctx.namespace, &self.resource)
            .await?;
        info!(resource = %label, "waiting for completion");

        let timeout = ctx.reconcile.watch_timeout();
        let outcome = tokio::select! {
            () = ctx.cancel.cancelled() => Err(StepError::Cancelled { name: label.clone() }),
            waited = tokio::time::timeout(timeout, wait_for_completion(&mut watch, &label)) => {
                waited.unwrap_or_else(|_| Err(StepError::Timeout {
                    name: label.clone(),
                    after: timeout,
                }))
            }
        };
        watch.stop();

        if let Err(e) = &outcome {
            warn!(resource = %label, error = %e, "provisioning did not complete");
        }
        outcome?;

        delete_if_present(ctx, kind, name).await?;
        info!(resource = %label, "provisioning completed");
        Ok(())
    }

    pub(super) async fn destroy(&self, ctx: &StepContext) -> Result<(), StepError> {
        delete_if_present(ctx, &self.resource.kind, self.resource.name()).await
    }
}

async fn delete_if_present(ctx: &StepContext, kind: &str, name: &str) -> Result<(), StepError> {
    match ctx.cluster.delete(kind, &ctx.namespace, name).await {
        Ok(()) | Err(ClusterError::NotFound { .. }) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn wait_for_completion(watch: &mut WatchSubscription, name: &str) -> Result<(), StepError> {
    while let Some(event) = watch.next().await {
        let event = event?;

        if event.kind == WatchEventKind::Deleted {
            return Err(StepError::ResourceGone {
                name: name.to_owned(),
            });
        }

        match event.object.phase() {
            Some(PodPhase::Succeeded) => return Ok(()),
            Some(PodPhase::Failed) => {
                return Err(StepError::SetupFailed {
                    name: name.to_owned(),
                })
            }
            Some(PodPhase::Unknown) => {
                return Err(StepError::StateUnknown {
                    name: name.to_owned(),
                })
            }
            Some(phase) => debug!(resource = %name, phase = %phase, "phase changed"),
            None => {}
        }
    }

    Err(StepError::WatchClosed {
        name: name.to_owned(),
    })
}
