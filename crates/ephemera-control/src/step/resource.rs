//! Create-or-replace reconciliation.

use tracing::{debug, info};

use super::StepContext;
use crate::error::StepError;
use crate::resource::Resource;

/// Reconciles a long-lived resource.
///
/// Absent objects are created, identical ones are left alone, and changed
/// ones are deleted and recreated once the old object has terminated.
#[derive(Debug, Clone)]
pub struct ResourceStep {
    resource: Resource,
}

impl ResourceStep {
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

        match ctx.cluster.get(kind, &ctx.namespace, name).await? {
            None => {}
            Some(live) if live.same_spec(&self.resource) => {
                debug!(resource = %self.resource, "resource up to date");
                return Ok(());
            }
            Some(_) => {
                info!(resource = %self.resource, "resource changed, replacing");
                ctx.cluster.delete(kind, &ctx.namespace, name).await?;
                self.wait_until_gone(ctx).await?;
            }
        }

        ctx.cluster
            .create(kind, &ctx.namespace, &self.resource)
            .await?;
        info!(resource = %self.resource, "resource created");
        Ok(())
    }

    pub(super) async fn destroy(&self, ctx: &StepContext) -> Result<(), StepError> {
        ctx.cluster
            .delete(&self.resource.kind, &ctx.namespace, self.resource.name())
            .await?;
        info!(resource = %self.resource, "resource deleted");
        Ok(())
    }

    async fn wait_until_gone(&self, ctx: &StepContext) -> Result<(), StepError> {
        let kind = self.resource.kind.as_str();
        let name = self.resource.name();
        let label = self.resource.to_string();
        let mut replicas = 1;

        for attempt in 0..=ctx.reconcile.scale_down_attempts {
            match ctx.cluster.get(kind, &ctx.namespace, name).await? {
                None => return Ok(()),
                Some(live) => replicas = live.replicas().unwrap_or(1),
            }

            if attempt < ctx.reconcile.scale_down_attempts {
                debug!(resource = %label, replicas, attempt, "waiting for termination");
                ctx.pause(ctx.reconcile.scale_down_poll(), &label).await?;
            }
        }

        Err(StepError::StillTerminating {
            name: label,
            replicas,
        })
    }
}
