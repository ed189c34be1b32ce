//! Instance use cases: status transitions around reconciliation runs,
//! notifications and the expiration sweep.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::Orchestrator;
use crate::cluster::ClusterApi;
use crate::config::ControlConfig;
use crate::error::{ControlError, ControlResult};
use crate::instance::{Instance, InstanceRepository};
use crate::notify::{create_notifier, Notification, Notifier};
use crate::playbook::{Playbook, PlaybookCatalog};
use crate::render::{HandlebarsRenderer, ManifestRenderer};
use crate::step::StepContext;
use crate::types::{InstanceId, InstanceStatus, PlaybookId};

/// Outcome of one expiration sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Instances removed, as `playbook/id`.
    pub removed: Vec<String>,
    /// Instances that could not be removed, with the reason.
    pub failed: Vec<(String, String)>,
}

impl SweepReport {
    /// Whether every expired instance was removed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Drives instances through their lifecycle.
///
/// Deploy and delete runs move the persisted status through
/// `Deploying`/`Deleting` to `Deployed`, `Error` or removal, and report the
/// outcome through the notifier. Runs execute on the caller's task; use
/// [`spawn_deploy`](Self::spawn_deploy) and
/// [`spawn_delete`](Self::spawn_delete) to run them in the background.
pub struct DeploymentService {
    catalog: Arc<PlaybookCatalog>,
    instances: InstanceRepository,
    renderer: Arc<dyn ManifestRenderer>,
    notifier: Arc<dyn Notifier>,
    context: StepContext,
}

impl DeploymentService {
    /// Create a service from its collaborators.
    pub fn new(
        catalog: Arc<PlaybookCatalog>,
        instances: InstanceRepository,
        renderer: Arc<dyn ManifestRenderer>,
        notifier: Arc<dyn Notifier>,
        context: StepContext,
    ) -> Self {
        Self {
            catalog,
            instances,
            renderer,
            notifier,
            context,
        }
    }

    /// Build a service from configuration: connects the configured store,
    /// picks the notifier and uses the handlebars renderer.
    pub async fn from_config(
        config: &ControlConfig,
        catalog: Arc<PlaybookCatalog>,
        cluster: Arc<dyn ClusterApi>,
    ) -> ControlResult<Self> {
        let store = ephemera_store::from_config(&config.store.kv).await?;
        info!(root = %config.store.root, "instance store connected");

        let instances = InstanceRepository::new(
            store,
            config.store.root.clone(),
            config.instances.expiration_days,
        );
        let notifier = create_notifier(&config.notifier)?;
        let context = StepContext::new(
            cluster,
            config.cluster.namespace.clone(),
            config.reconcile.clone(),
        );

        Ok(Self::new(
            catalog,
            instances,
            Arc::new(HandlebarsRenderer::new()),
            notifier,
            context,
        ))
    }

    /// The instance repository.
    #[must_use]
    pub const fn instances(&self) -> &InstanceRepository {
        &self.instances
    }

    /// The playbook catalog.
    #[must_use]
    pub fn catalog(&self) -> &PlaybookCatalog {
        &self.catalog
    }

    /// Abort provisioning waits of every run in progress.
    pub fn shutdown(&self) {
        self.context.cancel.cancel();
    }

    fn playbook(&self, id: &PlaybookId) -> ControlResult<&Playbook> {
        self.catalog
            .get(id)
            .ok_or_else(|| ControlError::PlaybookNotFound(id.to_string()))
    }

    /// Create an instance of a known playbook in the `New` status.
    pub async fn create_instance(
        &self,
        playbook_id: PlaybookId,
        id: InstanceId,
        vars: BTreeMap<String, String>,
    ) -> ControlResult<Instance> {
        self.playbook(&playbook_id)?;
        let instance = self.instances.create(playbook_id, id, vars).await?;
        info!(
            playbook_id = %instance.playbook_id,
            instance_id = %instance.id,
            expires_at = %instance.expires_at,
            "instance created"
        );
        Ok(instance)
    }

    /// Set one variable. The key must be declared by the playbook.
    pub async fn set_variable(
        &self,
        playbook_id: &PlaybookId,
        id: &InstanceId,
        key: &str,
        value: &str,
    ) -> ControlResult<Instance> {
        let playbook = self.playbook(playbook_id)?;
        if !playbook.declares_var(key) {
            return Err(ControlError::validation(format!(
                "playbook {playbook_id} does not accept variable {key}"
            )));
        }

        let mut instance = self.instances.find_by_id(playbook_id, id).await?;
        instance.vars.insert(key.to_owned(), value.to_owned());
        self.instances.save(&instance).await?;
        debug!(playbook_id = %playbook_id, instance_id = %id, key, "variable set");
        Ok(instance)
    }

    /// Load one instance.
    pub async fn find_instance(
        &self,
        playbook_id: &PlaybookId,
        id: &InstanceId,
    ) -> ControlResult<Instance> {
        self.instances.find_by_id(playbook_id, id).await
    }

    /// All instances of a playbook.
    pub async fn list_instances(&self, playbook_id: &PlaybookId) -> ControlResult<Vec<Instance>> {
        self.instances.find_by_playbook_id(playbook_id).await
    }

    /// Set the advisory lock.
    pub async fn lock_instance(
        &self,
        playbook_id: &PlaybookId,
        id: &InstanceId,
    ) -> ControlResult<Instance> {
        self.instances.lock(playbook_id, id).await
    }

    /// Clear the advisory lock. Fails with `NotLocked` if not locked.
    pub async fn unlock_instance(
        &self,
        playbook_id: &PlaybookId,
        id: &InstanceId,
    ) -> ControlResult<Instance> {
        self.instances.unlock(playbook_id, id).await
    }

    /// Deploy an instance and report the outcome.
    ///
    /// Refuses with `ConcurrentOperation` while another deploy or delete owns
    /// the instance. A failed run leaves the instance in `Error`; a
    /// successful one in `Deployed`. Failing to persist `Deployed` counts as
    /// a failed run.
    pub async fn deploy_and_notify(&self, instance: &Instance) -> ControlResult<()> {
        let name = instance.qualified_name();
        info!(playbook_id = %instance.playbook_id, instance_id = %instance.id, "deploy requested");

        let playbook = match self.playbook(&instance.playbook_id) {
            Ok(playbook) => playbook,
            Err(e) => return self.refuse("deploy", &name, e).await,
        };

        let busy = [InstanceStatus::Deploying, InstanceStatus::Deleting];
        let mut current = match self.begin(instance, InstanceStatus::Deploying, &busy).await {
            Ok(current) => current,
            Err(e) => return self.refuse("deploy", &name, e).await,
        };

        let orchestrator = match Orchestrator::build(
            playbook,
            &current.vars,
            self.catalog.manifests(),
            self.renderer.as_ref(),
        ) {
            Ok(orchestrator) => orchestrator,
            Err(e) => return self.fail("deploy", current, e).await,
        };

        if let Err(e) = orchestrator.deploy(&self.context).await {
            return self.fail("deploy", current, e).await;
        }

        current.status = InstanceStatus::Deployed;
        if let Err(e) = self.instances.save(&current).await {
            return self.fail("deploy", current, e).await;
        }
        let text = self.success_message(playbook, &current);
        self.notify(Notification::success(text)).await;

        info!(playbook_id = %current.playbook_id, instance_id = %current.id, "instance deployed");
        Ok(())
    }

    /// Tear an instance down, remove its record and report the outcome.
    ///
    /// Refuses with `ConcurrentOperation` while another delete owns the
    /// instance. A failed run, including one whose record cannot be removed,
    /// leaves the instance in `Error`.
    pub async fn delete_and_notify(&self, instance: &Instance) -> ControlResult<()> {
        let name = instance.qualified_name();
        info!(playbook_id = %instance.playbook_id, instance_id = %instance.id, "delete requested");

        let playbook = match self.playbook(&instance.playbook_id) {
            Ok(playbook) => playbook,
            Err(e) => return self.refuse("delete", &name, e).await,
        };

        let current = match self
            .begin(instance, InstanceStatus::Deleting, &[InstanceStatus::Deleting])
            .await
        {
            Ok(current) => current,
            Err(e) => return self.refuse("delete", &name, e).await,
        };

        let orchestrator = match Orchestrator::build(
            playbook,
            &current.vars,
            self.catalog.manifests(),
            self.renderer.as_ref(),
        ) {
            Ok(orchestrator) => orchestrator,
            Err(e) => return self.fail("delete", current, e).await,
        };

        if let Err(e) = orchestrator.destroy(&self.context).await {
            return self.fail("delete", current, e).await;
        }

        match self.instances.delete(&current.playbook_id, &current.id).await {
            Ok(()) => {}
            Err(ControlError::NotFound(_)) => {
                debug!(instance = %name, "record already removed");
            }
            Err(e) => return self.fail("delete", current, e).await,
        }
        self.notify(Notification::success(format!("{name} deleted")))
            .await;

        info!(playbook_id = %current.playbook_id, instance_id = %current.id, "instance deleted");
        Ok(())
    }

    /// Delete every deployed instance that has expired as of `as_of`.
    ///
    /// A failure on one instance is logged and recorded; the sweep moves on.
    pub async fn remove_expired_instances(&self, as_of: DateTime<Utc>) -> ControlResult<SweepReport> {
        let expired = self.instances.all_deployed_and_expired(as_of).await?;
        info!(count = expired.len(), as_of = %as_of, "sweeping expired instances");

        let mut report = SweepReport::default();
        for instance in expired {
            let name = instance.qualified_name();
            match self.delete_and_notify(&instance).await {
                Ok(()) => report.removed.push(name),
                Err(e) => {
                    warn!(instance = %name, error = %e, "failed to remove expired instance");
                    report.failed.push((name, e.to_string()));
                }
            }
        }

        Ok(report)
    }

    /// Run [`deploy_and_notify`](Self::deploy_and_notify) on a new task.
    ///
    /// The outcome is only reported through the notifier.
    pub fn spawn_deploy(self: &Arc<Self>, instance: Instance) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = service.deploy_and_notify(&instance).await {
                debug!(instance = %instance.qualified_name(), error = %e, "background deploy failed");
            }
        })
    }

    /// Run [`delete_and_notify`](Self::delete_and_notify) on a new task.
    ///
    /// The outcome is only reported through the notifier.
    pub fn spawn_delete(self: &Arc<Self>, instance: Instance) -> JoinHandle<()> {
        let service = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = service.delete_and_notify(&instance).await {
                debug!(instance = %instance.qualified_name(), error = %e, "background delete failed");
            }
        })
    }

    /// Claim the instance for a run by moving it to `to`.
    ///
    /// Persistence is best effort: if the store cannot be reached the run
    /// proceeds on the caller's copy.
    async fn begin(
        &self,
        instance: &Instance,
        to: InstanceStatus,
        busy: &[InstanceStatus],
    ) -> ControlResult<Instance> {
        if busy.contains(&instance.status) {
            return Err(ControlError::ConcurrentOperation {
                instance: instance.qualified_name(),
                detail: format!("instance is already {}", instance.status),
            });
        }

        match self.instances.transition(instance, to, busy).await {
            Ok(current) => Ok(current),
            Err(ControlError::Store(e)) => {
                warn!(
                    playbook_id = %instance.playbook_id,
                    instance_id = %instance.id,
                    status = %to,
                    error = %e,
                    "failed to persist status, continuing"
                );
                let mut current = instance.clone();
                current.status = to;
                Ok(current)
            }
            Err(e) => Err(e),
        }
    }

    /// Report a run that never started.
    async fn refuse(&self, action: &str, name: &str, error: ControlError) -> ControlResult<()> {
        warn!(instance = %name, error = %error, "{action} refused");
        self.notify(Notification::failure(format!("{action} of {name} failed: {error}")))
            .await;
        Err(error)
    }

    /// Record a failed run: persist `Error`, notify, return the run's error.
    ///
    /// If `Error` cannot be persisted that failure is returned instead.
    async fn fail(
        &self,
        action: &str,
        mut instance: Instance,
        error: ControlError,
    ) -> ControlResult<()> {
        let name = instance.qualified_name();
        error!(instance = %name, error = %error, "{action} failed");

        instance.status = InstanceStatus::Error;
        let persisted = self.instances.save(&instance).await;

        self.notify(Notification::failure(format!("{action} of {name} failed: {error}")))
            .await;

        match persisted {
            Ok(()) => Err(error),
            Err(persist) => {
                error!(instance = %name, error = %persist, "failed to persist error status");
                Err(persist)
            }
        }
    }

    fn success_message(&self, playbook: &Playbook, instance: &Instance) -> String {
        let fallback = format!("{} deployed", instance.qualified_name());
        let Some(template) = &playbook.message else {
            return fallback;
        };

        match self.renderer.render(template, &instance.message_vars()) {
            Ok(text) => text,
            Err(e) => {
                warn!(playbook_id = %playbook.id, error = %e, "failed to render success message");
                fallback
            }
        }
    }

    async fn notify(&self, notification: Notification) {
        if let Err(e) = self.notifier.send(&notification).await {
            warn!(error = %e, level = %notification.level, "failed to send notification");
        }
    }
}

impl std::fmt::Debug for DeploymentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentService")
            .field("playbooks", &self.catalog.len())
            .field("instances", &self.instances)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
