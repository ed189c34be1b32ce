//! Common test utilities for control plane integration tests.

#![allow(dead_code)]

pub mod fixtures;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ephemera_control::config::ReconcileConfig;
use ephemera_control::{
    DeploymentService, HandlebarsRenderer, Instance, InstanceId, InstanceRepository,
    MemoryCluster, MemoryNotifier, NotificationLevel, Playbook, PlaybookId, StepContext,
};
use ephemera_store::{MemoryStore, Store, StoreError};

use fixtures::catalog;

/// Namespace every test reconciles in.
pub const NAMESPACE: &str = "previews";

/// Key prefix every test stores instances under.
pub const ROOT: &str = "ephemera";

/// Timings small enough for tests to run quickly.
pub fn fast_timings() -> ReconcileConfig {
    ReconcileConfig {
        watch_timeout_secs: 5,
        scale_down_poll_ms: 1,
        scale_down_attempts: 10,
        deletion_settle_ms: 1,
    }
}

/// A store whose writes can be made to fail.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
    failing_plain_writes: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    /// Fail every write, compare-and-swap included.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `count` calls to `set_value` or `delete`.
    /// Compare-and-swap keeps working.
    pub fn fail_next_plain_writes(&self, count: usize) {
        self.failing_plain_writes.store(count, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(injected())
        } else {
            Ok(())
        }
    }

    fn check_plain(&self) -> Result<(), StoreError> {
        self.check()?;
        let consumed = self
            .failing_plain_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match consumed {
            Ok(_) => Err(injected()),
            Err(_) => Ok(()),
        }
    }
}

fn injected() -> StoreError {
    StoreError::Connection("injected write failure".to_owned())
}

#[async_trait]
impl Store for FlakyStore {
    async fn set_value(&self, path: &str, value: &str) -> Result<(), StoreError> {
        self.check_plain()?;
        self.inner.set_value(path, value).await
    }

    async fn value(&self, path: &str) -> Result<Option<String>, StoreError> {
        self.inner.value(path).await
    }

    async fn values(&self, prefix: &str) -> Result<BTreeMap<String, String>, StoreError> {
        self.inner.values(prefix).await
    }

    async fn delete(&self, path: &str) -> Result<bool, StoreError> {
        self.check_plain()?;
        self.inner.delete(path).await
    }

    async fn compare_and_swap(
        &self,
        path: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.compare_and_swap(path, expected, new).await
    }
}

/// A control plane wired to in-memory collaborators.
pub struct TestControlPlane {
    pub store: MemoryStore,
    pub flaky: Arc<FlakyStore>,
    pub cluster: Arc<MemoryCluster>,
    pub notifier: Arc<MemoryNotifier>,
    pub service: Arc<DeploymentService>,
}

impl TestControlPlane {
    /// Control plane serving the standard fixture playbooks.
    pub fn new() -> Self {
        Self::with_playbooks(fixtures::standard_playbooks())
    }

    /// Control plane serving `playbooks`.
    pub fn with_playbooks(playbooks: Vec<Playbook>) -> Self {
        Self::build(playbooks, MemoryCluster::new())
    }

    /// Control plane whose cluster delays every call by `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        Self::build(
            fixtures::standard_playbooks(),
            MemoryCluster::new().with_latency(latency),
        )
    }

    fn build(playbooks: Vec<Playbook>, cluster: MemoryCluster) -> Self {
        let store = MemoryStore::new();
        let flaky = Arc::new(FlakyStore::new(store.clone()));
        let cluster = Arc::new(cluster);
        let notifier = Arc::new(MemoryNotifier::new());

        let instances = InstanceRepository::new(flaky.clone(), ROOT, 7);
        let context = StepContext::new(cluster.clone(), NAMESPACE, fast_timings());
        let service = Arc::new(DeploymentService::new(
            Arc::new(catalog(playbooks)),
            instances,
            Arc::new(HandlebarsRenderer::new()),
            notifier.clone(),
            context,
        ));

        Self {
            store,
            flaky,
            cluster,
            notifier,
            service,
        }
    }

    /// Create a persisted instance with `branch` set.
    pub async fn instance(&self, playbook: &str, id: &str, branch: &str) -> Instance {
        self.instance_with(playbook, id, &[("branch", branch)]).await
    }

    /// Create a persisted instance with the given variables.
    pub async fn instance_with(&self, playbook: &str, id: &str, vars: &[(&str, &str)]) -> Instance {
        self.service
            .create_instance(
                PlaybookId::new(playbook),
                InstanceId::new(id),
                vars.iter()
                    .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                    .collect(),
            )
            .await
            .unwrap()
    }

    /// Reload an instance from the store.
    pub async fn reload(&self, instance: &Instance) -> Instance {
        self.service
            .find_instance(&instance.playbook_id, &instance.id)
            .await
            .unwrap()
    }

    /// Texts of failure notifications sent so far.
    pub fn failures(&self) -> Vec<String> {
        self.notifier.texts(NotificationLevel::Failure)
    }

    /// Texts of success notifications sent so far.
    pub fn successes(&self) -> Vec<String> {
        self.notifier.texts(NotificationLevel::Success)
    }
}

impl Default for TestControlPlane {
    fn default() -> Self {
        Self::new()
    }
}
