//! In-process cluster.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{ClusterApi, WatchEvent, WatchEventKind, WatchSender, WatchSubscription};
use crate::error::ClusterError;
use crate::resource::{PodPhase, Resource};

/// A cluster API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `get`
    Get,
    /// `create`
    Create,
    /// `update`
    Update,
    /// `delete`
    Delete,
    /// `watch`
    Watch,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "get",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Watch => "watch",
        })
    }
}

/// A journaled mutating call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    /// `Create`, `Update` or `Delete`.
    pub op: Operation,
    /// Object kind.
    pub kind: String,
    /// Namespace.
    pub namespace: String,
    /// Object name.
    pub name: String,
}

type ObjectKey = (String, String, String);

fn object_key(kind: &str, namespace: &str, name: &str) -> ObjectKey {
    (kind.to_owned(), namespace.to_owned(), name.to_owned())
}

struct Watcher {
    key: ObjectKey,
    tx: WatchSender,
    cancel: CancellationToken,
}

impl Watcher {
    fn is_live(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<ObjectKey, Resource>,
    journal: Vec<Mutation>,
    scripts: HashMap<String, Vec<PodPhase>>,
    termination_lag: HashMap<String, u32>,
    terminating: HashMap<ObjectKey, u32>,
    failures: HashMap<(Operation, String), ClusterError>,
    watchers: Vec<Watcher>,
}

impl Inner {
    fn take_failure(&mut self, op: Operation, name: &str) -> Result<(), ClusterError> {
        match self.failures.remove(&(op, name.to_owned())) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn record(&mut self, op: Operation, kind: &str, namespace: &str, name: &str) {
        self.journal.push(Mutation {
            op,
            kind: kind.to_owned(),
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        });
    }

    fn emit(&mut self, key: &ObjectKey, kind: WatchEventKind, object: &Resource) {
        self.watchers.retain(Watcher::is_live);
        for watcher in self.watchers.iter().filter(|w| &w.key == key) {
            // A closed receiver is pruned on the next emit.
            let _ = watcher.tx.send(Ok(WatchEvent {
                kind,
                object: object.clone(),
            }));
        }
    }

    fn set_phase(&mut self, key: &ObjectKey, phase: PodPhase) -> bool {
        let Some(object) = self.objects.get_mut(key) else {
            return false;
        };
        object.set_phase(phase);
        let object = object.clone();
        self.emit(key, WatchEventKind::Modified, &object);
        true
    }
}

/// In-process [`ClusterApi`].
///
/// Records every mutating call, can replay scripted phase transitions for
/// newly created objects, can keep deleted objects visible for a number of
/// reads to mimic graceful termination, and tracks live watch subscriptions.
pub struct MemoryCluster {
    inner: Mutex<Inner>,
    latency: Duration,
}

impl MemoryCluster {
    /// Create an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            latency: Duration::ZERO,
        }
    }

    /// Delay every call by `latency`.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn state(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    /// Seed an object without journaling it.
    pub fn insert(&self, namespace: &str, resource: Resource) {
        let key = object_key(&resource.kind, namespace, resource.name());
        self.state().objects.insert(key, resource);
    }

    /// Current state of an object, ignoring termination lag.
    #[must_use]
    pub fn object(&self, kind: &str, namespace: &str, name: &str) -> Option<Resource> {
        self.state()
            .objects
            .get(&object_key(kind, namespace, name))
            .cloned()
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().objects.len()
    }

    /// Whether no objects are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state().objects.is_empty()
    }

    /// Report `phase` for an object and notify its watchers.
    ///
    /// Returns `false` if the object does not exist.
    pub fn set_phase(&self, kind: &str, namespace: &str, name: &str, phase: PodPhase) -> bool {
        self.state()
            .set_phase(&object_key(kind, namespace, name), phase)
    }

    /// Phases to report, in order, when an object named `name` is created.
    pub fn script_phases(&self, name: &str, phases: impl IntoIterator<Item = PodPhase>) {
        self.state()
            .scripts
            .insert(name.to_owned(), phases.into_iter().collect());
    }

    /// Keep an object named `name` visible to `reads` further `get` calls
    /// after it is deleted.
    pub fn termination_lag(&self, name: &str, reads: u32) {
        self.state()
            .termination_lag
            .insert(name.to_owned(), reads);
    }

    /// Fail the next `op` on an object named `name` with `error`.
    pub fn fail_next(&self, op: Operation, name: &str, error: ClusterError) {
        self.state().failures.insert((op, name.to_owned()), error);
    }

    /// Mutating calls made so far, in order.
    #[must_use]
    pub fn mutations(&self) -> Vec<Mutation> {
        self.state().journal.clone()
    }

    /// Number of mutating calls of kind `op`.
    #[must_use]
    pub fn count(&self, op: Operation) -> usize {
        self.state().journal.iter().filter(|m| m.op == op).count()
    }

    /// Forget the mutation journal.
    pub fn clear_mutations(&self) {
        self.state().journal.clear();
    }

    /// Number of watch subscriptions still open.
    #[must_use]
    pub fn active_watches(&self) -> usize {
        let mut state = self.state();
        state.watchers.retain(Watcher::is_live);
        state.watchers.len()
    }
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCluster")
            .field("objects", &self.len())
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn get(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Resource>, ClusterError> {
        self.delay().await;
        let mut state = self.state();
        state.take_failure(Operation::Get, name)?;

        let key = object_key(kind, namespace, name);
        match state.terminating.get(&key).copied() {
            Some(0) => {
                state.terminating.remove(&key);
                if let Some(object) = state.objects.remove(&key) {
                    state.emit(&key, WatchEventKind::Deleted, &object);
                }
                Ok(None)
            }
            Some(remaining) => {
                state.terminating.insert(key.clone(), remaining - 1);
                Ok(state.objects.get(&key).cloned())
            }
            None => Ok(state.objects.get(&key).cloned()),
        }
    }

    async fn create(
        &self,
        kind: &str,
        namespace: &str,
        resource: &Resource,
    ) -> Result<(), ClusterError> {
        self.delay().await;
        let mut state = self.state();
        let name = resource.name();
        state.take_failure(Operation::Create, name)?;

        let key = object_key(kind, namespace, name);
        if state.objects.contains_key(&key) {
            return Err(ClusterError::AlreadyExists {
                kind: kind.to_owned(),
                name: name.to_owned(),
            });
        }

        let mut stored = resource.clone();
        stored.metadata.namespace = Some(namespace.to_owned());
        stored.metadata.extra.insert(
            "uid".to_owned(),
            Value::String(ulid::Ulid::new().to_string().to_lowercase()),
        );
        stored.metadata.extra.insert(
            "resourceVersion".to_owned(),
            Value::String((state.journal.len() + 1).to_string()),
        );

        state.record(Operation::Create, kind, namespace, name);
        state.objects.insert(key.clone(), stored.clone());
        state.emit(&key, WatchEventKind::Added, &stored);
        trace!(kind, namespace, name, "object created");

        if let Some(phases) = state.scripts.get(name).cloned() {
            for phase in phases {
                state.set_phase(&key, phase);
            }
        }

        Ok(())
    }

    async fn update(
        &self,
        kind: &str,
        namespace: &str,
        resource: &Resource,
    ) -> Result<(), ClusterError> {
        self.delay().await;
        let mut state = self.state();
        let name = resource.name();
        state.take_failure(Operation::Update, name)?;

        let key = object_key(kind, namespace, name);
        let Some(existing) = state.objects.get(&key) else {
            return Err(ClusterError::NotFound {
                kind: kind.to_owned(),
                name: name.to_owned(),
            });
        };

        let mut stored = resource.clone();
        stored.metadata.namespace = Some(namespace.to_owned());
        stored.metadata.extra = existing.metadata.extra.clone();
        stored.status = existing.status.clone();

        state.record(Operation::Update, kind, namespace, name);
        state.objects.insert(key.clone(), stored.clone());
        state.emit(&key, WatchEventKind::Modified, &stored);
        Ok(())
    }

    async fn delete(&self, kind: &str, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.delay().await;
        let mut state = self.state();
        state.take_failure(Operation::Delete, name)?;

        let key = object_key(kind, namespace, name);
        if !state.objects.contains_key(&key) {
            return Err(ClusterError::NotFound {
                kind: kind.to_owned(),
                name: name.to_owned(),
            });
        }

        state.record(Operation::Delete, kind, namespace, name);

        let lag = state.termination_lag.get(name).copied().unwrap_or(0);
        if lag > 0 {
            state.terminating.entry(key).or_insert(lag);
        } else if let Some(object) = state.objects.remove(&key) {
            state.terminating.remove(&key);
            state.emit(&key, WatchEventKind::Deleted, &object);
        }

        trace!(kind, namespace, name, "object deleted");
        Ok(())
    }

    async fn watch(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<WatchSubscription, ClusterError> {
        self.delay().await;
        let mut state = self.state();
        state.take_failure(Operation::Watch, name)?;

        let cancel = CancellationToken::new();
        let (tx, subscription) = WatchSubscription::channel(cancel.clone());
        state.watchers.push(Watcher {
            key: object_key(kind, namespace, name),
            tx,
            cancel,
        });
        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn pod(name: &str) -> Resource {
        Resource::new("v1", "Pod", name).with_field("spec", json!({ "restartPolicy": "Never" }))
    }

    #[tokio::test]
    async fn create_get_delete_are_journaled() {
        let cluster = MemoryCluster::new();
        cluster.create("Pod", "ns", &pod("a")).await.unwrap();

        let live = cluster.get("Pod", "ns", "a").await.unwrap().unwrap();
        assert!(live.metadata.extra.contains_key("uid"));
        assert!(live.same_spec(&pod("a")));

        assert!(matches!(
            cluster.create("Pod", "ns", &pod("a")).await,
            Err(ClusterError::AlreadyExists { .. })
        ));

        cluster.delete("Pod", "ns", "a").await.unwrap();
        assert!(cluster.get("Pod", "ns", "a").await.unwrap().is_none());
        assert!(matches!(
            cluster.delete("Pod", "ns", "a").await,
            Err(ClusterError::NotFound { .. })
        ));

        let ops: Vec<_> = cluster.mutations().into_iter().map(|m| m.op).collect();
        assert_eq!(ops, vec![Operation::Create, Operation::Delete]);
    }

    #[tokio::test]
    async fn namespaces_are_separate() {
        let cluster = MemoryCluster::new();
        cluster.create("Pod", "one", &pod("a")).await.unwrap();
        assert!(cluster.get("Pod", "two", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn termination_lag_keeps_object_visible() {
        let cluster = MemoryCluster::new();
        cluster.termination_lag("a", 2);
        cluster.create("Pod", "ns", &pod("a")).await.unwrap();
        cluster.delete("Pod", "ns", "a").await.unwrap();

        assert!(cluster.get("Pod", "ns", "a").await.unwrap().is_some());
        assert!(cluster.get("Pod", "ns", "a").await.unwrap().is_some());
        assert!(cluster.get("Pod", "ns", "a").await.unwrap().is_none());
        assert!(cluster.is_empty());
    }

    #[tokio::test]
    async fn scripted_phases_reach_watchers() {
        let cluster = MemoryCluster::new();
        cluster.script_phases("seed", [PodPhase::Pending, PodPhase::Succeeded]);

        let mut watch = cluster.watch("Pod", "ns", "seed").await.unwrap();
        assert_eq!(cluster.active_watches(), 1);
        cluster.create("Pod", "ns", &pod("seed")).await.unwrap();

        let added = watch.next().await.unwrap().unwrap();
        assert_eq!(added.kind, WatchEventKind::Added);

        let phases: Vec<_> = [watch.next().await, watch.next().await]
            .into_iter()
            .map(|e| e.unwrap().unwrap().object.phase())
            .collect();
        assert_eq!(phases, vec![Some(PodPhase::Pending), Some(PodPhase::Succeeded)]);

        drop(watch);
        assert_eq!(cluster.active_watches(), 0);
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let cluster = MemoryCluster::new();
        cluster.fail_next(Operation::Create, "a", ClusterError::api("quota exceeded"));

        assert_eq!(
            cluster.create("Pod", "ns", &pod("a")).await,
            Err(ClusterError::api("quota exceeded"))
        );
        cluster.create("Pod", "ns", &pod("a")).await.unwrap();
        assert_eq!(cluster.count(Operation::Create), 1);
    }

    #[tokio::test]
    async fn update_keeps_server_fields() {
        let cluster = MemoryCluster::new();
        cluster.create("Pod", "ns", &pod("a")).await.unwrap();
        let before = cluster.object("Pod", "ns", "a").unwrap();

        let changed = pod("a").with_field("spec", json!({ "restartPolicy": "Always" }));
        cluster.update("Pod", "ns", &changed).await.unwrap();

        let after = cluster.object("Pod", "ns", "a").unwrap();
        assert_eq!(after.metadata.extra, before.metadata.extra);
        assert!(after.same_spec(&changed));
    }
}
