//! Cluster API abstraction.
//!
//! The control plane talks to the container orchestrator only through
//! [`ClusterApi`]. The wire protocol is left to implementations;
//! [`MemoryCluster`] is an in-process implementation for tests and embedding.

mod memory;

pub use memory::{MemoryCluster, Mutation, Operation};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ClusterError;
use crate::resource::Resource;

/// Access to cluster objects, addressed by kind, namespace and name.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch an object. `Ok(None)` when it does not exist.
    async fn get(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Resource>, ClusterError>;

    /// Create an object. Fails with [`ClusterError::AlreadyExists`] if the
    /// name is taken.
    async fn create(
        &self,
        kind: &str,
        namespace: &str,
        resource: &Resource,
    ) -> Result<(), ClusterError>;

    /// Replace an existing object.
    async fn update(
        &self,
        kind: &str,
        namespace: &str,
        resource: &Resource,
    ) -> Result<(), ClusterError>;

    /// Delete an object. Fails with [`ClusterError::NotFound`] if absent.
    async fn delete(&self, kind: &str, namespace: &str, name: &str) -> Result<(), ClusterError>;

    /// Subscribe to changes of the named object.
    ///
    /// Only changes made after the call are delivered.
    async fn watch(
        &self,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<WatchSubscription, ClusterError>;
}

/// What happened to a watched object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// The object was created.
    Added,
    /// The object changed.
    Modified,
    /// The object was deleted.
    Deleted,
}

/// A change to a watched object, carrying its state after the change.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent {
    /// Kind of change.
    pub kind: WatchEventKind,
    /// Object state.
    pub object: Resource,
}

/// Sending half of a watch, held by [`ClusterApi`] implementations.
pub type WatchSender = mpsc::UnboundedSender<Result<WatchEvent, ClusterError>>;

/// A live subscription to object changes.
///
/// Dropping the subscription cancels it, so producers can stop delivering
/// as soon as the consumer goes away.
#[derive(Debug)]
pub struct WatchSubscription {
    events: mpsc::UnboundedReceiver<Result<WatchEvent, ClusterError>>,
    cancel: CancellationToken,
}

impl WatchSubscription {
    /// Create a subscription and the sender feeding it.
    ///
    /// Producers should stop sending once `cancel` is cancelled.
    #[must_use]
    pub fn channel(cancel: CancellationToken) -> (WatchSender, Self) {
        let (tx, events) = mpsc::unbounded_channel();
        (tx, Self { events, cancel })
    }

    /// Wait for the next event.
    ///
    /// `None` once the producer has closed the stream or the subscription
    /// was stopped.
    pub async fn next(&mut self) -> Option<Result<WatchEvent, ClusterError>> {
        if self.cancel.is_cancelled() {
            return None;
        }

        tokio::select! {
            () = self.cancel.cancelled() => None,
            event = self.events.recv() => event,
        }
    }

    /// Stop the subscription. Buffered events are discarded.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        self.events.close();
    }

    /// Whether [`stop`](Self::stop) was called or the token was cancelled.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for WatchSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
