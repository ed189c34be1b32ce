//! Store-backed persistence for instances.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use ephemera_store::{path, Store};
use tracing::{debug, warn};

use crate::error::{ControlError, ControlResult};
use crate::types::{InstanceId, InstanceStatus, PlaybookId};

use super::Instance;

/// Persists instances under `<root>/instances/<playbook_id>/<instance_id>`.
#[derive(Clone)]
pub struct InstanceRepository {
    store: Arc<dyn Store>,
    root: String,
    expiration: Duration,
}

impl InstanceRepository {
    /// Create a repository rooted at `root`, giving new instances
    /// `expiration_days` before they expire.
    pub fn new(store: Arc<dyn Store>, root: impl Into<String>, expiration_days: u32) -> Self {
        Self {
            store,
            root: root.into(),
            expiration: Duration::days(i64::from(expiration_days)),
        }
    }

    /// Prefix holding every instance of every playbook.
    #[must_use]
    pub fn instances_prefix(&self) -> String {
        path::join([self.root.as_str(), "instances"])
    }

    /// Prefix holding every instance of one playbook.
    #[must_use]
    pub fn playbook_prefix(&self, playbook_id: &PlaybookId) -> String {
        path::join([self.root.as_str(), "instances", playbook_id.as_str()])
    }

    /// Store key of a single instance.
    #[must_use]
    pub fn key(&self, playbook_id: &PlaybookId, id: &InstanceId) -> String {
        path::join([
            self.root.as_str(),
            "instances",
            playbook_id.as_str(),
            id.as_str(),
        ])
    }

    /// Create and persist a new instance in the `New` status.
    ///
    /// Fails with [`ControlError::Validation`] if the identity is taken or
    /// either id is not a single path segment.
    pub async fn create(
        &self,
        playbook_id: PlaybookId,
        id: InstanceId,
        vars: BTreeMap<String, String>,
    ) -> ControlResult<Instance> {
        for (what, value) in [("playbook id", playbook_id.as_str()), ("instance id", id.as_str())] {
            if !path::is_segment(value) {
                return Err(ControlError::validation(format!(
                    "{what} {value:?} must be non-empty and contain no '/'"
                )));
            }
        }

        let instance = Instance::new(playbook_id, id, vars, self.expiration);
        let key = self.key(&instance.playbook_id, &instance.id);
        let record = encode(&instance)?;

        if !self.store.compare_and_swap(&key, None, &record).await? {
            return Err(ControlError::validation(format!(
                "instance {} already exists",
                instance.qualified_name()
            )));
        }

        debug!(instance = %instance.qualified_name(), "instance created");
        Ok(instance)
    }

    /// Load one instance.
    pub async fn find_by_id(
        &self,
        playbook_id: &PlaybookId,
        id: &InstanceId,
    ) -> ControlResult<Instance> {
        let key = self.key(playbook_id, id);
        let raw = self
            .store
            .value(&key)
            .await?
            .ok_or_else(|| ControlError::not_found(format!("instance {playbook_id}/{id}")))?;

        decode(&key, &raw)
    }

    /// Load every instance of a playbook, ordered by instance id.
    ///
    /// Fails with [`ControlError::NotFound`] if the playbook has no instances.
    pub async fn find_by_playbook_id(
        &self,
        playbook_id: &PlaybookId,
    ) -> ControlResult<Vec<Instance>> {
        let prefix = self.playbook_prefix(playbook_id);
        let entries = self.store.values(&prefix).await?;

        if entries.is_empty() {
            return Err(ControlError::not_found(format!(
                "instances of playbook {playbook_id}"
            )));
        }

        entries
            .iter()
            .map(|(rel, raw)| decode(&path::join([prefix.as_str(), rel.as_str()]), raw))
            .collect()
    }

    /// Upsert an instance keyed by `(playbook_id, id)`.
    pub async fn save(&self, instance: &Instance) -> ControlResult<()> {
        let key = self.key(&instance.playbook_id, &instance.id);
        self.store.set_value(&key, &encode(instance)?).await?;
        Ok(())
    }

    /// Remove an instance record.
    pub async fn delete(&self, playbook_id: &PlaybookId, id: &InstanceId) -> ControlResult<()> {
        let key = self.key(playbook_id, id);
        if !self.store.delete(&key).await? {
            return Err(ControlError::not_found(format!("instance {playbook_id}/{id}")));
        }
        Ok(())
    }

    /// Set the lock flag and persist. Idempotent.
    pub async fn lock(&self, playbook_id: &PlaybookId, id: &InstanceId) -> ControlResult<Instance> {
        let mut instance = self.find_by_id(playbook_id, id).await?;
        instance.lock();
        self.save(&instance).await?;
        Ok(instance)
    }

    /// Clear the lock flag and persist.
    ///
    /// Fails with [`ControlError::NotLocked`] if the instance is not locked.
    pub async fn unlock(
        &self,
        playbook_id: &PlaybookId,
        id: &InstanceId,
    ) -> ControlResult<Instance> {
        let mut instance = self.find_by_id(playbook_id, id).await?;
        instance.unlock()?;
        self.save(&instance).await?;
        Ok(instance)
    }

    /// Every `Deployed` instance whose expiry is at or before `as_of`.
    ///
    /// Records that fail to parse are logged and skipped so one bad entry
    /// cannot block the sweep.
    pub async fn all_deployed_and_expired(
        &self,
        as_of: DateTime<Utc>,
    ) -> ControlResult<Vec<Instance>> {
        let prefix = self.instances_prefix();
        let entries = self.store.values(&prefix).await?;

        let mut expired = Vec::new();
        for (rel, raw) in &entries {
            let key = path::join([prefix.as_str(), rel.as_str()]);
            match decode(&key, raw) {
                Ok(instance)
                    if instance.status == InstanceStatus::Deployed
                        && instance.is_expired(as_of) =>
                {
                    expired.push(instance);
                }
                Ok(_) => {}
                Err(e) => warn!(key = %key, error = %e, "skipping unreadable instance record"),
            }
        }

        Ok(expired)
    }

    /// Move `instance` to status `to`, atomically with respect to other writers.
    ///
    /// Refuses with [`ControlError::ConcurrentOperation`] when either the
    /// caller's copy or the stored record is in one of the `busy` statuses, or
    /// when the stored record changes between the read and the write.
    /// Returns the instance as persisted.
    pub async fn transition(
        &self,
        instance: &Instance,
        to: InstanceStatus,
        busy: &[InstanceStatus],
    ) -> ControlResult<Instance> {
        let key = self.key(&instance.playbook_id, &instance.id);
        let current = self.store.value(&key).await?;

        let stored_status = match &current {
            Some(raw) => Some(decode(&key, raw)?.status),
            None => None,
        };

        for status in std::iter::once(instance.status).chain(stored_status) {
            if busy.contains(&status) {
                return Err(ControlError::ConcurrentOperation {
                    instance: instance.qualified_name(),
                    detail: format!("instance is already {status}"),
                });
            }
        }

        let mut next = instance.clone();
        next.status = to;
        let record = encode(&next)?;

        if !self
            .store
            .compare_and_swap(&key, current.as_deref(), &record)
            .await?
        {
            return Err(ControlError::ConcurrentOperation {
                instance: instance.qualified_name(),
                detail: "instance record changed while updating status".to_owned(),
            });
        }

        debug!(instance = %next.qualified_name(), status = %to, "status transition persisted");
        Ok(next)
    }
}

impl std::fmt::Debug for InstanceRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRepository")
            .field("root", &self.root)
            .field("expiration", &self.expiration)
            .finish_non_exhaustive()
    }
}

fn encode(instance: &Instance) -> ControlResult<String> {
    serde_json::to_string(instance).map_err(|e| ControlError::Serialisation(e.to_string()))
}

fn decode(key: &str, raw: &str) -> ControlResult<Instance> {
    serde_json::from_str(raw).map_err(|source| ControlError::MalformedData {
        path: key.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use ephemera_store::MemoryStore;
    use rstest::rstest;

    use super::*;

    fn repository() -> (MemoryStore, InstanceRepository) {
        let store = MemoryStore::new();
        let repo = InstanceRepository::new(Arc::new(store.clone()), "ephemera", 7);
        (store, repo)
    }

    fn vars() -> BTreeMap<String, String> {
        BTreeMap::from([("branch".to_owned(), "main".to_owned())])
    }

    #[test]
    fn key_layout() {
        let (_, repo) = repository();
        assert_eq!(
            repo.key(&PlaybookId::new("web"), &InstanceId::new("pr-1")),
            "ephemera/instances/web/pr-1"
        );
        assert_eq!(repo.playbook_prefix(&PlaybookId::new("web")), "ephemera/instances/web");
        assert_eq!(repo.instances_prefix(), "ephemera/instances");
    }

    #[tokio::test]
    async fn save_then_find_round_trips() {
        let (_, repo) = repository();
        let mut instance = repo
            .create(PlaybookId::new("web"), InstanceId::new("pr-1"), vars())
            .await
            .unwrap();
        instance.lock = true;
        instance.status = InstanceStatus::Deployed;
        repo.save(&instance).await.unwrap();

        let found = repo
            .find_by_id(&PlaybookId::new("web"), &InstanceId::new("pr-1"))
            .await
            .unwrap();
        assert_eq!(found, instance);
    }

    #[tokio::test]
    async fn create_sets_expiry_and_rejects_duplicates() {
        let (_, repo) = repository();
        let instance = repo
            .create(PlaybookId::new("web"), InstanceId::new("pr-1"), vars())
            .await
            .unwrap();
        assert_eq!(instance.expires_at - instance.created_at, Duration::days(7));

        let duplicate = repo
            .create(PlaybookId::new("web"), InstanceId::new("pr-1"), BTreeMap::new())
            .await;
        assert!(matches!(duplicate, Err(ControlError::Validation(_))));
    }

    #[tokio::test]
    async fn missing_and_malformed_are_distinct() {
        let (store, repo) = repository();
        let missing = repo
            .find_by_id(&PlaybookId::new("web"), &InstanceId::new("nope"))
            .await;
        assert!(matches!(missing, Err(ControlError::NotFound(_))));

        store
            .set_value("ephemera/instances/web/broken", "{not json")
            .await
            .unwrap();
        let broken = repo
            .find_by_id(&PlaybookId::new("web"), &InstanceId::new("broken"))
            .await;
        assert!(matches!(broken, Err(ControlError::MalformedData { .. })));

        let listed = repo.find_by_playbook_id(&PlaybookId::new("web")).await;
        assert!(matches!(listed, Err(ControlError::MalformedData { .. })));

        let none = repo.find_by_playbook_id(&PlaybookId::new("api")).await;
        assert!(matches!(none, Err(ControlError::NotFound(_))));
    }

    #[tokio::test]
    async fn find_by_playbook_keeps_same_ids_in_other_playbooks_apart() {
        let (_, repo) = repository();
        for playbook in ["web", "api"] {
            for id in ["pr-1", "pr-2"] {
                repo.create(PlaybookId::new(playbook), InstanceId::new(id), vars())
                    .await
                    .unwrap();
            }
        }

        let web = repo.find_by_playbook_id(&PlaybookId::new("web")).await.unwrap();
        assert_eq!(web.len(), 2);
        assert!(web.iter().all(|i| i.playbook_id.as_str() == "web"));
    }

    #[rstest]
    #[case::nested_playbook("p1/x", "1")]
    #[case::nested_instance("p1", "x/1")]
    #[case::trailing_slash("p1", "1/")]
    #[case::empty_instance("p1", "")]
    #[case::empty_playbook("", "1")]
    #[tokio::test]
    async fn create_rejects_ids_that_are_not_one_segment(
        #[case] playbook: &str,
        #[case] id: &str,
    ) {
        let (store, repo) = repository();

        let created = repo
            .create(PlaybookId::new(playbook), InstanceId::new(id), vars())
            .await;

        assert!(matches!(created, Err(ControlError::Validation(_))));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn identities_sharing_a_joined_path_stay_apart() {
        let (_, repo) = repository();
        repo.create(PlaybookId::new("p1"), InstanceId::new("x"), vars())
            .await
            .unwrap();

        assert!(repo
            .create(PlaybookId::new("p1/x"), InstanceId::new("1"), vars())
            .await
            .is_err());

        let listed = repo.find_by_playbook_id(&PlaybookId::new("p1")).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id.as_str(), "x");
    }

    #[tokio::test]
    async fn lock_and_unlock() {
        let (_, repo) = repository();
        let pb = PlaybookId::new("web");
        let id = InstanceId::new("pr-1");
        repo.create(pb.clone(), id.clone(), vars()).await.unwrap();

        assert!(matches!(
            repo.unlock(&pb, &id).await,
            Err(ControlError::NotLocked(_))
        ));

        assert!(repo.lock(&pb, &id).await.unwrap().lock);
        assert!(repo.lock(&pb, &id).await.unwrap().lock);
        assert!(!repo.unlock(&pb, &id).await.unwrap().lock);
        assert!(!repo.find_by_id(&pb, &id).await.unwrap().lock);
    }

    #[tokio::test]
    async fn expired_boundary_is_inclusive() {
        let (store, repo) = repository();
        let as_of = Utc::now();

        let mut at_boundary = repo
            .create(PlaybookId::new("web"), InstanceId::new("edge"), vars())
            .await
            .unwrap();
        at_boundary.status = InstanceStatus::Deployed;
        at_boundary.expires_at = as_of;
        repo.save(&at_boundary).await.unwrap();

        let mut later = repo
            .create(PlaybookId::new("api"), InstanceId::new("edge"), vars())
            .await
            .unwrap();
        later.status = InstanceStatus::Deployed;
        later.expires_at = as_of + Duration::seconds(1);
        repo.save(&later).await.unwrap();

        let mut not_deployed = repo
            .create(PlaybookId::new("web"), InstanceId::new("new"), vars())
            .await
            .unwrap();
        not_deployed.expires_at = as_of - Duration::days(1);
        repo.save(&not_deployed).await.unwrap();

        store
            .set_value("ephemera/instances/web/garbage", "[]")
            .await
            .unwrap();

        let expired = repo.all_deployed_and_expired(as_of).await.unwrap();
        assert_eq!(expired, vec![at_boundary]);
    }

    #[tokio::test]
    async fn transition_guards_busy_statuses() {
        let (_, repo) = repository();
        let instance = repo
            .create(PlaybookId::new("web"), InstanceId::new("pr-1"), vars())
            .await
            .unwrap();

        let busy = [InstanceStatus::Deploying, InstanceStatus::Deleting];
        let deploying = repo
            .transition(&instance, InstanceStatus::Deploying, &busy)
            .await
            .unwrap();
        assert_eq!(deploying.status, InstanceStatus::Deploying);

        // The caller's stale copy still says New, the store says Deploying.
        let again = repo
            .transition(&instance, InstanceStatus::Deploying, &busy)
            .await;
        assert!(matches!(
            again,
            Err(ControlError::ConcurrentOperation { .. })
        ));
    }

    #[tokio::test]
    async fn concurrent_transitions_have_one_winner() {
        let (_, repo) = repository();
        let instance = repo
            .create(PlaybookId::new("web"), InstanceId::new("pr-1"), vars())
            .await
            .unwrap();

        let busy = [InstanceStatus::Deploying, InstanceStatus::Deleting];
        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = repo.clone();
            let instance = instance.clone();
            handles.push(tokio::spawn(async move {
                repo.transition(&instance, InstanceStatus::Deploying, &busy)
                    .await
            }));
        }

        let mut applied = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => applied += 1,
                Err(ControlError::ConcurrentOperation { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(applied, 1);
    }
}
