//! Instances: parameterised executions of a playbook.

mod repository;

pub use repository::InstanceRepository;

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};
use crate::types::{InstanceId, InstanceStatus, PlaybookId};

/// One parameterised execution of a playbook.
///
/// `(playbook_id, id)` is the identity and never changes after creation. The
/// serialised field names are the persisted record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Playbook this instance executes.
    pub playbook_id: PlaybookId,
    /// Identifier within the playbook.
    pub id: InstanceId,
    /// When the instance was created.
    #[serde(rename = "created_time")]
    pub created_at: DateTime<Utc>,
    /// When the instance becomes eligible for the expiration sweep.
    #[serde(rename = "expired_at")]
    pub expires_at: DateTime<Utc>,
    /// Variables used to render the playbook's manifests.
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    /// Advisory lock flag.
    #[serde(default)]
    pub lock: bool,
    /// Lifecycle status.
    #[serde(default)]
    pub status: InstanceStatus,
}

impl Instance {
    /// Create a new instance in the `New` status, expiring `expiration` after now.
    #[must_use]
    pub fn new(
        playbook_id: PlaybookId,
        id: InstanceId,
        vars: BTreeMap<String, String>,
        expiration: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            playbook_id,
            id,
            created_at: now,
            expires_at: now + expiration,
            vars,
            lock: false,
            status: InstanceStatus::New,
        }
    }

    /// `playbook/id`, used in logs and messages.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.playbook_id, self.id)
    }

    /// Whether the instance has expired as of `as_of` (inclusive).
    #[must_use]
    pub fn is_expired(&self, as_of: DateTime<Utc>) -> bool {
        self.expires_at <= as_of
    }

    /// Set the lock flag. Locking a locked instance is a no-op.
    pub fn lock(&mut self) {
        self.lock = true;
    }

    /// Clear the lock flag.
    ///
    /// Fails with [`ControlError::NotLocked`] if the instance is not locked.
    pub fn unlock(&mut self) -> ControlResult<()> {
        if !self.lock {
            return Err(ControlError::NotLocked(self.qualified_name()));
        }
        self.lock = false;
        Ok(())
    }

    /// Variables for message templates: the instance's own plus
    /// `playbook_id`, `instance_id`, `id` and `instance_status`.
    #[must_use]
    pub fn message_vars(&self) -> BTreeMap<String, String> {
        let mut vars = self.vars.clone();
        vars.insert("playbook_id".to_owned(), self.playbook_id.to_string());
        vars.insert("instance_id".to_owned(), self.id.to_string());
        vars.insert("id".to_owned(), self.id.to_string());
        vars.insert("instance_status".to_owned(), self.status.to_string());
        vars
    }
}
