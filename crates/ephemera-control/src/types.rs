//! Core types for ephemera-control.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a playbook.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlaybookId(String);

impl PlaybookId {
    /// Create a new playbook ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlaybookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for PlaybookId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PlaybookId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for PlaybookId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Identifier of an instance, unique within its playbook.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Create a new instance ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for InstanceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InstanceId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for InstanceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Persisted lifecycle status of an instance.
///
/// ```text
/// New ──▶ Deploying ──▶ Deployed ──▶ Deleting ──▶ (removed)
///             │                          │
///             └────────▶ Error ◀─────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Created, never deployed.
    #[default]
    New,
    /// A deploy run is in flight.
    Deploying,
    /// The last deploy run succeeded.
    Deployed,
    /// A delete run is in flight.
    Deleting,
    /// The last deploy or delete run failed.
    Error,
}

impl InstanceStatus {
    /// Get the status name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Deploying => "deploying",
            Self::Deployed => "deployed",
            Self::Deleting => "deleting",
            Self::Error => "error",
        }
    }

    /// Whether a reconciliation run currently owns the instance.
    #[must_use]
    pub const fn is_in_progress(&self) -> bool {
        matches!(self, Self::Deploying | Self::Deleting)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "deploying" => Ok(Self::Deploying),
            "deployed" => Ok(Self::Deployed),
            "deleting" => Ok(Self::Deleting),
            "error" => Ok(Self::Error),
            _ => Err(format!("unknown instance status: {s}")),
        }
    }
}
