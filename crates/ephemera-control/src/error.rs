//! Error types for ephemera-control.

use std::time::Duration;

use ephemera_store::StoreError;

use crate::render::RenderError;

/// Result type alias using [`ControlError`].
pub type ControlResult<T> = Result<T, ControlError>;

/// Errors surfaced by the control plane.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A looked-up instance or path does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stored record could not be parsed.
    #[error("malformed data at {path}: {source}")]
    MalformedData {
        /// Store path of the record.
        path: String,
        /// Parse failure.
        #[source]
        source: serde_json::Error,
    },

    /// Unlock was requested on an instance that is not locked.
    #[error("instance {0} is not locked")]
    NotLocked(String),

    /// A playbook, task, manifest reference or request is structurally invalid.
    #[error("validation error: {0}")]
    Validation(String),

    /// The instance's playbook is not in the catalog.
    #[error("playbook not found: {0}")]
    PlaybookNotFound(String),

    /// A manifest could not be rendered into a resource.
    #[error("failed to render manifest {manifest}: {source}")]
    Render {
        /// Manifest name.
        manifest: String,
        /// Render failure.
        #[source]
        source: RenderError,
    },

    /// A reconciliation step failed.
    #[error("step {step} failed: {source}")]
    Step {
        /// Step identifier (`kind/name`).
        step: String,
        /// Step failure.
        #[source]
        source: StepError,
    },

    /// Another deploy or delete is already in flight for the instance.
    #[error("concurrent operation on instance {instance}: {detail}")]
    ConcurrentOperation {
        /// Instance identifier (`playbook/id`).
        instance: String,
        /// What was observed.
        detail: String,
    },

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A notification was not accepted by its destination.
    #[error("notification error: {0}")]
    Notification(String),
}

impl ControlError {
    /// Create a validation error.
    #[must_use]
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not-found error.
    #[must_use]
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether this error came from a step during reconciliation.
    #[must_use]
    pub const fn is_step_failure(&self) -> bool {
        matches!(self, Self::Step { .. })
    }

    /// The underlying step error, if any.
    #[must_use]
    pub const fn step_error(&self) -> Option<&StepError> {
        match self {
            Self::Step { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Errors reported by a [`ClusterApi`](crate::cluster::ClusterApi).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusterError {
    /// The object does not exist.
    #[error("{kind} {name} not found")]
    NotFound {
        /// Resource kind.
        kind: String,
        /// Resource name.
        name: String,
    },

    /// An object with the same name already exists.
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Resource kind.
        kind: String,
        /// Resource name.
        name: String,
    },

    /// The API rejected the request.
    #[error("cluster API error: {0}")]
    Api(String),

    /// The watch stream failed.
    #[error("watch error: {0}")]
    Watch(String),
}

impl ClusterError {
    /// Create an API error.
    #[must_use]
    pub fn api(msg: impl Into<String>) -> Self {
        Self::Api(msg.into())
    }
}

/// Why a single step failed.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// A cluster API call failed; the cluster error is kept verbatim.
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// The provisioning resource reached the `Failed` phase.
    #[error("setup of {name} failed")]
    SetupFailed {
        /// Resource name.
        name: String,
    },

    /// The provisioning resource reached the `Unknown` phase.
    #[error("state of {name} is unknown")]
    StateUnknown {
        /// Resource name.
        name: String,
    },

    /// No terminal phase was observed in time.
    #[error("timed out after {after:?} waiting for {name}")]
    Timeout {
        /// Resource name.
        name: String,
        /// Configured wait.
        after: Duration,
    },

    /// The wait was cancelled through the step context.
    #[error("wait for {name} was cancelled")]
    Cancelled {
        /// Resource name.
        name: String,
    },

    /// The event stream ended before a terminal phase.
    #[error("watch on {name} closed before completion")]
    WatchClosed {
        /// Resource name.
        name: String,
    },

    /// The watched resource was deleted before completing.
    #[error("{name} was deleted before completion")]
    ResourceGone {
        /// Resource name.
        name: String,
    },

    /// A replaced resource did not terminate within the poll budget.
    #[error("{name} still has {replicas} replica(s) after deletion")]
    StillTerminating {
        /// Resource name.
        name: String,
        /// Last observed replica count.
        replicas: u64,
    },
}
