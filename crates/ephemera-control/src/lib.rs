//! Ephemera control plane
//!
//! This crate turns playbooks (ordered lists of parameterised resource
//! templates) into running cluster resources, and tracks each instance of a
//! playbook through a persisted lifecycle.
//!
//! # Architecture
//!
//! - **Playbooks** ([`playbook`]): validated templates over a shared
//!   manifest set
//! - **Steps** ([`step`]): one rendered resource reconciled against the
//!   cluster, either create-or-replace or run-to-completion
//! - **Orchestrator** ([`deployment::Orchestrator`]): plans the steps of a
//!   playbook and runs them in order
//! - **Service** ([`deployment::DeploymentService`]): status transitions,
//!   notifications and the expiration sweep
//!
//! The cluster, the key/value store, template rendering and notification
//! delivery are reached through traits ([`ClusterApi`], [`Store`],
//! [`ManifestRenderer`], [`Notifier`]).
//!
//! # Instance lifecycle
//!
//! ```text
//! New ──▶ Deploying ──▶ Deployed ──▶ Deleting ──▶ (removed)
//!             │                          │
//!             └────────▶ Error ◀─────────┘
//! ```
//!
//! Entering `Deploying` or `Deleting` is a compare-and-swap on the stored
//! record, so two runs racing on one instance cannot both start.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use ephemera_control::{ControlConfig, DeploymentService, MemoryCluster, PlaybookCatalog};
//!
//! let config = ControlConfig::load()?;
//! let service = DeploymentService::from_config(
//!     &config,
//!     Arc::new(PlaybookCatalog::default()),
//!     Arc::new(MemoryCluster::new()),
//! )
//! .await?;
//!
//! let instance = service
//!     .create_instance("web".into(), "pr-42".into(), Default::default())
//!     .await?;
//! service.deploy_and_notify(&instance).await?;
//! ```
//!
//! [`Store`]: ephemera_store::Store

#![forbid(unsafe_code)]

pub mod cluster;
pub mod config;
pub mod deployment;
pub mod error;
pub mod instance;
pub mod notify;
pub mod playbook;
pub mod render;
pub mod resource;
pub mod step;
pub mod types;

// Re-export commonly used types at the crate root
pub use cluster::{ClusterApi, MemoryCluster, WatchEvent, WatchEventKind, WatchSubscription};
pub use config::ControlConfig;
pub use deployment::{DeploymentService, ExpirationSweeper, Orchestrator, SweepReport};
pub use error::{ClusterError, ControlError, ControlResult, StepError};
pub use instance::{Instance, InstanceRepository};
pub use notify::{LogNotifier, MemoryNotifier, Notification, NotificationLevel, Notifier, WebhookNotifier};
pub use playbook::{Manifest, ManifestSet, Playbook, PlaybookCatalog, Task};
pub use render::{HandlebarsRenderer, ManifestRenderer, RenderError};
pub use resource::{ObjectMeta, PodPhase, Resource};
pub use step::{ProvisioningStep, ResourceStep, Step, StepContext, StepKind};
pub use types::{InstanceId, InstanceStatus, PlaybookId};
