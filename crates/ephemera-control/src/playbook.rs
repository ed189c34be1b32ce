//! Playbooks, tasks and the manifest set they reference.

use std::collections::BTreeMap;

use ephemera_store::path;
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};
use crate::types::PlaybookId;

/// A named resource-definition template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Name tasks refer to.
    pub name: String,
    /// Template text.
    pub template: String,
}

/// All manifests known to the control plane, keyed by name.
///
/// Loaded once at startup and immutable afterwards.
#[derive(Debug, Clone, Default)]
pub struct ManifestSet {
    manifests: BTreeMap<String, Manifest>,
}

impl ManifestSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a manifest, replacing any with the same name.
    pub fn insert(&mut self, name: impl Into<String>, template: impl Into<String>) {
        let name = name.into();
        self.manifests.insert(
            name.clone(),
            Manifest {
                name,
                template: template.into(),
            },
        );
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.insert(name, template);
        self
    }

    /// Look up a manifest by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Manifest> {
        self.manifests.get(name)
    }

    /// Whether a manifest with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.manifests.contains_key(name)
    }

    /// Number of manifests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.manifests.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty()
    }
}

/// One stage of a playbook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Task name, used in logs.
    pub name: String,
    /// Ordinary manifests, reconciled in order. Duplicates are kept.
    #[serde(default)]
    pub manifests: Vec<String>,
    /// A single manifest reconciled as a run-to-completion resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_manifest: Option<String>,
}

impl Task {
    /// The pod manifest name, if set and non-empty.
    ///
    /// When present it takes precedence over `manifests`.
    #[must_use]
    pub fn pod_manifest(&self) -> Option<&str> {
        self.pod_manifest.as_deref().filter(|name| !name.is_empty())
    }

    /// Number of steps this task expands into.
    #[must_use]
    pub fn step_count(&self) -> usize {
        if self.pod_manifest().is_some() {
            1
        } else {
            self.manifests.len()
        }
    }
}

/// A reusable deployment template: an ordered list of tasks over named
/// manifests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playbook {
    /// Unique identifier.
    pub id: PlaybookId,
    /// Human-readable name.
    pub name: String,
    /// Variable names accepted by "set variable".
    #[serde(default)]
    pub vars: Vec<String>,
    /// Tasks in execution order.
    pub tasks: Vec<Task>,
    /// Optional template for the success notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Playbook {
    /// Parse a playbook from YAML. The result is not validated.
    pub fn from_yaml(text: &str) -> ControlResult<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| ControlError::validation(format!("invalid playbook: {e}")))
    }

    /// Check structural invariants and that every referenced manifest exists.
    pub fn validate(&self, manifests: &ManifestSet) -> ControlResult<()> {
        if !path::is_segment(self.id.as_str()) {
            return Err(ControlError::validation(format!(
                "playbook id {:?} must be non-empty and contain no '/'",
                self.id.as_str()
            )));
        }
        if self.name.is_empty() {
            return Err(ControlError::validation(format!(
                "playbook {} has no name",
                self.id
            )));
        }
        if self.tasks.is_empty() {
            return Err(ControlError::validation(format!(
                "playbook {} has no tasks",
                self.id
            )));
        }

        for task in &self.tasks {
            let referenced: Vec<&str> = match task.pod_manifest() {
                Some(pod) => vec![pod],
                None => task.manifests.iter().map(String::as_str).collect(),
            };

            if referenced.is_empty() {
                return Err(ControlError::validation(format!(
                    "task {} of playbook {} references no manifests",
                    task.name, self.id
                )));
            }

            if let Some(missing) = referenced.iter().find(|name| !manifests.contains(name)) {
                return Err(ControlError::validation(format!(
                    "task {} of playbook {} references unknown manifest {missing}",
                    task.name, self.id
                )));
            }
        }

        Ok(())
    }

    /// Whether `key` is a declared variable.
    #[must_use]
    pub fn declares_var(&self, key: &str) -> bool {
        self.vars.iter().any(|v| v == key)
    }

    /// Number of steps the playbook expands into.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.tasks.iter().map(Task::step_count).sum()
    }
}

/// Validated playbooks together with the manifest set they reference.
#[derive(Debug, Clone, Default)]
pub struct PlaybookCatalog {
    playbooks: BTreeMap<PlaybookId, Playbook>,
    manifests: ManifestSet,
}

impl PlaybookCatalog {
    /// Create a catalog over `manifests` with no playbooks.
    #[must_use]
    pub fn new(manifests: ManifestSet) -> Self {
        Self {
            playbooks: BTreeMap::new(),
            manifests,
        }
    }

    /// Validate and register a playbook, replacing any with the same id.
    pub fn insert(&mut self, playbook: Playbook) -> ControlResult<()> {
        playbook.validate(&self.manifests)?;
        self.playbooks.insert(playbook.id.clone(), playbook);
        Ok(())
    }

    /// Look up a playbook.
    #[must_use]
    pub fn get(&self, id: &PlaybookId) -> Option<&Playbook> {
        self.playbooks.get(id)
    }

    /// The shared manifest set.
    #[must_use]
    pub const fn manifests(&self) -> &ManifestSet {
        &self.manifests
    }

    /// Registered playbooks, ordered by id.
    pub fn playbooks(&self) -> impl Iterator<Item = &Playbook> {
        self.playbooks.values()
    }

    /// Number of registered playbooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.playbooks.len()
    }

    /// Whether no playbooks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.playbooks.is_empty()
    }
}
