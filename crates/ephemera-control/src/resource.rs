//! Rendered cluster resource objects.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::render::RenderError;

/// Object metadata.
///
/// Only the fields the control plane reasons about are typed; everything
/// else (uid, resourceVersion, timestamps) lands in `extra` and is ignored
/// when comparing a live object to a desired one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Object name, unique per kind and namespace.
    pub name: String,
    /// Namespace, if set in the manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Server-assigned and otherwise untyped fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// A deserialized resource definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// API group and version.
    pub api_version: String,
    /// Resource kind.
    pub kind: String,
    /// Metadata.
    pub metadata: ObjectMeta,
    /// Observed state, written by the cluster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
    /// Every other top-level field (`spec`, `data`, ...).
    #[serde(flatten)]
    pub body: BTreeMap<String, Value>,
}

impl Resource {
    /// Create a resource with empty body.
    #[must_use]
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            metadata: ObjectMeta {
                name: name.into(),
                ..ObjectMeta::default()
            },
            status: None,
            body: BTreeMap::new(),
        }
    }

    /// Set a top-level body field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.body.insert(key.into(), value);
        self
    }

    /// Deserialize rendered manifest text.
    ///
    /// Fails with [`RenderError::Malformed`] when the text is not a resource
    /// with a kind and a name.
    pub fn from_yaml(text: &str) -> Result<Self, RenderError> {
        let resource: Self =
            serde_yaml::from_str(text).map_err(|e| RenderError::Malformed(e.to_string()))?;

        if resource.kind.is_empty() {
            return Err(RenderError::Malformed("resource has no kind".to_owned()));
        }
        if resource.metadata.name.is_empty() {
            return Err(RenderError::Malformed(format!(
                "{} has no metadata.name",
                resource.kind
            )));
        }

        Ok(resource)
    }

    /// Object name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Whether `self` and `other` describe the same desired state.
    ///
    /// Compares kind, apiVersion, name, labels, annotations and every body
    /// field. Status, namespace and server-assigned metadata are ignored.
    #[must_use]
    pub fn same_spec(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.api_version == other.api_version
            && self.metadata.name == other.metadata.name
            && self.metadata.labels == other.metadata.labels
            && self.metadata.annotations == other.metadata.annotations
            && self.body == other.body
    }

    /// Reported `status.phase`, if any.
    #[must_use]
    pub fn phase(&self) -> Option<PodPhase> {
        self.status
            .as_ref()
            .and_then(|s| s.get("phase"))
            .and_then(Value::as_str)
            .map(PodPhase::parse)
    }

    /// Record a phase in `status.phase`, keeping other status fields.
    pub fn set_phase(&mut self, phase: PodPhase) {
        let status = self
            .status
            .get_or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Value::Object(map) = status {
            map.insert("phase".to_owned(), Value::String(phase.as_str().to_owned()));
        } else {
            *status = serde_json::json!({ "phase": phase.as_str() });
        }
    }

    /// Reported `status.replicas`, if any.
    #[must_use]
    pub fn replicas(&self) -> Option<u64> {
        self.status
            .as_ref()
            .and_then(|s| s.get("replicas"))
            .and_then(Value::as_u64)
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.metadata.name)
    }
}

/// Lifecycle phase of a run-to-completion resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PodPhase {
    /// Accepted, not yet running.
    Pending,
    /// Running.
    Running,
    /// Completed successfully.
    Succeeded,
    /// Completed with a failure.
    Failed,
    /// State could not be determined.
    Unknown,
}

impl PodPhase {
    /// Parse a phase name. Unrecognised names map to `Unknown`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// Get the phase name as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Unknown => "Unknown",
        }
    }

    /// Whether the phase ends a provisioning wait.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Unknown)
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    const DEPLOYMENT: &str = r"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web-main
  labels:
    app: web
spec:
  replicas: 1
  template:
    spec:
      containers:
        - name: web
          image: web:main
";

    #[test]
    fn parses_rendered_yaml() {
        let resource = Resource::from_yaml(DEPLOYMENT).unwrap();
        assert_eq!(resource.kind, "Deployment");
        assert_eq!(resource.api_version, "apps/v1");
        assert_eq!(resource.name(), "web-main");
        assert_eq!(resource.metadata.labels["app"], "web");
        assert_eq!(resource.body["spec"]["replicas"], json!(1));
        assert_eq!(resource.to_string(), "Deployment/web-main");
    }

    #[rstest]
    #[case::not_a_mapping("- a\n- b\n")]
    #[case::no_kind("apiVersion: v1\nkind: ''\nmetadata:\n  name: x\n")]
    #[case::no_name("apiVersion: v1\nkind: Pod\nmetadata:\n  name: ''\n")]
    #[case::no_metadata("apiVersion: v1\nkind: Pod\n")]
    fn rejects_non_resources(#[case] text: &str) {
        assert!(matches!(
            Resource::from_yaml(text),
            Err(RenderError::Malformed(_))
        ));
    }

    #[test]
    fn same_spec_ignores_server_fields() {
        let desired = Resource::from_yaml(DEPLOYMENT).unwrap();
        let mut live = desired.clone();
        live.metadata.namespace = Some("previews".to_owned());
        live.metadata
            .extra
            .insert("uid".to_owned(), json!("01HZX"));
        live.metadata
            .extra
            .insert("resourceVersion".to_owned(), json!("42"));
        live.status = Some(json!({ "replicas": 1 }));

        assert!(desired.same_spec(&live));
    }

    #[test]
    fn same_spec_detects_body_and_label_changes() {
        let desired = Resource::from_yaml(DEPLOYMENT).unwrap();

        let mut image = desired.clone();
        image.body.insert("spec".to_owned(), json!({ "replicas": 2 }));
        assert!(!desired.same_spec(&image));

        let mut labels = desired.clone();
        labels
            .metadata
            .labels
            .insert("tier".to_owned(), "frontend".to_owned());
        assert!(!desired.same_spec(&labels));
    }

    #[test]
    fn phase_and_replicas_read_status() {
        let mut pod = Resource::new("v1", "Pod", "seed");
        assert_eq!(pod.phase(), None);

        pod.status = Some(json!({ "replicas": 3 }));
        pod.set_phase(PodPhase::Running);
        assert_eq!(pod.phase(), Some(PodPhase::Running));
        assert_eq!(pod.replicas(), Some(3));
    }

    #[rstest]
    #[case("Pending", PodPhase::Pending, false)]
    #[case("Running", PodPhase::Running, false)]
    #[case("Succeeded", PodPhase::Succeeded, true)]
    #[case("Failed", PodPhase::Failed, true)]
    #[case("Unknown", PodPhase::Unknown, true)]
    #[case("Evicted", PodPhase::Unknown, true)]
    fn phase_parsing(#[case] name: &str, #[case] phase: PodPhase, #[case] terminal: bool) {
        assert_eq!(PodPhase::parse(name), phase);
        assert_eq!(phase.is_terminal(), terminal);
    }
}
