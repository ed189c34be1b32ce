//! Test fixtures for control plane integration tests.

use ephemera_control::{ManifestSet, Playbook, PlaybookCatalog, PlaybookId, Task};

/// A ConfigMap named `<name>-{{branch}}`.
pub fn config_map(name: &str) -> String {
    format!(
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {name}-{{{{branch}}}}\n  labels:\n    app: {name}\ndata:\n  branch: \"{{{{branch}}}}\"\n"
    )
}

/// A Deployment named `app-{{branch}}` running `{{image}}`.
pub fn deployment() -> String {
    "apiVersion: apps/v1
kind: Deployment
metadata:
  name: app-{{branch}}
spec:
  replicas: 1
  template:
    spec:
      containers:
        - name: app
          image: \"{{image}}\"
"
    .to_owned()
}

/// A run-to-completion Pod named `seed-{{branch}}`.
pub fn seed_pod() -> String {
    "apiVersion: v1
kind: Pod
metadata:
  name: seed-{{branch}}
spec:
  restartPolicy: Never
  containers:
    - name: seed
      image: seed:latest
"
    .to_owned()
}

/// Manifests referenced by the standard playbooks.
pub fn manifests() -> ManifestSet {
    ManifestSet::new()
        .with("a", config_map("a"))
        .with("b", config_map("b"))
        .with("app", deployment())
        .with("seed", seed_pod())
        .with("tagged", config_map("tagged").replace("{{branch}}\"", "{{tag}}\""))
}

/// Builder for test playbooks.
pub struct PlaybookBuilder {
    id: String,
    vars: Vec<String>,
    tasks: Vec<Task>,
    message: Option<String>,
}

impl PlaybookBuilder {
    /// Creates a builder for a playbook with the given ID.
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_owned(),
            vars: vec!["branch".to_owned()],
            tasks: vec![],
            message: None,
        }
    }

    /// Declares an additional variable.
    pub fn var(mut self, name: &str) -> Self {
        self.vars.push(name.to_owned());
        self
    }

    /// Adds a task reconciling `manifests` in order.
    pub fn task(mut self, name: &str, manifests: &[&str]) -> Self {
        self.tasks.push(Task {
            name: name.to_owned(),
            manifests: manifests.iter().map(|m| (*m).to_owned()).collect(),
            pod_manifest: None,
        });
        self
    }

    /// Adds a task running `pod` to completion.
    pub fn pod_task(mut self, name: &str, pod: &str) -> Self {
        self.tasks.push(Task {
            name: name.to_owned(),
            manifests: vec![],
            pod_manifest: Some(pod.to_owned()),
        });
        self
    }

    /// Sets the success message template.
    pub fn message(mut self, template: &str) -> Self {
        self.message = Some(template.to_owned());
        self
    }

    /// Builds the playbook.
    pub fn build(self) -> Playbook {
        Playbook {
            id: PlaybookId::new(&self.id),
            name: format!("{} playbook", self.id),
            vars: self.vars,
            tasks: self.tasks,
            message: self.message,
        }
    }
}

/// Playbooks used by most tests:
///
/// - `p1`: one task over `a, b, b`
/// - `web`: seed pod, then `a` and `app`; accepts `image`; custom message
/// - `tagged`: renders a variable instances never set
pub fn standard_playbooks() -> Vec<Playbook> {
    vec![
        PlaybookBuilder::new("p1").task("t1", &["a", "b", "b"]).build(),
        PlaybookBuilder::new("web")
            .var("image")
            .pod_task("seed", "seed")
            .task("app", &["a", "app"])
            .message("{{playbook_id}}/{{instance_id}} is {{instance_status}} at {{branch}}")
            .build(),
        PlaybookBuilder::new("tagged").task("t1", &["tagged"]).build(),
    ]
}

/// Catalog over [`manifests`] holding `playbooks`.
pub fn catalog(playbooks: Vec<Playbook>) -> PlaybookCatalog {
    let mut catalog = PlaybookCatalog::new(manifests());
    for playbook in playbooks {
        catalog.insert(playbook).unwrap();
    }
    catalog
}
