//! Playbook expansion and ordered execution.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info};

use crate::error::{ControlError, ControlResult};
use crate::playbook::{ManifestSet, Playbook};
use crate::render::ManifestRenderer;
use crate::resource::Resource;
use crate::step::{ProvisioningStep, ResourceStep, Step, StepContext};

/// An ordered list of steps planned from a playbook.
///
/// All manifests are rendered while planning, so a template problem is
/// reported before anything touches the cluster.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    playbook: String,
    steps: Vec<Step>,
}

impl Orchestrator {
    /// Render every task of `playbook` with `vars` and plan the steps.
    ///
    /// Tasks are expanded in declaration order. A task with a pod manifest
    /// yields one provisioning step; any other task yields one resource step
    /// per manifest entry, duplicates included.
    pub fn build(
        playbook: &Playbook,
        vars: &BTreeMap<String, String>,
        manifests: &ManifestSet,
        renderer: &dyn ManifestRenderer,
    ) -> ControlResult<Self> {
        let mut steps = Vec::with_capacity(playbook.step_count());

        for task in &playbook.tasks {
            if let Some(pod) = task.pod_manifest() {
                let resource = render(pod, vars, manifests, renderer)?;
                steps.push(Step::Provisioning(ProvisioningStep::new(resource)));
            } else {
                for name in &task.manifests {
                    let resource = render(name, vars, manifests, renderer)?;
                    steps.push(Step::Resource(ResourceStep::new(resource)));
                }
            }
            debug!(playbook_id = %playbook.id, task = %task.name, "task planned");
        }

        Ok(Self {
            playbook: playbook.id.to_string(),
            steps,
        })
    }

    /// Planned steps in deploy order.
    #[must_use]
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Number of planned steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether no steps were planned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step's deploy in order, stopping at the first failure.
    ///
    /// Steps that already succeeded are not rolled back.
    pub async fn deploy(&self, ctx: &StepContext) -> ControlResult<()> {
        for (index, step) in self.steps.iter().enumerate() {
            debug!(playbook_id = %self.playbook, step = %step.name(), index, "deploying step");
            step.deploy(ctx).await.map_err(|source| ControlError::Step {
                step: step.name(),
                source,
            })?;
        }

        info!(playbook_id = %self.playbook, steps = self.steps.len(), "deploy complete");
        Ok(())
    }

    /// Run every step's destroy in deploy order, stopping at the first
    /// failure.
    ///
    /// After a partial deploy the steps that ran are torn down before the
    /// first step that never created anything fails. A resource planned more
    /// than once is only destroyed once.
    pub async fn destroy(&self, ctx: &StepContext) -> ControlResult<()> {
        let mut destroyed = HashSet::new();

        for (index, step) in self.steps.iter().enumerate() {
            if !destroyed.insert(step.name()) {
                debug!(playbook_id = %self.playbook, step = %step.name(), index, "already destroyed");
                continue;
            }

            debug!(playbook_id = %self.playbook, step = %step.name(), index, "destroying step");
            step.destroy(ctx).await.map_err(|source| ControlError::Step {
                step: step.name(),
                source,
            })?;
        }

        info!(playbook_id = %self.playbook, steps = self.steps.len(), "destroy complete");
        Ok(())
    }
}

fn render(
    name: &str,
    vars: &BTreeMap<String, String>,
    manifests: &ManifestSet,
    renderer: &dyn ManifestRenderer,
) -> ControlResult<Resource> {
    let manifest = manifests
        .get(name)
        .ok_or_else(|| ControlError::validation(format!("unknown manifest {name}")))?;

    renderer
        .render(&manifest.template, vars)
        .and_then(|text| Resource::from_yaml(&text))
        .map_err(|source| ControlError::Render {
            manifest: name.to_owned(),
            source,
        })
}
