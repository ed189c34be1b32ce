//! Reconciliation runs and the instance lifecycle around them.
//!
//! The [`Orchestrator`] turns a playbook into ordered steps and runs them;
//! the [`DeploymentService`] wraps runs with status transitions and
//! notifications; the [`ExpirationSweeper`] removes expired instances.

mod orchestrator;
mod service;
mod sweeper;

pub use orchestrator::Orchestrator;
pub use service::{DeploymentService, SweepReport};
pub use sweeper::ExpirationSweeper;
