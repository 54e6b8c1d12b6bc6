//! Phase orchestration engine for lakeforge
//!
//! This crate decides which installation phase runs next, gates it on
//! platform health, executes it with bounded self-healing and classifies the
//! outcome into an [`InstallResult`]. It talks to the outside world only
//! through the traits in [`clients`].
//!
//! Related crates:
//! - `lakeforge-common`: configuration, errors and Kubernetes helpers
//! - `lakeforge-backend`: kube-rs, helm and cloud CLI implementations of the clients

pub mod clients;
pub mod codes;
pub mod context;
pub mod diagnostics;
pub mod health;
pub mod model;
pub mod orchestrator;
pub mod phases;
pub mod plan;
pub mod poller;
pub mod probe;
pub mod repair;
pub mod tasks;

#[cfg(test)]
pub(crate) mod testing;

pub use clients::{ClusterFacts, MutationClient, ProvisioningClient, ReleaseManager};
pub use context::{ContextBuilder, InstallContext};
pub use model::{Blocker, Evidence, InstallResult, InstallationState, NextStep, Phase, PhaseState, Status};
pub use orchestrator::{probe_state, run_phase};
pub use plan::Plan;

// Re-export common error types
pub use lakeforge_common::{Error, Result};
