//! Phase bodies.
//!
//! Each phase of the installation is handled by a dedicated module exposing
//! `execute` (mutate and converge) and `plan` (describe the mutations without
//! performing them). Bodies never check predecessors or health; the
//! orchestrator does that before calling in.

mod compute;
mod core_services;
mod datalake_workloads;
mod foundation;
mod ingress;
mod release_group;
mod storage;
mod stream_workloads;

use std::time::Duration;

use tracing::{info, warn};

use lakeforge_common::Error;

use crate::codes;
use crate::context::InstallContext;
use crate::diagnostics;
use crate::model::{Blocker, Evidence, InstallationState, Phase};
use crate::plan::Plan;
use crate::poller::{wait_for_pods, PodWait};

/// What a phase body produced, returned even on partial failure
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseOutcome {
    /// Evidence of this run
    pub evidence: Evidence,
    /// Blockers raised by the body
    pub blockers: Vec<Blocker>,
}

impl PhaseOutcome {
    /// Empty outcome for a phase
    pub fn new(phase: Phase) -> Self {
        Self {
            evidence: Evidence::new(phase),
            blockers: Vec::new(),
        }
    }

    /// Add a blocker
    pub fn block(&mut self, blocker: Blocker) {
        self.blockers.push(blocker);
    }

    /// Record an unexpected error as an execution failure
    pub fn fail(&mut self, error: &Error) {
        let phase = self.evidence.phase;
        self.blockers.push(Blocker::failure(
            codes::EXECUTION_FAILED,
            format!("phase {} failed: {}", phase, error),
        ));
    }

    /// Whether any execution failure was raised
    pub fn has_failure(&self) -> bool {
        self.blockers.iter().any(|b| !b.is_gap())
    }
}

/// Run the body of `phase`
pub async fn execute(ctx: &InstallContext, phase: Phase) -> PhaseOutcome {
    let mut outcome = PhaseOutcome::new(phase);
    info!(phase = %phase, "executing phase body");

    let result = match phase {
        Phase::Foundation => foundation::execute(ctx, &mut outcome).await,
        Phase::Storage => storage::execute(ctx, &mut outcome).await,
        Phase::Compute => compute::execute(ctx, &mut outcome).await,
        Phase::CoreServices => core_services::execute(ctx, &mut outcome).await,
        Phase::StreamWorkloads => stream_workloads::execute(ctx, &mut outcome).await,
        Phase::DatalakeWorkloads => datalake_workloads::execute(ctx, &mut outcome).await,
        Phase::Ingress => ingress::execute(ctx, &mut outcome).await,
    };

    if let Err(e) = result {
        warn!(phase = %phase, error = %e, "phase body failed");
        outcome.fail(&e);
    }
    outcome
}

/// Render the plan of `phase` against the current state
pub fn plan(ctx: &InstallContext, phase: Phase, state: &InstallationState) -> Plan {
    match phase {
        Phase::Foundation => foundation::plan(ctx, state),
        Phase::Storage => storage::plan(ctx, state),
        Phase::Compute => compute::plan(ctx),
        Phase::CoreServices => release_group::plan(phase, &ctx.config.core_services),
        Phase::StreamWorkloads => release_group::plan(phase, &ctx.config.stream),
        Phase::DatalakeWorkloads => datalake_workloads::plan(ctx),
        Phase::Ingress => ingress::plan(ctx),
    }
}

/// Wait for pods and record the wait in evidence under `key`.
///
/// Returns the wait so the caller can classify a timeout.
async fn await_pods(
    ctx: &InstallContext,
    outcome: &mut PhaseOutcome,
    key: &str,
    namespace: &str,
    selector: Option<&str>,
    max_wait: Duration,
) -> PodWait {
    let wait = wait_for_pods(ctx, namespace, selector, max_wait).await;
    outcome.evidence.record(key, wait.outcome.ready);
    outcome
        .evidence
        .record(&format!("{}Ms", key), wait.outcome.elapsed.as_millis() as u64);
    wait
}

/// `PODS_NOT_READY` failure with diagnostics for a timed-out wait
async fn pods_not_ready(
    ctx: &InstallContext,
    namespace: &str,
    what: &str,
    wait: &PodWait,
) -> Blocker {
    let diagnostics = diagnostics::collect(ctx, namespace, wait.report.as_ref()).await;
    let base = format!(
        "{} in namespace {} not Ready after {}s",
        what,
        namespace,
        wait.outcome.elapsed.as_secs()
    );
    Blocker::failure(codes::PODS_NOT_READY, diagnostics.attach(&base))
}
