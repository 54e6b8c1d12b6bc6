//! Phase Orchestrator.
//!
//! One invocation advances at most one phase:
//!
//! 1. probe the installation state
//! 2. pick the target (explicit, or the first unsatisfied phase)
//! 3. refuse to run it while a predecessor is unsatisfied
//! 4. stop for approval before any mutation
//! 5. gate cluster-side phases on platform health
//! 6. run the body, re-probe the phase and reduce everything to a status
//!
//! `run_phase` never returns a raw error; every outcome is classified.

use tracing::{info, warn};

use lakeforge_common::Error;

use crate::codes;
use crate::context::InstallContext;
use crate::health;
use crate::model::{Blocker, Evidence, InstallResult, InstallationState, Phase};
use crate::phases::{self, PhaseOutcome};
use crate::probe;

/// What the orchestrator does with a probed state, before touching anything
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Nothing to run; the result is final
    Finished(InstallResult),
    /// The target cannot run until `predecessor` is satisfied
    Blocked {
        /// Target phase
        phase: Phase,
        /// First unsatisfied predecessor
        predecessor: Phase,
    },
    /// The target may run once approved
    NeedsApproval(Phase),
    /// The target may run now
    Execute(Phase),
}

/// Decide what to do with `target` given `state`.
///
/// Only ever yields `Execute(p)` when every predecessor of `p` is satisfied.
pub fn decide(state: &InstallationState, target: Option<Phase>, approved: bool) -> Decision {
    let phase = match target.or_else(|| state.first_unsatisfied()) {
        Some(phase) => phase,
        None => return Decision::Finished(InstallResult::completed()),
    };

    if state.is_satisfied(phase) {
        return Decision::Finished(InstallResult::completed_phase(phase, None));
    }
    if let Some(predecessor) = state.first_unsatisfied_predecessor(phase) {
        return Decision::Blocked { phase, predecessor };
    }
    if !approved {
        return Decision::NeedsApproval(phase);
    }
    Decision::Execute(phase)
}

/// Probe the installation state without changing anything
pub async fn probe_state(ctx: &InstallContext) -> Result<InstallationState, Error> {
    probe::probe(ctx).await
}

/// Run one orchestrator invocation
pub async fn run_phase(ctx: &InstallContext, target: Option<Phase>) -> InstallResult {
    let state = match probe::probe(ctx).await {
        Ok(state) => state,
        Err(e) => {
            warn!(error = %e, "probe failed");
            return InstallResult::error(
                target,
                None,
                vec![Blocker::failure(
                    codes::PROBE_FAILED,
                    format!("could not probe installation state: {}", e),
                )],
            );
        }
    };

    let phase = match decide(&state, target, ctx.approved) {
        Decision::Finished(result) => {
            info!(status = %result.status, phase = ?result.phase, "nothing to do");
            return result;
        }
        Decision::Blocked { phase, predecessor } => {
            info!(phase = %phase, predecessor = %predecessor, "predecessor unsatisfied");
            return blocked_on_predecessor(ctx, &state, phase, predecessor).await;
        }
        Decision::NeedsApproval(phase) => {
            info!(phase = %phase, "approval required");
            return InstallResult::needs_input(phase, phases::plan(ctx, phase, &state));
        }
        Decision::Execute(phase) => phase,
    };

    if phase.requires_cluster() {
        match health::check(ctx).await {
            Err(e) => {
                warn!(phase = %phase, error = %e, "health gate could not query the cluster");
                return InstallResult::error(
                    Some(phase),
                    None,
                    vec![Blocker::failure(
                        codes::HEALTH_CHECK_FAILED,
                        format!("health gate could not query the cluster: {}", e),
                    )],
                );
            }
            Ok(verdict) if !verdict.healthy => {
                info!(phase = %phase, blockers = verdict.blockers.len(), "health gate closed");
                return classify(phase, None, verdict.blockers);
            }
            Ok(_) => {}
        }
    }

    info!(phase = %phase, "running phase");
    let outcome = phases::execute(ctx, phase).await;
    let satisfied = match probe::probe_phase(ctx, phase).await {
        Ok(reading) => Ok(reading.satisfied),
        Err(e) => Err(Blocker::failure(
            codes::PROBE_FAILED,
            format!("could not re-probe phase {}: {}", phase, e),
        )),
    };

    let result = reduce(phase, outcome, satisfied);
    info!(phase = %phase, status = %result.status, blockers = result.blockers.len(), "phase finished");
    result
}

async fn blocked_on_predecessor(
    ctx: &InstallContext,
    state: &InstallationState,
    phase: Phase,
    predecessor: Phase,
) -> InstallResult {
    let mut blockers = vec![Blocker::gap(
        codes::PREDECESSOR_UNSATISFIED,
        predecessor,
        format!(
            "phase {} requires phase {} to be satisfied first",
            phase, predecessor
        ),
    )];

    // Read-only; a failing query just leaves the extra context out
    if state.flag(Phase::Foundation, "reachable") {
        match health::check(ctx).await {
            Ok(verdict) => blockers.extend(verdict.blockers),
            Err(e) => warn!(error = %e, "health context unavailable for blocked result"),
        }
    }
    InstallResult::blocked(phase, None, blockers)
}

/// Gap-only blockers block; anything else is an error
fn classify(phase: Phase, evidence: Option<Evidence>, blockers: Vec<Blocker>) -> InstallResult {
    if blockers.iter().all(Blocker::is_gap) {
        InstallResult::blocked(phase, evidence, blockers)
    } else {
        InstallResult::error(Some(phase), evidence, blockers)
    }
}

/// Reduce a body outcome and the re-probed completeness to a result
pub fn reduce(phase: Phase, outcome: PhaseOutcome, satisfied: Result<bool, Blocker>) -> InstallResult {
    let PhaseOutcome {
        evidence,
        mut blockers,
    } = outcome;

    match satisfied {
        Err(blocker) => blockers.push(blocker),
        Ok(true) if blockers.is_empty() => {
            return InstallResult::completed_phase(phase, Some(evidence));
        }
        Ok(false) if blockers.is_empty() => blockers.push(Blocker::failure(
            codes::PHASE_INCOMPLETE,
            format!(
                "phase {} finished without blockers but its completeness check does not hold",
                phase
            ),
        )),
        Ok(_) => {}
    }
    classify(phase, Some(evidence), blockers)
}
