//! Data model shared by the prober, the phase bodies and the orchestrator.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::codes;

/// One ordered stage of the installation dependency chain
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Managed cluster and initial worker capacity
    Foundation,
    /// Object storage, identity policy, storage class
    Storage,
    /// Autoscaling controller and node pools
    Compute,
    /// Stateful platform services
    CoreServices,
    /// Streaming applications
    StreamWorkloads,
    /// Datalake applications
    DatalakeWorkloads,
    /// Ingress controller and routes
    Ingress,
}

impl Phase {
    /// All phases in dependency order
    pub const ALL: [Phase; 7] = [
        Phase::Foundation,
        Phase::Storage,
        Phase::Compute,
        Phase::CoreServices,
        Phase::StreamWorkloads,
        Phase::DatalakeWorkloads,
        Phase::Ingress,
    ];

    /// Position in dependency order
    pub fn index(self) -> usize {
        Self::ALL
            .iter()
            .position(|p| *p == self)
            .unwrap_or_default()
    }

    /// Phases that must be satisfied before this one may run
    pub fn predecessors(self) -> &'static [Phase] {
        &Self::ALL[..self.index()]
    }

    /// Stable snake_case name
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Foundation => "foundation",
            Phase::Storage => "storage",
            Phase::Compute => "compute",
            Phase::CoreServices => "core_services",
            Phase::StreamWorkloads => "stream_workloads",
            Phase::DatalakeWorkloads => "datalake_workloads",
            Phase::Ingress => "ingress",
        }
    }

    /// Whether the phase mutates a running cluster and so sits behind the health gate
    pub fn requires_cluster(self) -> bool {
        self != Phase::Foundation
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| {
                let names: Vec<_> = Phase::ALL.iter().map(|p| p.as_str()).collect();
                format!("unknown phase '{}', expected one of: {}", s, names.join(", "))
            })
    }
}

/// Probe reading for a single phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseState {
    /// Whether the phase's completeness rule holds right now
    pub satisfied: bool,
    /// What the probe found (existence flags, names, release statuses)
    pub details: Map<String, Value>,
}

impl PhaseState {
    /// A reading with the given verdict and no details
    pub fn new(satisfied: bool) -> Self {
        Self {
            satisfied,
            details: Map::new(),
        }
    }

    /// Add a detail entry
    pub fn detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// Snapshot of current reality, computed fresh on every invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstallationState {
    /// Reading per phase
    pub phases: BTreeMap<Phase, PhaseState>,
}

impl InstallationState {
    /// Build a state from per-phase readings
    pub fn from_readings(readings: impl IntoIterator<Item = (Phase, PhaseState)>) -> Self {
        Self {
            phases: readings.into_iter().collect(),
        }
    }

    /// Whether a phase is satisfied; missing readings count as unsatisfied
    pub fn is_satisfied(&self, phase: Phase) -> bool {
        self.phases.get(&phase).map(|s| s.satisfied).unwrap_or(false)
    }

    /// Reading for a phase
    pub fn get(&self, phase: Phase) -> Option<&PhaseState> {
        self.phases.get(&phase)
    }

    /// First phase, in dependency order, whose rule does not hold
    pub fn first_unsatisfied(&self) -> Option<Phase> {
        Phase::ALL.into_iter().find(|p| !self.is_satisfied(*p))
    }

    /// First predecessor of `phase` that is not satisfied
    pub fn first_unsatisfied_predecessor(&self, phase: Phase) -> Option<Phase> {
        phase
            .predecessors()
            .iter()
            .copied()
            .find(|p| !self.is_satisfied(*p))
    }

    /// A boolean detail of a phase reading
    pub fn flag(&self, phase: Phase, key: &str) -> bool {
        self.get(phase)
            .and_then(|s| s.details.get(key))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// One observation or mutation recorded during a phase run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceEntry {
    /// camelCase key, e.g. `capacityCreated`
    pub key: String,
    /// Recorded value
    pub value: Value,
}

/// Append-only record of what one phase run observed and mutated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    /// Phase the evidence belongs to
    pub phase: Phase,
    /// When the phase body started
    pub started_at: DateTime<Utc>,
    /// Entries in recording order
    pub entries: Vec<EvidenceEntry>,
}

impl Evidence {
    /// Empty evidence for a phase, stamped now
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            started_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    /// Append an entry
    pub fn record(&mut self, key: &str, value: impl Into<Value>) {
        self.entries.push(EvidenceEntry {
            key: key.to_string(),
            value: value.into(),
        });
    }

    /// Latest value recorded under `key`
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.key == key)
            .map(|e| &e.value)
    }

    /// Latest boolean recorded under `key`
    pub fn flag(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    /// Number of entries recorded under `key`
    pub fn count(&self, key: &str) -> usize {
        self.entries.iter().filter(|e| e.key == key).count()
    }
}

/// A classified, user-facing reason a phase did not complete
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blocker {
    /// Stable code, see [`crate::codes`]
    pub code: String,
    /// Human readable message with object names and diagnostics
    pub message: String,
    /// Phase that has to be fixed, present only for dependency gaps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Phase>,
}

impl Blocker {
    /// A dependency gap owned by `owner`
    pub fn gap(code: &str, owner: Phase, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            owner: Some(owner),
        }
    }

    /// An execution failure inside the current phase
    pub fn failure(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            owner: None,
        }
    }

    /// Whether this blocker is a dependency gap
    pub fn is_gap(&self) -> bool {
        self.owner.is_some()
    }
}

impl fmt::Display for Blocker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Terminal status of one orchestrator invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// The target phase ran and is now satisfied
    CompletedPhase,
    /// A dependency of the target phase is missing or broken
    BlockedPhase,
    /// The target phase failed internally
    Error,
    /// Mutation requires explicit approval
    NeedsInput,
    /// Every phase is satisfied
    Completed,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::CompletedPhase => "completed_phase",
            Status::BlockedPhase => "blocked_phase",
            Status::Error => "error",
            Status::NeedsInput => "needs_input",
            Status::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Remediation action attached to a blocked result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    /// Fix the named phase, then invoke again
    Fix,
}

/// Where to go after a blocked result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextStep {
    /// What to do
    pub action: NextAction,
    /// Phase to revisit
    pub phase: Phase,
}

/// Sole output contract of one orchestrator invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallResult {
    /// Terminal status
    pub status: Status,
    /// Target phase, absent for `completed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    /// Evidence of the phase body, absent when no body ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Evidence>,
    /// Classified reasons for a non-completed status
    pub blockers: Vec<Blocker>,
    /// Remediation pointer, present only for `blocked_phase`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<NextStep>,
    /// Rendered plan, present only for `needs_input`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<crate::plan::Plan>,
}

impl InstallResult {
    /// Every phase is satisfied
    pub fn completed() -> Self {
        Self {
            status: Status::Completed,
            phase: None,
            evidence: None,
            blockers: Vec::new(),
            next: None,
            plan: None,
        }
    }

    /// The target phase is satisfied
    pub fn completed_phase(phase: Phase, evidence: Option<Evidence>) -> Self {
        Self {
            status: Status::CompletedPhase,
            phase: Some(phase),
            ..Self::completed()
        }
        .with_evidence(evidence)
    }

    /// Blocked on a dependency gap. `next` points at the owner of the first
    /// gap blocker, falling back to `phase` itself.
    pub fn blocked(phase: Phase, evidence: Option<Evidence>, blockers: Vec<Blocker>) -> Self {
        let owner = blockers
            .iter()
            .find_map(|b| b.owner)
            .unwrap_or(phase);
        Self {
            status: Status::BlockedPhase,
            phase: Some(phase),
            blockers,
            next: Some(NextStep {
                action: NextAction::Fix,
                phase: owner,
            }),
            ..Self::completed()
        }
        .with_evidence(evidence)
    }

    /// Execution failure
    pub fn error(phase: Option<Phase>, evidence: Option<Evidence>, blockers: Vec<Blocker>) -> Self {
        Self {
            status: Status::Error,
            phase,
            blockers,
            ..Self::completed()
        }
        .with_evidence(evidence)
    }

    /// Approval required before mutating
    pub fn needs_input(phase: Phase, plan: crate::plan::Plan) -> Self {
        Self {
            status: Status::NeedsInput,
            phase: Some(phase),
            blockers: vec![Blocker::failure(
                codes::APPROVAL_REQUIRED,
                format!(
                    "phase {} would perform {} step(s); re-run with approval to apply",
                    phase,
                    plan.steps.len()
                ),
            )],
            plan: Some(plan),
            ..Self::completed()
        }
    }

    fn with_evidence(mut self, evidence: Option<Evidence>) -> Self {
        self.evidence = evidence;
        self
    }

    /// Whether the caller can proceed (`completed` or `completed_phase`)
    pub fn is_success(&self) -> bool {
        matches!(self.status, Status::Completed | Status::CompletedPhase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn predecessors_are_strictly_earlier_phases() {
        assert!(Phase::Foundation.predecessors().is_empty());
        assert_eq!(
            Phase::Compute.predecessors(),
            &[Phase::Foundation, Phase::Storage]
        );
        assert_eq!(Phase::Ingress.predecessors().len(), 6);
    }

    #[rstest]
    #[case("foundation", Phase::Foundation)]
    #[case("core-services", Phase::CoreServices)]
    #[case("Stream_Workloads", Phase::StreamWorkloads)]
    #[case(" ingress ", Phase::Ingress)]
    fn phase_parses_from_cli_spelling(#[case] input: &str, #[case] expected: Phase) {
        assert_eq!(input.parse::<Phase>(), Ok(expected));
    }

    #[test]
    fn unknown_phase_lists_valid_names() {
        let err = "networking".parse::<Phase>().unwrap_err();
        assert!(err.contains("datalake_workloads"));
    }

    #[test]
    fn phase_serializes_snake_case() {
        let json = serde_json::to_string(&Phase::DatalakeWorkloads).unwrap();
        assert_eq!(json, "\"datalake_workloads\"");
    }

    #[test]
    fn first_unsatisfied_follows_dependency_order() {
        let state = InstallationState::from_readings([
            (Phase::Foundation, PhaseState::new(true)),
            (Phase::Storage, PhaseState::new(false)),
            (Phase::Compute, PhaseState::new(true)),
        ]);
        assert_eq!(state.first_unsatisfied(), Some(Phase::Storage));
        assert_eq!(
            state.first_unsatisfied_predecessor(Phase::Compute),
            Some(Phase::Storage)
        );
        assert_eq!(state.first_unsatisfied_predecessor(Phase::Storage), None);
    }

    #[test]
    fn evidence_is_append_only() {
        let mut evidence = Evidence::new(Phase::Compute);
        evidence.record("controllerReady", false);
        evidence.record("controllerReady", true);
        assert_eq!(evidence.flag("controllerReady"), Some(true));
        assert_eq!(evidence.count("controllerReady"), 2);
        assert_eq!(evidence.entries.len(), 2);
    }

    #[test]
    fn blocked_result_points_at_first_gap_owner() {
        let result = InstallResult::blocked(
            Phase::Compute,
            None,
            vec![
                Blocker::failure("SOMETHING", "not a gap"),
                Blocker::gap(codes::NO_READY_NODES, Phase::Foundation, "no ready nodes"),
            ],
        );
        assert_eq!(
            result.next,
            Some(NextStep {
                action: NextAction::Fix,
                phase: Phase::Foundation
            })
        );
    }

    #[test]
    fn result_json_shape() {
        let result = InstallResult::blocked(
            Phase::Compute,
            None,
            vec![Blocker::gap(
                codes::NO_NODES_AVAILABLE,
                Phase::Foundation,
                "cluster has no nodes",
            )],
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "blocked_phase");
        assert_eq!(json["phase"], "compute");
        assert_eq!(json["next"]["action"], "fix");
        assert_eq!(json["next"]["phase"], "foundation");
        assert_eq!(json["blockers"][0]["code"], "NO_NODES_AVAILABLE");
        assert!(json.get("plan").is_none());
    }
}
