//! Rendered plan of the mutations a phase would perform.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::Phase;

/// Kind of mutation a step performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    /// Create a cloud resource if absent
    Create,
    /// Upsert a cluster manifest
    Apply,
    /// Bind a service account to a policy
    Associate,
    /// Install or upgrade a release
    Install,
    /// Wait for convergence
    Wait,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanAction::Create => "create",
            PlanAction::Apply => "apply",
            PlanAction::Associate => "associate",
            PlanAction::Install => "install",
            PlanAction::Wait => "wait",
        };
        f.write_str(s)
    }
}

/// One intended mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    /// What the step does
    pub action: PlanAction,
    /// Object the step acts on
    pub target: String,
    /// Extra context (chart, namespace, sizes)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Ordered mutations of one phase, shown before approval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Phase the plan belongs to
    pub phase: Phase,
    /// Steps in execution order
    pub steps: Vec<PlanStep>,
}

impl Plan {
    /// Empty plan for a phase
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            steps: Vec::new(),
        }
    }

    /// Append a step
    pub fn step(mut self, action: PlanAction, target: impl Into<String>) -> Self {
        self.steps.push(PlanStep {
            action,
            target: target.into(),
            detail: None,
        });
        self
    }

    /// Append a step with detail
    pub fn step_with(
        mut self,
        action: PlanAction,
        target: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        self.steps.push(PlanStep {
            action,
            target: target.into(),
            detail: Some(detail.into()),
        });
        self
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "plan for phase {}:", self.phase)?;
        for (i, step) in self.steps.iter().enumerate() {
            write!(f, "  {}. {} {}", i + 1, step.action, step.target)?;
            if let Some(detail) = &step.detail {
                write!(f, " ({})", detail)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
