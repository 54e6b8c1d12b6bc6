//! Sequential task fold used by phases that install several releases.

use std::future::Future;

use serde_json::{json, Value};
use tracing::{debug, warn};

use lakeforge_common::Error;

use crate::codes;
use crate::model::{Blocker, Evidence, EvidenceEntry};

/// What one task observed and whether it left a gap behind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskReport {
    /// Evidence entries produced by the task, appended in order
    pub entries: Vec<EvidenceEntry>,
    /// Dependency gap left by the task; the fold continues past it
    pub blocker: Option<Blocker>,
}

impl TaskReport {
    /// Report carrying the entries of a scratch evidence record
    pub fn from_evidence(scratch: Evidence) -> Self {
        Self {
            entries: scratch.entries,
            blocker: None,
        }
    }

    /// Attach a gap
    pub fn with_blocker(mut self, blocker: Option<Blocker>) -> Self {
        self.blocker = blocker;
        self
    }
}

/// A task error together with the evidence recorded before it
#[derive(Debug)]
pub struct TaskFailure {
    /// Entries recorded before the error, kept in the phase evidence
    pub entries: Vec<EvidenceEntry>,
    /// The error that stopped the task
    pub error: Error,
}

impl TaskFailure {
    /// Failure carrying the entries of a scratch evidence record
    pub fn new(scratch: Evidence, error: Error) -> Self {
        Self {
            entries: scratch.entries,
            error,
        }
    }
}

impl From<Error> for TaskFailure {
    fn from(error: Error) -> Self {
        Self {
            entries: Vec::new(),
            error,
        }
    }
}

/// Run `tasks` in order through `run`.
///
/// Every attempted task gets a `task` evidence entry. Gaps accumulate and the
/// fold moves on; the first `Err` becomes an `EXECUTION_FAILED` blocker after
/// its partial entries are kept, and the remaining tasks are recorded as not
/// attempted.
pub async fn run_tasks<T, F, Fut>(
    evidence: &mut Evidence,
    tasks: Vec<(String, T)>,
    mut run: F,
) -> Vec<Blocker>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<TaskReport, TaskFailure>>,
{
    let mut blockers = Vec::new();
    let mut remaining = tasks.into_iter();

    for (name, task) in remaining.by_ref() {
        debug!(task = %name, "running task");
        match run(task).await {
            Ok(report) => {
                evidence.entries.extend(report.entries);
                let result = if report.blocker.is_some() { "blocked" } else { "done" };
                evidence.record("task", json!({"name": name, "result": result}));
                blockers.extend(report.blocker);
            }
            Err(TaskFailure { entries, error: e }) => {
                evidence.entries.extend(entries);
                warn!(task = %name, error = %e, "task failed, skipping the rest");
                evidence.record(
                    "task",
                    json!({"name": name, "result": "failed", "error": e.to_string()}),
                );
                blockers.push(Blocker::failure(
                    codes::EXECUTION_FAILED,
                    format!("{}: {}", name, e),
                ));
                break;
            }
        }
    }

    let skipped: Vec<Value> = remaining.map(|(name, _)| Value::String(name)).collect();
    if !skipped.is_empty() {
        evidence.record("notAttempted", Value::Array(skipped));
    }
    blockers
}
