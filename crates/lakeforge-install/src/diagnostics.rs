//! Diagnostics Collector.
//!
//! Runs only after a poll has failed. Gathers one excerpt line per not-ready
//! pod plus the most recent namespace events involving those pods, and
//! renders them into a blocker message.

use tracing::debug;

use crate::clients::EventFilter;
use crate::context::InstallContext;
use crate::poller::ReadinessReport;

/// Number of event lines kept per diagnostic
pub const MAX_EVENT_LINES: usize = 10;

/// Collected diagnostic lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Rendered lines, excerpts first then events
    pub lines: Vec<String>,
}

impl Diagnostics {
    /// `base` followed by the diagnostic lines, one per line
    pub fn attach(&self, base: &str) -> String {
        if self.lines.is_empty() {
            return base.to_string();
        }
        format!("{}\n  {}", base, self.lines.join("\n  "))
    }
}

/// One excerpt line per not-ready pod
pub fn excerpts(report: &ReadinessReport) -> Vec<String> {
    report
        .not_ready
        .iter()
        .map(|pod| match &pod.message {
            Some(message) => format!("pod {}: {} ({})", pod.name, pod.reason, message),
            None => format!("pod {}: {}", pod.name, pod.reason),
        })
        .collect()
}

/// Collect excerpts and the last events for the not-ready pods of `report`.
///
/// An event query failure is folded into the output instead of failing.
pub async fn collect(ctx: &InstallContext, namespace: &str, report: Option<&ReadinessReport>) -> Diagnostics {
    let mut lines = Vec::new();
    let involved_names = match report {
        Some(report) => {
            lines.extend(excerpts(report));
            report.not_ready.iter().map(|p| p.name.clone()).collect()
        }
        None => {
            lines.push(format!("no pods could be listed in namespace {}", namespace));
            Vec::new()
        }
    };

    let filter = EventFilter {
        involved_names,
        limit: MAX_EVENT_LINES,
    };
    match ctx.facts.recent_events(namespace, &filter).await {
        Ok(events) => lines.extend(events.into_iter().take(MAX_EVENT_LINES).map(|e| {
            format!(
                "event {} {}/{}: {}: {}",
                e.event_type, e.involved_kind, e.involved_name, e.reason, e.message
            )
        })),
        Err(e) => lines.push(format!("events unavailable: {}", e)),
    }

    debug!(namespace, lines = lines.len(), "collected diagnostics");
    Diagnostics { lines }
}
