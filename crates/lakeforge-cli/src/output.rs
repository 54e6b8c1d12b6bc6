//! Rendering of results and state as text or JSON

use serde_json::Value;

use lakeforge_install::{InstallResult, InstallationState, Status};

use crate::commands::OutputFormat;
use crate::Result;

/// Process exit code for a result status
pub fn exit_code(status: Status) -> u8 {
    match status {
        Status::Completed | Status::CompletedPhase => 0,
        Status::Error => 1,
        Status::NeedsInput => 2,
        Status::BlockedPhase => 3,
    }
}

/// Render an install result
pub fn render_result(result: &InstallResult, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(result)?),
        OutputFormat::Text => Ok(result_text(result)),
    }
}

/// Render an installation state
pub fn render_state(state: &InstallationState, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(state)?),
        OutputFormat::Text => Ok(state_text(state)),
    }
}

fn compact(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn result_text(result: &InstallResult) -> String {
    let mut out = format!("status: {}", result.status);
    if let Some(phase) = result.phase {
        out.push_str(&format!("\nphase:  {}", phase));
    }

    if !result.blockers.is_empty() {
        out.push_str("\n\nblockers:");
        for blocker in &result.blockers {
            out.push_str(&format!("\n  {}", blocker));
            if let Some(owner) = blocker.owner {
                out.push_str(&format!(" (owner: {})", owner));
            }
        }
    }

    if let Some(next) = result.next {
        out.push_str(&format!("\n\nnext: fix phase {}, then run install again", next.phase));
    }

    if let Some(plan) = &result.plan {
        out.push_str(&format!("\n\n{}", plan.to_string().trim_end()));
        out.push_str("\n\nrun again with --approve to apply");
    }

    if let Some(evidence) = &result.evidence {
        if !evidence.entries.is_empty() {
            out.push_str("\n\nevidence:");
            for entry in &evidence.entries {
                out.push_str(&format!("\n  {} = {}", entry.key, compact(&entry.value)));
            }
        }
    }
    out
}

/// Column-aligned table; the last column is not padded
fn table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate().take(widths.len()) {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let line = |cells: Vec<&str>| -> String {
        let last = cells.len().saturating_sub(1);
        cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                if i == last {
                    cell.to_string()
                } else {
                    format!("{:<width$}", cell, width = widths[i])
                }
            })
            .collect::<Vec<_>>()
            .join("  ")
    };

    let mut lines = vec![line(headers.to_vec())];
    lines.extend(rows.iter().map(|row| line(row.iter().map(String::as_str).collect())));
    lines.join("\n")
}

fn state_text(state: &InstallationState) -> String {
    let rows: Vec<Vec<String>> = state
        .phases
        .iter()
        .map(|(phase, reading)| {
            let details = reading
                .details
                .iter()
                .map(|(k, v)| format!("{}={}", k, compact(v)))
                .collect::<Vec<_>>()
                .join(" ");
            vec![
                phase.to_string(),
                if reading.satisfied { "yes" } else { "no" }.to_string(),
                details,
            ]
        })
        .collect();

    let mut out = table(&["PHASE", "SATISFIED", "DETAILS"], &rows);
    match state.first_unsatisfied() {
        Some(phase) => out.push_str(&format!("\n\nnext phase: {}", phase)),
        None => out.push_str("\n\nall phases satisfied"),
    }
    out
}
