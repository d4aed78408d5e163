//! Result classification
//!
//! Turns the entries of an apply/revert document into uniform rows for the
//! result view, and builds the synthetic rows shown when a run produced no
//! structured result at all. The result view is never left empty after a run.

use crate::backend::{RawOutput, Termination};
use crate::protocol::AutomationEntry;
use serde::Serialize;

/// Separator between the parts of [`ResultRow::details`]
pub const DETAIL_SEPARATOR: &str = " | ";

/// One line of the result view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRow {
    /// Upper-cased backend status, `UNK` when absent
    pub status: String,
    pub display_name: String,
    pub target: String,
    pub message: String,
    pub details: String,
}

impl ResultRow {
    /// Placeholder for a run that executed nothing
    pub fn no_commands() -> Self {
        Self {
            status: "INFO".to_string(),
            display_name: "No commands".to_string(),
            target: "-".to_string(),
            message: "Preset finished; no commands executed.".to_string(),
            details: String::new(),
        }
    }

    /// Single row standing in for output that was not structured
    pub fn unstructured(preset_name: &str, output: &RawOutput) -> Self {
        let details = match output.terminated {
            Some(Termination::Timeout(limit)) => {
                format!("Timed out after {}s", limit.as_secs())
            }
            Some(Termination::Cancelled) => "Cancelled".to_string(),
            None => format!("Exit code {}", output.exit_code_or_default()),
        };

        Self {
            status: "FAIL".to_string(),
            display_name: preset_name.to_string(),
            target: "-".to_string(),
            message: "Automation did not return structured output.".to_string(),
            details,
        }
    }

    /// Single row for a run that never started
    pub fn launch_failure(preset_name: &str, reason: &str) -> Self {
        Self {
            status: "FAIL".to_string(),
            display_name: preset_name.to_string(),
            target: "-".to_string(),
            message: "Automation could not be started.".to_string(),
            details: reason.to_string(),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|s| !s.trim().is_empty())
}

/// Non-empty parts among skip reason, error, reboot and elevation flags
pub fn build_details(entry: &AutomationEntry) -> String {
    let mut parts = Vec::new();
    if let Some(reason) = non_blank(entry.skip_reason.as_deref()) {
        parts.push(format!("skip: {reason}"));
    }
    if let Some(error) = non_blank(entry.error_message.as_deref()) {
        parts.push(format!("error: {error}"));
    }
    if entry.requires_reboot {
        parts.push("reboot required".to_string());
    }
    if entry.requires_elevation {
        parts.push("needs elevation".to_string());
    }
    parts.join(DETAIL_SEPARATOR)
}

fn classify_entry(entry: &AutomationEntry) -> ResultRow {
    let display_name = non_blank(entry.tweak_name.as_deref())
        .or(entry.tweak_id.as_deref())
        .unwrap_or("(unknown)");

    ResultRow {
        status: entry
            .status
            .as_deref()
            .map(str::to_uppercase)
            .unwrap_or_else(|| "UNK".to_string()),
        display_name: display_name.to_string(),
        target: entry.target.clone().unwrap_or_default(),
        message: entry.message.clone().unwrap_or_default(),
        details: build_details(entry),
    }
}

/// One row per entry, in order; an empty input yields the `INFO` placeholder.
pub fn classify(entries: &[AutomationEntry]) -> Vec<ResultRow> {
    if entries.is_empty() {
        return vec![ResultRow::no_commands()];
    }
    entries.iter().map(classify_entry).collect()
}
