//! Status reconciliation
//!
//! Maps a status-probe document onto the per-tweak display rows. Rows are
//! updated in place so whatever the presentation layer keys on row identity
//! (selection, scroll position) survives a refresh.

use crate::manifest::TweakDefinition;
use crate::protocol::{PresetStatusSummary, StatusCheck, StatusEntry};
use crate::types::TweakStatus;
use serde::Serialize;
use std::collections::HashMap;

/// Details of a row the probe has not reported on yet
pub const NOT_EVALUATED: &str = "Not evaluated yet.";

/// Details of a row the probe returned nothing for.
///
/// Distinguishes "backend said nothing" from a backend-reported `unknown`.
pub const NO_STATUS_RETURNED: &str = "No status information returned.";

/// Details of an entry without message and checks
pub const NO_CHECKS: &str = "No checks defined.";

/// Presentation-facing record for one tweak
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TweakRow {
    #[serde(flatten)]
    pub tweak: TweakDefinition,
    pub status: TweakStatus,
    pub status_details: String,
}

impl TweakRow {
    pub fn new(tweak: TweakDefinition) -> Self {
        Self {
            tweak,
            status: TweakStatus::Pending,
            status_details: NOT_EVALUATED.to_string(),
        }
    }

    pub fn id(&self) -> &str {
        &self.tweak.id
    }
}

/// Build fresh rows for a preset's tweaks
pub fn rows_for(tweaks: &[TweakDefinition]) -> Vec<TweakRow> {
    tweaks.iter().cloned().map(TweakRow::new).collect()
}

/// `[OK] <target> -> wanted <desired>, actual <actual> (<message>)`
pub fn format_check(check: &StatusCheck) -> String {
    let marker = if check.compliant { "[OK]" } else { "[WARN]" };
    let target = check.target.as_deref().unwrap_or_default();
    let desired = match check.desired.as_deref() {
        Some(d) if !d.trim().is_empty() => d,
        _ => "(unspecified)",
    };
    let actual = match check.actual.as_deref() {
        Some(a) if !a.trim().is_empty() => a,
        _ => "(none)",
    };

    let mut line = format!("{marker} {target} -> wanted {desired}, actual {actual}");
    if let Some(message) = check.message.as_deref().filter(|m| !m.trim().is_empty()) {
        line.push_str(&format!(" ({message})"));
    }
    line
}

/// Entry message (if any) followed by one line per check
pub fn format_status_details(entry: &StatusEntry) -> String {
    let mut lines = Vec::new();
    if let Some(message) = entry.message.as_deref().filter(|m| !m.trim().is_empty()) {
        lines.push(message.to_string());
    }
    lines.extend(entry.checks.iter().map(format_check));

    if lines.is_empty() {
        NO_CHECKS.to_string()
    } else {
        lines.join("\n")
    }
}

/// Recompute status and details of every row from a probe result.
///
/// Entries are matched on `tweakId`, case-insensitively. Entries with a blank
/// id are ignored; if several entries share an id the last one wins.
pub fn reconcile(rows: &mut [TweakRow], summary: &PresetStatusSummary) {
    let mut lookup: HashMap<String, &StatusEntry> = HashMap::new();
    for entry in &summary.entries {
        match entry.tweak_id.as_deref() {
            Some(id) if !id.trim().is_empty() => {
                lookup.insert(id.to_lowercase(), entry);
            }
            _ => continue,
        }
    }

    for row in rows.iter_mut() {
        match lookup.get(&row.tweak.id.to_lowercase()) {
            Some(entry) => {
                row.status = TweakStatus::from_backend_state(entry.state.as_deref());
                row.status_details = format_status_details(entry);
            }
            None => {
                row.status = TweakStatus::Unknown;
                row.status_details = NO_STATUS_RETURNED.to_string();
            }
        }
    }
}
