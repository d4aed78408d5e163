//! Wire contract of the automation backend
//!
//! The backend prints exactly one JSON document on stdout at the end of its run:
//! an [`AutomationSummary`] for apply/dry-run/revert and a
//! [`PresetStatusSummary`] for a status probe.
//!
//! Field names are matched case-insensitively (`TweakId`, `tweakid` and
//! `tweakId` are the same field). Before deserializing, every object key whose
//! ASCII-lowercase form matches a known field is rewritten to its canonical
//! camelCase spelling; unknown keys pass through and are ignored.
//!
//! Every field is optional. Missing or `null` values take their defaults and
//! `null` elements inside lists are dropped.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Canonical spelling of every field name used by manifests and backend output
const WIRE_FIELDS: &[&str] = &[
    // manifests
    "metadata",
    "tweaks",
    "id",
    "name",
    "description",
    "defaultState",
    "category",
    "tags",
    "defaultBehavior",
    "whenDisabled",
    "riskLevel",
    // automation summary
    "presetId",
    "presetName",
    "manifestPath",
    "dryRun",
    "actionLogPath",
    "counts",
    "entries",
    "message",
    "total",
    "succeeded",
    "failed",
    "skipped",
    "whatIf",
    "status",
    "tweakId",
    "tweakName",
    "commandType",
    "target",
    "requiresReboot",
    "requiresElevation",
    "skipReason",
    "errorMessage",
    // status summary
    "state",
    "checks",
    "compliant",
    "desired",
    "actual",
];

fn canonical_key(key: String) -> String {
    WIRE_FIELDS
        .iter()
        .find(|field| field.eq_ignore_ascii_case(&key))
        .map(|field| (*field).to_string())
        .unwrap_or(key)
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (canonical_key(key), canonicalize(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Deserialize `text` into `T`, matching field names case-insensitively.
pub fn from_str_ci<T: DeserializeOwned>(text: &str) -> serde_json::Result<T> {
    let value: Value = serde_json::from_str(text)?;
    serde_json::from_value(canonicalize(value))
}

/// Same as [`from_str_ci`] over a reader.
pub fn from_reader_ci<R: std::io::Read, T: DeserializeOwned>(reader: R) -> serde_json::Result<T> {
    let value: Value = serde_json::from_reader(reader)?;
    serde_json::from_value(canonicalize(value))
}

/// Treat an explicit `null` like a missing value.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accept `null` for the list and drop `null` elements inside it.
pub(crate) fn nullable_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let items = Option::<Vec<Option<T>>>::deserialize(deserializer)?;
    Ok(items.unwrap_or_default().into_iter().flatten().collect())
}

/// Parse trimmed backend stdout. Blank or malformed output yields `None`.
fn parse_document<T: DeserializeOwned>(stdout: &str, kind: &str) -> Option<T> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        tracing::debug!("Backend produced no stdout, expected {}", kind);
        return None;
    }

    match from_str_ci(trimmed) {
        Ok(document) => Some(document),
        Err(e) => {
            tracing::debug!("Backend stdout is not a valid {}: {}", kind, e);
            None
        }
    }
}

/// Outcome counters of an apply-family run. Trusted as reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AutomationCounts {
    #[serde(deserialize_with = "null_as_default")]
    pub total: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub succeeded: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub failed: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub skipped: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub what_if: u32,
}

/// One command line of an apply/revert result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AutomationEntry {
    pub status: Option<String>,
    pub tweak_id: Option<String>,
    pub tweak_name: Option<String>,
    pub command_type: Option<String>,
    pub target: Option<String>,
    pub message: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub requires_reboot: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub requires_elevation: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub skipped: bool,
    pub skip_reason: Option<String>,
    pub error_message: Option<String>,
}

/// Result document of an apply, dry run or revert
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AutomationSummary {
    pub preset_id: Option<String>,
    pub preset_name: Option<String>,
    pub manifest_path: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub dry_run: bool,
    /// Only present after a real apply
    pub action_log_path: Option<String>,
    pub counts: Option<AutomationCounts>,
    #[serde(deserialize_with = "nullable_list")]
    pub entries: Vec<AutomationEntry>,
    pub message: Option<String>,
}

impl AutomationSummary {
    /// Parse backend stdout; `None` means "render the raw text instead".
    pub fn parse(stdout: &str) -> Option<Self> {
        parse_document(stdout, "automation summary")
    }
}

/// A single desired-vs-actual comparison
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StatusCheck {
    pub target: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub compliant: bool,
    pub desired: Option<String>,
    pub actual: Option<String>,
    pub message: Option<String>,
}

/// Probe result for one tweak
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StatusEntry {
    pub tweak_id: Option<String>,
    pub tweak_name: Option<String>,
    /// Raw backend state; see [`BackendState`](crate::types::BackendState)
    pub state: Option<String>,
    pub message: Option<String>,
    #[serde(deserialize_with = "nullable_list")]
    pub checks: Vec<StatusCheck>,
}

/// Result document of a status probe
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PresetStatusSummary {
    pub preset_id: Option<String>,
    pub preset_name: Option<String>,
    pub message: Option<String>,
    #[serde(deserialize_with = "nullable_list")]
    pub entries: Vec<StatusEntry>,
}

impl PresetStatusSummary {
    /// Parse backend stdout; `None` means "render the raw text instead".
    pub fn parse(stdout: &str) -> Option<Self> {
        parse_document(stdout, "status summary")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_automation_summary() {
        let json = r#"{
            "presetId": "perf",
            "dryRun": true,
            "counts": {"total": 3, "succeeded": 2, "failed": 1, "skipped": 0, "whatIf": 0},
            "entries": [{"status": "failed", "tweakId": "t1", "errorMessage": "access denied"}]
        }"#;

        let summary = AutomationSummary::parse(json).expect("Should parse");
        assert_eq!(summary.preset_id.as_deref(), Some("perf"));
        assert!(summary.dry_run);
        let counts = summary.counts.unwrap();
        assert_eq!(counts.total, 3);
        assert_eq!(counts.failed, 1);
        assert_eq!(summary.entries.len(), 1);
        assert_eq!(
            summary.entries[0].error_message.as_deref(),
            Some("access denied")
        );
        assert!(!summary.entries[0].requires_reboot);
    }

    #[test]
    fn test_field_names_are_case_insensitive() {
        let json = r#"{"PresetName": "Performance", "ENTRIES": [
            {"TweakID": "t1", "Status": "ok", "RequiresReboot": true, "skipreason": "n/a"}
        ], "Counts": {"WHATIF": 4}}"#;

        let summary = AutomationSummary::parse(json).expect("Should parse");
        assert_eq!(summary.preset_name.as_deref(), Some("Performance"));
        assert_eq!(summary.entries[0].tweak_id.as_deref(), Some("t1"));
        assert!(summary.entries[0].requires_reboot);
        assert_eq!(summary.entries[0].skip_reason.as_deref(), Some("n/a"));
        assert_eq!(summary.counts.unwrap().what_if, 4);
    }

    #[test]
    fn test_nulls_are_tolerated() {
        let json = r#"{"entries": [null, {"tweakId": "t2", "checks": null, "state": null}], "message": null}"#;

        let summary = PresetStatusSummary::parse(json).expect("Should parse");
        assert_eq!(summary.entries.len(), 1);
        assert!(summary.entries[0].checks.is_empty());
        assert!(summary.entries[0].state.is_none());

        let summary = AutomationSummary::parse(r#"{"entries": null, "dryRun": null}"#).unwrap();
        assert!(summary.entries.is_empty());
        assert!(!summary.dry_run);
    }

    #[test]
    fn test_surrounding_whitespace_is_trimmed() {
        let summary = PresetStatusSummary::parse("\r\n  {\"presetId\": \"perf\"}  \r\n");
        assert_eq!(summary.unwrap().preset_id.as_deref(), Some("perf"));
    }

    #[test]
    fn test_unparseable_output_yields_none() {
        assert!(AutomationSummary::parse("").is_none());
        assert!(AutomationSummary::parse("   \n").is_none());
        assert!(AutomationSummary::parse("Applying tweaks...").is_none());
        assert!(AutomationSummary::parse("null").is_none());
        assert!(AutomationSummary::parse("[1, 2, 3]").is_none());
        assert!(PresetStatusSummary::parse("{\"entries\": 5}").is_none());
    }

    #[test]
    fn test_negative_counts_are_rejected() {
        assert!(AutomationSummary::parse(r#"{"counts": {"total": -1}}"#).is_none());
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let summary = AutomationSummary::parse(r#"{"schemaVersion": 2, "message": "done"}"#);
        assert_eq!(summary.unwrap().message.as_deref(), Some("done"));
    }

    #[test]
    fn test_serializes_camel_case() {
        let entry = AutomationEntry {
            tweak_id: Some("t1".to_string()),
            requires_elevation: true,
            ..Default::default()
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["tweakId"], "t1");
        assert_eq!(json["requiresElevation"], true);
    }
}
