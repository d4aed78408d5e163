//! Property-based tests for the orchestrator
//!
//! These tests verify:
//! - Backend state strings map to display statuses regardless of case
//! - Unmapped state strings never fail, they become Unknown
//! - Classification keeps one row per entry and never leaves the view empty
//! - Reconciliation touches every row and preserves row order

use proptest::prelude::*;
use wge::manifest::TweakDefinition;
use wge::protocol::{AutomationEntry, PresetStatusSummary, StatusEntry};
use wge::results::classify;
use wge::status::{reconcile, rows_for, NO_STATUS_RETURNED};
use wge::types::TweakStatus;

// =============================================================================
// State mapping
// =============================================================================

const STATE_TABLE: &[(&str, TweakStatus)] = &[
    ("applied", TweakStatus::Applied),
    ("partial", TweakStatus::Partial),
    ("notapplied", TweakStatus::Stock),
    ("failed", TweakStatus::Error),
    ("error", TweakStatus::Error),
    ("unsupported", TweakStatus::Skipped),
    ("pending", TweakStatus::Pending),
    ("unknown", TweakStatus::Unknown),
];

/// Randomly flip the case of each character
fn mixed_case(s: &'static str) -> impl Strategy<Value = String> {
    proptest::collection::vec(any::<bool>(), s.len()).prop_map(move |flips| {
        s.chars()
            .zip(flips)
            .map(|(c, up)| if up { c.to_ascii_uppercase() } else { c })
            .collect()
    })
}

fn state_case() -> impl Strategy<Value = (String, TweakStatus)> {
    (0..STATE_TABLE.len()).prop_flat_map(|i| {
        let (raw, status) = STATE_TABLE[i];
        mixed_case(raw).prop_map(move |s| (s, status))
    })
}

proptest! {
    /// Every listed backend state maps to its display status in any casing
    #[test]
    fn state_mapping_is_case_insensitive((raw, expected) in state_case()) {
        prop_assert_eq!(TweakStatus::from_backend_state(Some(&raw)), expected);
    }

    /// Anything outside the table is Unknown, never an error
    #[test]
    fn unmapped_state_is_unknown(raw in "[a-z]{1,12}") {
        prop_assume!(!STATE_TABLE.iter().any(|(s, _)| *s == raw));
        prop_assert_eq!(TweakStatus::from_backend_state(Some(&raw)), TweakStatus::Unknown);
    }
}

#[test]
fn test_missing_state_is_unknown() {
    assert_eq!(TweakStatus::from_backend_state(None), TweakStatus::Unknown);
}

// =============================================================================
// Classification
// =============================================================================

fn entry_strategy() -> impl Strategy<Value = AutomationEntry> {
    (
        proptest::option::of("[a-zA-Z]{1,8}"),
        proptest::option::of("[a-z0-9]{1,6}"),
        proptest::option::of("[ a-zA-Z]{0,10}"),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(|(status, tweak_id, tweak_name, requires_reboot, requires_elevation)| {
            AutomationEntry {
                status,
                tweak_id,
                tweak_name,
                requires_reboot,
                requires_elevation,
                ..Default::default()
            }
        })
}

proptest! {
    /// The result view is never empty and keeps one row per entry
    #[test]
    fn classify_row_count(entries in proptest::collection::vec(entry_strategy(), 0..20)) {
        let rows = classify(&entries);
        prop_assert_eq!(rows.len(), entries.len().max(1));
    }

    /// Row status is the upper-cased backend status, or UNK
    #[test]
    fn classify_status_is_uppercase(entries in proptest::collection::vec(entry_strategy(), 1..20)) {
        let rows = classify(&entries);
        for (row, entry) in rows.iter().zip(&entries) {
            let expected = entry
                .status
                .as_deref()
                .map(str::to_uppercase)
                .unwrap_or_else(|| "UNK".to_string());
            prop_assert_eq!(&row.status, &expected);
            prop_assert!(!row.display_name.is_empty());
        }
    }
}

// =============================================================================
// Reconciliation
// =============================================================================

proptest! {
    /// Every row gets a verdict; rows without an entry are Unknown
    #[test]
    fn reconcile_covers_every_row(
        ids in proptest::collection::hash_set("[a-z]{1,6}", 1..10),
        reported in proptest::collection::vec(any::<bool>(), 10),
    ) {
        let ids: Vec<String> = ids.into_iter().collect();
        let tweaks: Vec<TweakDefinition> = ids
            .iter()
            .map(|id| TweakDefinition { id: id.clone(), ..Default::default() })
            .collect();
        let mut rows = rows_for(&tweaks);

        let entries: Vec<StatusEntry> = ids
            .iter()
            .zip(&reported)
            .filter(|(_, r)| **r)
            .map(|(id, _)| StatusEntry {
                tweak_id: Some(id.to_uppercase()),
                state: Some("applied".to_string()),
                ..Default::default()
            })
            .collect();
        let summary = PresetStatusSummary { entries, ..Default::default() };

        reconcile(&mut rows, &summary);

        prop_assert_eq!(rows.len(), ids.len());
        for ((row, id), r) in rows.iter().zip(&ids).zip(&reported) {
            prop_assert_eq!(row.id(), id.as_str());
            if *r {
                prop_assert_eq!(row.status, TweakStatus::Applied);
            } else {
                prop_assert_eq!(row.status, TweakStatus::Unknown);
                prop_assert_eq!(row.status_details.as_str(), NO_STATUS_RETURNED);
            }
        }
    }
}
