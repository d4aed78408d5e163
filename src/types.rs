//! Closed enumerations shared across the orchestrator
//!
//! Stringly-typed values coming from the backend are converted into these enums
//! at the boundary so the rest of the crate can match exhaustively.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// The four request modes the automation backend understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum AutomationMode {
    Apply,
    DryRun,
    Revert,
    StatusProbe,
}

impl AutomationMode {
    /// Whether this mode returns an `AutomationSummary` (as opposed to a status summary)
    pub fn is_apply_family(&self) -> bool {
        !matches!(self, Self::StatusProbe)
    }

    /// Progressive verb used in operator-facing messages
    pub fn action_label(&self) -> &'static str {
        match self {
            Self::Apply => "Applying",
            Self::DryRun => "Previewing",
            Self::Revert => "Reverting",
            Self::StatusProbe => "Checking",
        }
    }
}

/// Tweak state as reported by a status probe.
///
/// Parsing is case-insensitive. Strings outside this set are not an error;
/// they simply fail to parse and end up as [`TweakStatus::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BackendState {
    Applied,
    Partial,
    NotApplied,
    Failed,
    Error,
    Unsupported,
    Pending,
    Unknown,
}

/// Display status of a tweak row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
pub enum TweakStatus {
    Applied,
    Partial,
    Stock,
    Error,
    Skipped,
    #[default]
    Pending,
    Unknown,
}

impl From<BackendState> for TweakStatus {
    fn from(state: BackendState) -> Self {
        match state {
            BackendState::Applied => Self::Applied,
            BackendState::Partial => Self::Partial,
            BackendState::NotApplied => Self::Stock,
            BackendState::Failed | BackendState::Error => Self::Error,
            BackendState::Unsupported => Self::Skipped,
            BackendState::Pending => Self::Pending,
            BackendState::Unknown => Self::Unknown,
        }
    }
}

impl TweakStatus {
    /// Map a raw backend state string onto a display status.
    ///
    /// Missing or unrecognised strings map to `Unknown`.
    pub fn from_backend_state(state: Option<&str>) -> Self {
        state
            .and_then(|s| s.parse::<BackendState>().ok())
            .map(Self::from)
            .unwrap_or(Self::Unknown)
    }
}
