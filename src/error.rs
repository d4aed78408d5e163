//! Error handling module for the preset orchestrator
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Backend output that cannot be parsed and backend states nobody knows about
//! are not represented here: they degrade to
//! [`RunResult::Fallback`](crate::backend::RunResult) and
//! [`TweakStatus::Unknown`](crate::types::TweakStatus) instead.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the orchestrator
#[derive(Error, Debug)]
pub enum WgeError {
    /// IO errors (directory scans, file reads)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A single manifest could not be loaded. Never aborts a directory scan.
    #[error("Could not parse manifest '{}': {reason}", path.display())]
    ManifestParse { path: PathBuf, reason: String },

    /// Backend executable or automation script is missing
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend process could not be started or awaited
    #[error("Launch failure: {0}")]
    Launch(String),

    /// Another automation run is still in flight
    #[error("An automation run is already in progress")]
    Busy,

    /// An operation needs a selected preset
    #[error("Pick a preset before running automation")]
    NoPresetSelected,

    /// Preset id not present in the loaded catalog
    #[error("Unknown preset: {0}")]
    UnknownPreset(String),

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The executor worker is gone
    #[error("Executor channel closed")]
    ExecutorClosed,
}

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, WgeError>;

impl WgeError {
    /// Create a manifest parse error
    pub fn manifest_parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ManifestParse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a backend-unavailable error
    pub fn backend_unavailable(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    /// Create a launch error
    pub fn launch(msg: impl Into<String>) -> Self {
        Self::Launch(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
