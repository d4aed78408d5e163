//! Windows tweak preset orchestrator
//!
//! Loads preset manifests, drives the external PowerShell automation backend
//! for apply / dry run / revert / status requests, and folds the backend's
//! JSON reports into per-tweak status rows and per-action result rows.

pub mod backend;
pub mod backend_args;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod manifest;
pub mod orchestrator;
pub mod process_guard;
pub mod protocol;
pub mod results;
pub mod status;
pub mod types;

// Re-export main types for convenience
pub use backend::{
    AutomationBackend, AutomationClient, CancelFlag, ExecutionContext, RawOutput, RunResult,
    Summary, Termination,
};
pub use backend_args::{BackendArgs, PresetInvocation};
pub use config::{Settings, SettingsLayer};
pub use error::{Result, WgeError};
pub use executor::{AutomationRequest, AutomationResponse, ExecutorHandle};
pub use manifest::{LoadReport, ManifestMetadata, ManifestStore, Preset, TweakDefinition};
pub use orchestrator::{Orchestrator, OrchestratorEvent, RunOutcome, RunPhase, Session, Step};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use protocol::{
    AutomationCounts, AutomationEntry, AutomationSummary, PresetStatusSummary, StatusCheck,
    StatusEntry,
};
pub use results::{ResultRow, classify};
pub use status::{TweakRow, reconcile};
pub use types::{AutomationMode, BackendState, TweakStatus};
