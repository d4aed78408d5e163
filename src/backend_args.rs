//! Type-safe backend argument contract.
//!
//! The automation backend is a PowerShell script started through the
//! PowerShell host. Its argv is part of the wire contract: flag names and
//! their order must match exactly. Rather than assembling raw string vectors
//! at call sites, requests implement [`BackendArgs`] and the struct definition
//! becomes the single source of truth.
//!
//! ```text
//! Apply:       -NoLogo -NoProfile -ExecutionPolicy Bypass -File <script> -Preset <id> -SkipUnsupported -AsJson
//! DryRun:      ... -SkipUnsupported -AsJson -DryRun
//! Revert:      ... -SkipUnsupported -AsJson -Revert
//! StatusProbe: -NoLogo -NoProfile -ExecutionPolicy Bypass -File <script> -Preset <id> -Status -AsJson
//! ```

use crate::types::AutomationMode;
use std::path::PathBuf;

/// Trait for typed backend arguments.
///
/// # Invariants
///
/// - The returned args MUST match the backend script's parameter block.
/// - Output is deterministic for a given value.
pub trait BackendArgs {
    /// Convert struct fields to command-line arguments for the backend host.
    fn to_cli_args(&self) -> Vec<String>;

    /// The mode this request runs in, used to pick the result schema.
    fn mode(&self) -> AutomationMode;
}

/// One backend invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetInvocation {
    /// Automation entry-point script
    pub script: PathBuf,
    /// Backend-facing preset id (manifest file base name)
    pub preset_id: String,
    pub mode: AutomationMode,
}

impl PresetInvocation {
    pub fn new(script: impl Into<PathBuf>, preset_id: impl Into<String>, mode: AutomationMode) -> Self {
        Self {
            script: script.into(),
            preset_id: preset_id.into(),
            mode,
        }
    }
}

impl BackendArgs for PresetInvocation {
    fn to_cli_args(&self) -> Vec<String> {
        let mut args: Vec<String> = [
            "-NoLogo",
            "-NoProfile",
            "-ExecutionPolicy",
            "Bypass",
            "-File",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        args.push(self.script.to_string_lossy().into_owned());
        args.push("-Preset".to_string());
        args.push(self.preset_id.clone());

        match self.mode {
            AutomationMode::StatusProbe => {
                args.push("-Status".to_string());
                args.push("-AsJson".to_string());
            }
            AutomationMode::Apply | AutomationMode::DryRun | AutomationMode::Revert => {
                args.push("-SkipUnsupported".to_string());
                args.push("-AsJson".to_string());
                match self.mode {
                    AutomationMode::DryRun => args.push("-DryRun".to_string()),
                    AutomationMode::Revert => args.push("-Revert".to_string()),
                    _ => {}
                }
            }
        }

        args
    }

    fn mode(&self) -> AutomationMode {
        self.mode
    }
}
