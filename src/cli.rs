use crate::config::SettingsLayer;
use crate::types::AutomationMode;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// wge - apply, preview, revert and inspect Windows tweak presets
#[derive(Parser)]
#[command(name = "wge")]
#[command(about = "Drives the Windows tweak automation backend from JSON preset manifests")]
#[command(version)]
pub struct Cli {
    /// JSON settings file, applied before environment variables
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Folder holding the automation script and the manifests directory
    #[arg(long, global = true)]
    pub automation_root: Option<PathBuf>,

    /// PowerShell host executable
    #[arg(long, global = true)]
    pub backend: Option<PathBuf>,

    /// Automation entry-point script
    #[arg(long, global = true)]
    pub script: Option<PathBuf>,

    /// Deadline for one backend run in seconds (0 waits forever)
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the available presets
    List {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a preset and its tweaks
    Show(PresetArgs),
    /// Query the current state of every tweak in a preset
    Status(PresetArgs),
    /// Apply a preset
    Apply(PresetArgs),
    /// Preview what applying a preset would change
    DryRun(PresetArgs),
    /// Restore the original settings touched by a preset
    Revert {
        #[command(flatten)]
        preset: PresetArgs,

        /// Confirm the revert without prompting
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args, Debug, Clone)]
pub struct PresetArgs {
    /// Preset id (manifest file name without `.json`)
    pub preset: String,

    /// Print machine-readable JSON
    #[arg(long)]
    pub json: bool,
}

impl Commands {
    /// Backend mode a command runs, if it runs one
    pub fn mode(&self) -> Option<AutomationMode> {
        match self {
            Commands::List { .. } | Commands::Show(_) => None,
            Commands::Status(_) => Some(AutomationMode::StatusProbe),
            Commands::Apply(_) => Some(AutomationMode::Apply),
            Commands::DryRun(_) => Some(AutomationMode::DryRun),
            Commands::Revert { .. } => Some(AutomationMode::Revert),
        }
    }

    pub fn json(&self) -> bool {
        match self {
            Commands::List { json } => *json,
            Commands::Show(args)
            | Commands::Status(args)
            | Commands::Apply(args)
            | Commands::DryRun(args) => args.json,
            Commands::Revert { preset, .. } => preset.json,
        }
    }

    pub fn preset(&self) -> Option<&str> {
        match self {
            Commands::List { .. } => None,
            Commands::Show(args)
            | Commands::Status(args)
            | Commands::Apply(args)
            | Commands::DryRun(args) => Some(&args.preset),
            Commands::Revert { preset, .. } => Some(&preset.preset),
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// Command-line overrides as the topmost settings layer
    pub fn settings_layer(&self) -> SettingsLayer {
        SettingsLayer {
            automation_root: self.automation_root.clone(),
            backend: self.backend.clone(),
            script: self.script.clone(),
            timeout_secs: self.timeout,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["wge"]).is_err());
    }

    #[test]
    fn test_cli_list() {
        let cli = Cli::try_parse_from(["wge", "list", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::List { json: true }));
        assert_eq!(cli.command.mode(), None);
    }

    #[test]
    fn test_cli_apply_with_global_flags() {
        let cli = Cli::try_parse_from([
            "wge",
            "apply",
            "performance",
            "--timeout",
            "30",
            "--automation-root",
            "/srv/automation",
        ])
        .unwrap();

        assert_eq!(cli.command.mode(), Some(AutomationMode::Apply));
        assert_eq!(cli.command.preset(), Some("performance"));
        assert!(!cli.command.json());

        let layer = cli.settings_layer();
        assert_eq!(layer.timeout_secs, Some(30));
        assert_eq!(layer.automation_root, Some(PathBuf::from("/srv/automation")));
        assert_eq!(layer.manifest_dir, None);
    }

    #[test]
    fn test_cli_dry_run_subcommand_name() {
        let cli = Cli::try_parse_from(["wge", "dry-run", "privacy"]).unwrap();
        assert_eq!(cli.command.mode(), Some(AutomationMode::DryRun));
    }

    #[test]
    fn test_cli_revert_yes() {
        let cli = Cli::try_parse_from(["wge", "revert", "privacy", "--yes", "--json"]).unwrap();
        match cli.command {
            Commands::Revert { preset, yes } => {
                assert!(yes);
                assert!(preset.json);
                assert_eq!(preset.preset, "privacy");
            }
            _ => panic!("expected revert"),
        }
    }

    #[test]
    fn test_cli_show_requires_preset() {
        assert!(Cli::try_parse_from(["wge", "show"]).is_err());
    }
}
