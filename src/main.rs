//! wge - command-line front end for the preset orchestrator
//!
//! Tables and JSON go to stdout; operator log lines and tracing output go to
//! stderr.

use anyhow::{Context, Result};
use serde::Serialize;
use std::process::ExitCode;
use std::sync::mpsc::Receiver;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;
use wge::cli::{Cli, Commands};
use wge::config::{Settings, SettingsLayer};
use wge::manifest::Preset;
use wge::orchestrator::{Orchestrator, OrchestratorEvent, RunOutcome, Session};
use wge::process_guard::{self, ProcessGuard};
use wge::results::ResultRow;
use wge::status::TweakRow;
use wge::types::AutomationMode;

/// Initialize tracing; `RUST_LOG` overrides the default `info` level
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    init_logging();

    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    let _guard = ProcessGuard::new();

    let cli = Cli::parse_args();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut layer = SettingsLayer::default();
    if let Some(path) = &cli.config {
        layer = layer.merge(SettingsLayer::load_from_file(path)?);
    }
    layer = layer.merge(SettingsLayer::from_env()?);
    Ok(layer.merge(cli.settings_layer()).resolve())
}

fn run(cli: Cli) -> Result<ExitCode> {
    let settings = load_settings(&cli)?;
    debug!("Resolved settings: {:?}", settings);

    let mut orchestrator = Orchestrator::from_settings(&settings);
    let events = orchestrator.subscribe();
    let mut session = Session::new();
    let json = cli.command.json();

    orchestrator
        .load_presets(&mut session)
        .context("Failed to load manifests")?;

    if let Commands::List { .. } = cli.command {
        print_logs(&events);
        print_list(session.presets(), json)?;
        return Ok(ExitCode::SUCCESS);
    }

    let Some(preset_id) = cli.command.preset() else {
        return Ok(ExitCode::SUCCESS);
    };
    orchestrator
        .select_preset(&mut session, preset_id)
        .with_context(|| format!("Cannot select preset '{}'", preset_id))?;

    if let Commands::Revert { yes: false, .. } = cli.command {
        print_logs(&events);
        let name = session
            .selected_preset()
            .map(|p| p.metadata.name.clone())
            .unwrap_or_default();
        eprintln!(
            "This will restore the original Windows settings for the '{}' preset.\n\n\
             Are you sure you want to revert all changes?\n\n\
             Note: A system restart may be required for some changes to take effect.\n\n\
             Re-run with --yes to confirm.",
            name
        );
        return Ok(ExitCode::FAILURE);
    }

    let Some(mode) = cli.command.mode() else {
        print_logs(&events);
        print_show(&session, json)?;
        return Ok(ExitCode::SUCCESS);
    };

    let outcome = orchestrator.run_blocking(&mut session, mode)?;
    print_logs(&events);
    print_report(&session, mode, outcome, json)?;

    Ok(match outcome {
        RunOutcome::Structured => ExitCode::SUCCESS,
        RunOutcome::Fallback | RunOutcome::LaunchFailure => ExitCode::FAILURE,
    })
}

fn print_logs(events: &Receiver<OrchestratorEvent>) {
    for event in events.try_iter() {
        if let OrchestratorEvent::Log(line) = event {
            eprintln!("{}", line);
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{}", text);
    Ok(())
}

fn print_list(presets: &[Preset], json: bool) -> Result<()> {
    if json {
        return print_json(&presets);
    }
    for preset in presets {
        println!("{:<24} {}", preset.id, preset.display_name());
        println!("{:<24} {}", "", preset.meta_line());
    }
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ShowReport<'a> {
    preset: &'a Preset,
    rows: &'a [TweakRow],
}

fn print_show(session: &Session, json: bool) -> Result<()> {
    let Some(preset) = session.selected_preset() else {
        return Ok(());
    };
    if json {
        return print_json(&ShowReport {
            preset,
            rows: session.rows(),
        });
    }

    println!("{}", preset.display_name());
    println!("{}", preset.meta_line());
    if !preset.metadata.description.is_empty() {
        println!("{}", preset.metadata.description);
    }
    println!();
    for row in session.rows() {
        println!(
            "{:<28} {:<32} {:<10} {}",
            row.id(),
            row.tweak.name,
            row.tweak.risk_level,
            row.tweak.category
        );
    }
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunReport<'a> {
    preset_id: Option<&'a str>,
    mode: AutomationMode,
    outcome: RunOutcome,
    results: &'a [ResultRow],
    rows: &'a [TweakRow],
}

fn print_report(session: &Session, mode: AutomationMode, outcome: RunOutcome, json: bool) -> Result<()> {
    if json {
        return print_json(&RunReport {
            preset_id: session.selected(),
            mode,
            outcome,
            results: session.results(),
            rows: session.rows(),
        });
    }

    if mode.is_apply_family() {
        for row in session.results() {
            println!(
                "{:<8} {:<32} {:<24} {}",
                row.status, row.display_name, row.target, row.message
            );
            if !row.details.is_empty() {
                println!("{:<8} {}", "", row.details);
            }
        }
        println!();
    }

    for row in session.rows() {
        println!("{:<10} {:<28} {}", row.status.to_string(), row.id(), row.tweak.name);
        for line in row.status_details.lines() {
            println!("{:<10} {}", "", line);
        }
    }
    Ok(())
}
