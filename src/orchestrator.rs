//! Orchestrator - composition root of the preset workflow
//!
//! Sequences one run: select preset → backend request → classify (apply,
//! dry run, revert) or reconcile (status probe) → expose the new state.
//!
//! All mutable UI-facing state lives in a [`Session`] value that the caller
//! owns and passes into every operation. Changes are announced as
//! [`OrchestratorEvent`]s on channels handed out by
//! [`Orchestrator::subscribe`].
//!
//! # Run state machine
//!
//! ```text
//! Idle → Running → Reported(Structured | Fallback | LaunchFailure) → Idle
//! ```
//!
//! Only one run is in flight per orchestrator. An apply, dry run or revert is
//! followed by a status probe of the same preset inside the same busy window;
//! the session only returns to `Idle` once that probe has been reported.

use crate::backend::{
    AutomationBackend, AutomationClient, CancelFlag, RawOutput, RunResult, Summary, Termination,
};
use crate::config::Settings;
use crate::error::{Result, WgeError};
use crate::executor::{AutomationRequest, AutomationResponse, ExecutorHandle, RequestId};
use crate::manifest::{ManifestStore, Preset};
use crate::protocol::{AutomationSummary, PresetStatusSummary};
use crate::results::{self, ResultRow};
use crate::status::{self, TweakRow};
use crate::types::AutomationMode;
use serde::Serialize;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;
use tracing::{debug, warn};

const REFRESHED: &str = "Refreshed presets and status information.";

/// How a single backend invocation was reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunOutcome {
    Structured,
    Fallback,
    LaunchFailure,
}

impl From<&RunResult> for RunOutcome {
    fn from(result: &RunResult) -> Self {
        match result {
            RunResult::Structured { .. } => Self::Structured,
            RunResult::Fallback { .. } => Self::Fallback,
            RunResult::LaunchFailure { .. } => Self::LaunchFailure,
        }
    }
}

/// Per-invocation state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum RunPhase {
    #[default]
    Idle,
    Running {
        preset_id: String,
        mode: AutomationMode,
    },
    Reported {
        mode: AutomationMode,
        outcome: RunOutcome,
    },
}

/// Change notifications for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorEvent {
    /// Operator-facing log line
    Log(String),
    /// Triggering affordances (apply/dry run/revert/refresh/selection) must be
    /// disabled while `true`
    Busy(bool),
    CatalogChanged,
    SelectionChanged(Option<String>),
    RowsChanged,
    ResultsChanged,
    PhaseChanged(RunPhase),
}

#[derive(Debug, Clone)]
struct InFlight {
    request_id: RequestId,
    preset_id: String,
    mode: AutomationMode,
    /// Probe queued by [`Orchestrator::refresh`]
    refresh: bool,
}

/// Caller-owned state of one orchestrator session
#[derive(Debug, Default)]
pub struct Session {
    presets: Vec<Preset>,
    selected: Option<String>,
    rows: Vec<TweakRow>,
    results: Vec<ResultRow>,
    phase: RunPhase,
    in_flight: Option<InFlight>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn presets(&self) -> &[Preset] {
        &self.presets
    }

    /// Backend-facing id of the selected preset
    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn selected_preset(&self) -> Option<&Preset> {
        let id = self.selected.as_deref()?;
        self.presets.iter().find(|p| p.id == id)
    }

    pub fn rows(&self) -> &[TweakRow] {
        &self.rows
    }

    pub fn results(&self) -> &[ResultRow] {
        &self.results
    }

    pub fn phase(&self) -> &RunPhase {
        &self.phase
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    fn preset_name(&self, preset_id: &str) -> String {
        self.presets
            .iter()
            .find(|p| p.id == preset_id)
            .map(|p| p.metadata.name.clone())
            .unwrap_or_else(|| preset_id.to_string())
    }
}

/// What a call to [`Orchestrator::complete`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The response was applied and a follow-up status probe was queued
    FollowUp {
        outcome: RunOutcome,
        request_id: RequestId,
    },
    /// The response was applied and the session is idle again
    Finished { outcome: RunOutcome },
    /// The response did not belong to the run in flight
    Ignored,
}

/// Drives manifests, backend runs and session state
pub struct Orchestrator {
    store: ManifestStore,
    backend: Arc<dyn AutomationBackend>,
    executor: ExecutorHandle,
    deadline: Option<Duration>,
    cancel: CancelFlag,
    next_id: RequestId,
    listeners: Vec<Sender<OrchestratorEvent>>,
}

impl Orchestrator {
    /// Orchestrator backed by the real automation client
    pub fn from_settings(settings: &Settings) -> Self {
        Self::with_backend(
            ManifestStore::new(&settings.manifest_dir),
            Arc::new(AutomationClient::from_settings(settings)),
            settings.timeout,
        )
    }

    pub fn with_backend(
        store: ManifestStore,
        backend: Arc<dyn AutomationBackend>,
        deadline: Option<Duration>,
    ) -> Self {
        Self {
            store,
            executor: ExecutorHandle::spawn(Arc::clone(&backend)),
            backend,
            deadline,
            cancel: CancelFlag::new(),
            next_id: 1,
            listeners: Vec::new(),
        }
    }

    /// Register a new event listener
    pub fn subscribe(&mut self) -> Receiver<OrchestratorEvent> {
        let (tx, rx) = mpsc::channel();
        self.listeners.push(tx);
        rx
    }

    fn emit(&mut self, event: OrchestratorEvent) {
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        if message.trim().is_empty() {
            return;
        }
        debug!("{}", message);
        self.emit(OrchestratorEvent::Log(message));
    }

    fn set_phase(&mut self, session: &mut Session, phase: RunPhase) {
        session.phase = phase.clone();
        self.emit(OrchestratorEvent::PhaseChanged(phase));
    }

    /// Reload all manifests. Keeps the selection when the preset still exists,
    /// otherwise selects the first preset.
    pub fn load_presets(&mut self, session: &mut Session) -> Result<usize> {
        if session.is_busy() {
            return Err(WgeError::Busy);
        }

        let report = self.store.load_with_report();
        if report.directory_missing {
            let message = format!("Manifest directory not found: {}", self.store.dir().display());
            self.log(message);
        }
        for skipped in &report.skipped {
            let message = skipped.to_string();
            self.log(message);
        }

        session.presets = report.presets;
        self.emit(OrchestratorEvent::CatalogChanged);

        let count = session.presets.len();
        if count == 0 {
            let message = format!(
                "No manifests were found. Drop JSON manifest files into {} to continue.",
                self.store.dir().display()
            );
            self.log(message);
            session.selected = None;
            session.rows.clear();
            self.emit(OrchestratorEvent::SelectionChanged(None));
            self.emit(OrchestratorEvent::RowsChanged);
            return Ok(0);
        }

        let keep = session
            .selected
            .clone()
            .filter(|id| session.presets.iter().any(|p| &p.id == id));
        let target = keep.unwrap_or_else(|| session.presets[0].id.clone());
        self.select_preset(session, &target)?;

        Ok(count)
    }

    /// Select a preset and rebuild its rows (all `Pending`)
    pub fn select_preset(&mut self, session: &mut Session, preset_id: &str) -> Result<()> {
        if session.is_busy() {
            return Err(WgeError::Busy);
        }

        let preset = session
            .presets
            .iter()
            .find(|p| p.id == preset_id)
            .ok_or_else(|| WgeError::UnknownPreset(preset_id.to_string()))?;

        session.rows = status::rows_for(&preset.tweaks);
        session.selected = Some(preset.id.clone());
        debug!("Selected preset {}", preset.display_name());

        self.emit(OrchestratorEvent::SelectionChanged(session.selected.clone()));
        self.emit(OrchestratorEvent::RowsChanged);
        Ok(())
    }

    /// Select a preset and immediately queue a status probe for it
    pub fn select_and_probe(&mut self, session: &mut Session, preset_id: &str) -> Result<RequestId> {
        self.select_preset(session, preset_id)?;
        self.start_run(session, AutomationMode::StatusProbe)
    }

    /// Reload manifests and, if a preset is selected, queue a status probe.
    ///
    /// The completion line is logged once that probe has been reported.
    pub fn refresh(&mut self, session: &mut Session) -> Result<Option<RequestId>> {
        self.load_presets(session)?;
        if session.selected.is_none() {
            self.log(REFRESHED);
            return Ok(None);
        }
        let id = self.start_run(session, AutomationMode::StatusProbe)?;
        if let Some(run) = session.in_flight.as_mut() {
            run.refresh = true;
        }
        Ok(Some(id))
    }

    /// Start a run for the selected preset. Returns once the request is queued.
    pub fn start_run(&mut self, session: &mut Session, mode: AutomationMode) -> Result<RequestId> {
        if session.is_busy() {
            return Err(WgeError::Busy);
        }

        let Some(preset) = session.selected_preset() else {
            self.log("Pick a preset before applying anything.");
            return Err(WgeError::NoPresetSelected);
        };
        let preset_id = preset.id.clone();
        let preset_name = preset.metadata.name.clone();

        if mode.is_apply_family() {
            if let Err(e) = self.backend.preflight() {
                self.log(e.to_string());
                return Err(e);
            }
            self.log(format!(
                "{} preset '{}' ({})...",
                mode.action_label(),
                preset_name,
                preset_id
            ));
            session.results.clear();
            self.emit(OrchestratorEvent::ResultsChanged);
        } else {
            debug!("Checking current system status of '{}'", preset_id);
        }

        self.cancel = CancelFlag::new();
        let request_id = self.dispatch(session, preset_id, mode)?;
        self.emit(OrchestratorEvent::Busy(true));
        Ok(request_id)
    }

    fn dispatch(&mut self, session: &mut Session, preset_id: String, mode: AutomationMode) -> Result<RequestId> {
        let request_id = self.next_id;
        self.next_id += 1;

        self.executor
            .requests
            .send(AutomationRequest {
                id: request_id,
                preset_id: preset_id.clone(),
                mode,
                deadline: self.deadline,
                cancel: self.cancel.clone(),
            })
            .map_err(|_| WgeError::ExecutorClosed)?;

        session.in_flight = Some(InFlight {
            request_id,
            preset_id: preset_id.clone(),
            mode,
            refresh: false,
        });
        self.set_phase(session, RunPhase::Running { preset_id, mode });
        Ok(request_id)
    }

    /// Ask the running backend, if any, to stop
    pub fn cancel_run(&self) {
        self.cancel.cancel();
    }

    /// Next response from the worker, without blocking
    pub fn try_next_response(&self) -> Option<AutomationResponse> {
        self.executor.responses.try_recv().ok()
    }

    /// Block until the worker answers
    pub fn next_response(&self) -> Result<AutomationResponse> {
        self.executor
            .responses
            .recv()
            .map_err(|_| WgeError::ExecutorClosed)
    }

    /// Apply a worker response to the session
    pub fn complete(&mut self, session: &mut Session, response: AutomationResponse) -> Result<Step> {
        let Some(in_flight) = session.in_flight.clone() else {
            warn!("Dropping response {} with no run in flight", response.id);
            return Ok(Step::Ignored);
        };
        if in_flight.request_id != response.id {
            warn!(
                "Dropping stale response {} (waiting for {})",
                response.id, in_flight.request_id
            );
            return Ok(Step::Ignored);
        }

        let outcome = RunOutcome::from(&response.result);
        if in_flight.mode.is_apply_family() {
            self.report_automation(session, &in_flight, response.result);
        } else {
            self.report_status(session, &in_flight, response.result);
            if in_flight.refresh {
                self.log(REFRESHED);
            }
        }
        session.in_flight = None;
        self.set_phase(
            session,
            RunPhase::Reported {
                mode: in_flight.mode,
                outcome,
            },
        );

        let still_selected = session.selected.as_deref() == Some(in_flight.preset_id.as_str());
        if in_flight.mode.is_apply_family() && still_selected {
            match self.dispatch(session, in_flight.preset_id, AutomationMode::StatusProbe) {
                Ok(request_id) => return Ok(Step::FollowUp { outcome, request_id }),
                Err(e) => {
                    self.log(format!("Status refresh failed: {}", e));
                }
            }
        }

        self.set_phase(session, RunPhase::Idle);
        self.emit(OrchestratorEvent::Busy(false));
        Ok(Step::Finished { outcome })
    }

    /// Start a run and block until it and its follow-up probe are reported.
    ///
    /// Returns the outcome of the triggering invocation.
    pub fn run_blocking(&mut self, session: &mut Session, mode: AutomationMode) -> Result<RunOutcome> {
        self.start_run(session, mode)?;

        let mut primary = None;
        loop {
            let response = self.next_response()?;
            match self.complete(session, response)? {
                Step::FollowUp { outcome, .. } => {
                    primary.get_or_insert(outcome);
                }
                Step::Finished { outcome } => return Ok(primary.unwrap_or(outcome)),
                Step::Ignored => {}
            }
        }
    }

    fn report_automation(&mut self, session: &mut Session, run: &InFlight, result: RunResult) {
        let preset_name = session.preset_name(&run.preset_id);

        session.results = match result {
            RunResult::Structured {
                summary: Summary::Automation(summary),
                output,
            } => {
                self.log_automation_summary(&summary, &output, run.mode);
                results::classify(&summary.entries)
            }
            RunResult::Structured { output, .. } | RunResult::Fallback { output } => {
                self.log_raw_output(&output);
                self.log(format!("Exit code: {}", output.exit_code_or_default()));
                vec![ResultRow::unstructured(&preset_name, &output)]
            }
            RunResult::LaunchFailure { reason } => {
                self.log(format!("Automation failed: {}", reason));
                vec![ResultRow::launch_failure(&preset_name, &reason)]
            }
        };
        self.emit(OrchestratorEvent::ResultsChanged);
    }

    fn log_automation_summary(&mut self, summary: &AutomationSummary, output: &RawOutput, mode: AutomationMode) {
        let message = summary
            .message
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "Preset completed.".to_string());
        self.log(message);

        if let Some(counts) = &summary.counts {
            self.log(format!(
                "Totals -> ok: {}, fail: {}, skipped: {}, previewed: {}",
                counts.succeeded, counts.failed, counts.skipped, counts.what_if
            ));
        }

        let action_log = summary
            .action_log_path
            .as_deref()
            .filter(|p| !p.trim().is_empty());
        match (mode, action_log) {
            (AutomationMode::DryRun, _) => self.log("Dry run only; no changes saved."),
            (_, Some(path)) => self.log(format!("Action log saved to {}", path)),
            _ => {}
        }

        if !output.stderr.trim().is_empty() {
            self.log(format!("stderr: {}", output.stderr.trim()));
        }
        self.log(format!("Exit code: {}", output.exit_code_or_default()));
    }

    fn log_raw_output(&mut self, output: &RawOutput) {
        self.log(output.stdout.trim().to_string());
        if !output.stderr.trim().is_empty() {
            self.log(format!("stderr: {}", output.stderr.trim()));
        }
        match output.terminated {
            Some(Termination::Timeout(limit)) => {
                self.log(format!("Backend timed out after {}s and was stopped.", limit.as_secs()));
            }
            Some(Termination::Cancelled) => self.log("Backend run was cancelled."),
            None => {}
        }
    }

    fn report_status(&mut self, session: &mut Session, run: &InFlight, result: RunResult) {
        match result {
            RunResult::Structured {
                summary: Summary::Status(summary),
                ..
            } => self.apply_status(session, run, &summary),
            RunResult::Structured { output, .. } | RunResult::Fallback { output } => {
                self.log_raw_output(&output);
                self.log(format!(
                    "Status probe exited with {}.",
                    output.exit_code_or_default()
                ));
            }
            RunResult::LaunchFailure { reason } => {
                self.log(format!("Cannot refresh status: {}", reason));
            }
        }
    }

    fn apply_status(&mut self, session: &mut Session, run: &InFlight, summary: &PresetStatusSummary) {
        if session.selected.as_deref() != Some(run.preset_id.as_str()) {
            debug!("Status for '{}' arrived after selection changed", run.preset_id);
            return;
        }
        status::reconcile(&mut session.rows, summary);
        self.emit(OrchestratorEvent::RowsChanged);
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.executor.shutdown();
    }
}
