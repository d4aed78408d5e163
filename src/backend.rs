//! Automation client
//!
//! Runs the external automation backend for one preset and turns whatever it
//! produced into a [`RunResult`]. This is the only place in the crate that
//! spawns processes.
//!
//! The backend is an independently evolving script and is not trusted:
//! output that does not match the expected schema is not an error, it simply
//! downgrades the result to [`RunResult::Fallback`] so the caller can show the
//! raw text. A backend that cannot be found or started yields
//! [`RunResult::LaunchFailure`] without anything being spawned.
//!
//! There are no retries. Each call is one best-effort attempt, bounded by the
//! deadline and cancel flag in [`ExecutionContext`].

use crate::backend_args::{BackendArgs, PresetInvocation};
use crate::config::Settings;
use crate::error::WgeError;
use crate::process_guard::{self, ChildRegistry, CommandProcessGroup};
use crate::protocol::{AutomationSummary, PresetStatusSummary};
use crate::types::AutomationMode;
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How often a running child is polled for exit, deadline and cancellation
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Time between SIGTERM and SIGKILL when a run is stopped early
const TERMINATE_GRACE: Duration = Duration::from_secs(2);

/// Shared flag that asks a running backend to stop
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-run limits
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// Maximum wall-clock time for the child; `None` waits until it exits
    pub deadline: Option<Duration>,
    pub cancel: CancelFlag,
}

impl ExecutionContext {
    pub fn with_deadline(deadline: Option<Duration>) -> Self {
        Self {
            deadline,
            cancel: CancelFlag::new(),
        }
    }
}

/// Why a run was stopped before the backend exited on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Termination {
    Timeout(Duration),
    Cancelled,
}

/// Everything the backend process left behind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` if the process was ended by a signal
    pub exit_code: Option<i32>,
    pub terminated: Option<Termination>,
}

impl RawOutput {
    /// Exit code for display; `-1` when there is none
    pub fn exit_code_or_default(&self) -> i32 {
        self.exit_code.unwrap_or(-1)
    }
}

/// Mode-appropriate structured document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "document", rename_all = "camelCase")]
pub enum Summary {
    Automation(AutomationSummary),
    Status(PresetStatusSummary),
}

/// Outcome of one backend invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum RunResult {
    /// Stdout parsed as the expected document
    Structured { summary: Summary, output: RawOutput },
    /// The process ran, but stdout was not the expected document
    Fallback { output: RawOutput },
    /// Nothing was run
    LaunchFailure { reason: String },
}

impl RunResult {
    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Structured { .. })
    }

    pub fn output(&self) -> Option<&RawOutput> {
        match self {
            Self::Structured { output, .. } | Self::Fallback { output } => Some(output),
            Self::LaunchFailure { .. } => None,
        }
    }

    fn launch_failure(err: WgeError) -> Self {
        warn!("{}", err);
        Self::LaunchFailure {
            reason: err.to_string(),
        }
    }
}

/// Anything that can execute a preset request.
///
/// Implemented by [`AutomationClient`]; the orchestrator and executor only
/// depend on this trait.
pub trait AutomationBackend: Send + Sync {
    /// Cheap check that a run could be started at all. Spawns nothing.
    fn preflight(&self) -> Result<(), WgeError> {
        Ok(())
    }

    fn execute(&self, preset_id: &str, mode: AutomationMode, ctx: &ExecutionContext) -> RunResult;
}

/// Runs the PowerShell automation backend
#[derive(Debug, Clone)]
pub struct AutomationClient {
    backend: Option<PathBuf>,
    script: PathBuf,
}

impl AutomationClient {
    pub fn new(backend: Option<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            script: script.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.backend.clone(), settings.script.clone())
    }

    /// Resolve backend executable and automation script, or explain what is missing
    fn resolve(&self) -> Result<(&Path, &Path), WgeError> {
        let backend = self.backend.as_deref().ok_or_else(|| {
            WgeError::backend_unavailable(
                "Unable to locate Windows PowerShell. Make sure you run this on Windows 10 or newer, or set WGE_BACKEND.",
            )
        })?;

        if !backend.is_file() {
            return Err(WgeError::backend_unavailable(format!(
                "Backend executable not found: {}",
                backend.display()
            )));
        }

        if !self.script.is_file() {
            return Err(WgeError::backend_unavailable(format!(
                "Automation script missing: {}",
                self.script.display()
            )));
        }

        Ok((backend, &self.script))
    }

    fn spawn(&self, backend: &Path, invocation: &PresetInvocation) -> Result<Child, WgeError> {
        let cli_args = invocation.to_cli_args();
        info!("run backend: {} args={:?}", backend.display(), cli_args);

        let working_dir = invocation
            .script
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        Command::new(backend)
            .args(&cli_args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .in_new_process_group()
            .spawn()
            .map_err(|e| {
                WgeError::launch(format!(
                    "Failed to start {}: {}",
                    backend.display(),
                    e
                ))
            })
    }
}

impl AutomationBackend for AutomationClient {
    fn preflight(&self) -> Result<(), WgeError> {
        self.resolve().map(|_| ())
    }

    fn execute(&self, preset_id: &str, mode: AutomationMode, ctx: &ExecutionContext) -> RunResult {
        let (backend, script) = match self.resolve() {
            Ok(paths) => paths,
            Err(e) => return RunResult::launch_failure(e),
        };

        if ctx.cancel.is_cancelled() {
            debug!("Run for '{}' cancelled before start", preset_id);
            return RunResult::Fallback {
                output: RawOutput {
                    terminated: Some(Termination::Cancelled),
                    ..Default::default()
                },
            };
        }

        let invocation = PresetInvocation::new(script, preset_id, mode);
        let mut child = match self.spawn(backend, &invocation) {
            Ok(child) => child,
            Err(e) => return RunResult::launch_failure(e),
        };

        let start = Instant::now();
        let pid = child.id();
        {
            let registry = ChildRegistry::global();
            // Lock is held briefly, panic is acceptable if poisoned
            let mut guard = registry.lock().expect("ChildRegistry mutex poisoned");
            guard.register(pid);
        }

        let stdout_drain = child.stdout.take().map(PipeDrain::spawn);
        let stderr_drain = child.stderr.take().map(PipeDrain::spawn);
        let drains = [stdout_drain.as_ref(), stderr_drain.as_ref()];

        let waited = wait_bounded(&mut child, ctx, start);

        // Anything left in the child's process group may still hold the pipes
        let pipes_cut = match &waited {
            Ok((_, None)) => wait_for_pipes(&drains, ctx, start),
            Ok((_, Some(reason))) if !pipes_closed_within(&drains, TERMINATE_GRACE) => Some(*reason),
            _ => None,
        };
        if let Some(reason) = pipes_cut {
            warn!(
                "Process group of backend PID {} kept its output open: {:?}",
                pid, reason
            );
            process_guard::terminate_group(pid, TERMINATE_GRACE);
            if !pipes_closed_within(&drains, TERMINATE_GRACE) {
                process_guard::kill_group(pid);
                pipes_closed_within(&drains, TERMINATE_GRACE);
            }
        }

        {
            let registry = ChildRegistry::global();
            let mut guard = registry.lock().expect("ChildRegistry mutex poisoned");
            guard.unregister(pid);
        }

        let stdout = stdout_drain.map(PipeDrain::into_string).unwrap_or_default();
        let stderr = stderr_drain.map(PipeDrain::into_string).unwrap_or_default();

        let (status, terminated) = match waited {
            Ok((status, terminated)) => (status, terminated.or(pipes_cut)),
            Err(e) => {
                return RunResult::launch_failure(WgeError::launch(format!(
                    "Failed waiting for backend: {}",
                    e
                )));
            }
        };

        let output = RawOutput {
            stdout,
            stderr,
            exit_code: status.code(),
            terminated,
        };
        info!(
            "Backend {} for '{}' exited with {:?}",
            mode, preset_id, output.exit_code
        );

        if terminated.is_some() {
            return RunResult::Fallback { output };
        }

        let summary = if mode.is_apply_family() {
            AutomationSummary::parse(&output.stdout).map(Summary::Automation)
        } else {
            PresetStatusSummary::parse(&output.stdout).map(Summary::Status)
        };

        match summary {
            Some(summary) => RunResult::Structured { summary, output },
            None => {
                debug!("Backend output was not structured, falling back to raw text");
                RunResult::Fallback { output }
            }
        }
    }
}

/// Reads a pipe to the end on a helper thread so the child never blocks on a
/// full pipe. Output is kept as it arrives, so a drain that never reaches EOF
/// can be abandoned without losing what was already read.
struct PipeDrain {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: JoinHandle<()>,
}

impl PipeDrain {
    fn spawn<R: Read + Send + 'static>(mut pipe: R) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buf);
        let handle = thread::spawn(move || {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(n) => match sink.lock() {
                        Ok(mut out) => out.extend_from_slice(&chunk[..n]),
                        Err(poisoned) => poisoned.into_inner().extend_from_slice(&chunk[..n]),
                    },
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        warn!("Failed reading backend output: {}", e);
                        break;
                    }
                }
            }
        });
        Self { buf, handle }
    }

    fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Everything read so far. Joins the reader only if it already hit EOF.
    fn into_string(self) -> String {
        if self.handle.is_finished() && self.handle.join().is_err() {
            warn!("Backend output reader panicked");
        }
        let bytes = match self.buf.lock() {
            Ok(out) => out.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

fn all_closed(drains: &[Option<&PipeDrain>]) -> bool {
    drains.iter().flatten().all(|d| d.is_finished())
}

/// Why the run must stop now, if it must
fn stop_reason(ctx: &ExecutionContext, start: Instant) -> Option<Termination> {
    if ctx.cancel.is_cancelled() {
        return Some(Termination::Cancelled);
    }
    ctx.deadline
        .filter(|deadline| start.elapsed() >= *deadline)
        .map(Termination::Timeout)
}

/// Wait for both pipes to reach EOF within the same deadline as the child
fn wait_for_pipes(
    drains: &[Option<&PipeDrain>],
    ctx: &ExecutionContext,
    start: Instant,
) -> Option<Termination> {
    loop {
        if all_closed(drains) {
            return None;
        }
        if let Some(reason) = stop_reason(ctx, start) {
            return Some(reason);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn pipes_closed_within(drains: &[Option<&PipeDrain>], limit: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        if all_closed(drains) {
            return true;
        }
        thread::sleep(POLL_INTERVAL);
    }
    all_closed(drains)
}

/// Wait for the child, stopping it if the deadline passes or the run is cancelled
fn wait_bounded(
    child: &mut Child,
    ctx: &ExecutionContext,
    start: Instant,
) -> std::io::Result<(ExitStatus, Option<Termination>)> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((status, None));
        }

        if let Some(reason) = stop_reason(ctx, start) {
            warn!("Stopping backend PID {}: {:?}", child.id(), reason);
            if !process_guard::terminate_group(child.id(), TERMINATE_GRACE) {
                // Already gone is fine
                let _ = child.kill();
            }
            let status = child.wait()?;
            return Ok((status, Some(reason)));
        }

        thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_backend_is_launch_failure() {
        let dir = TempDir::new().unwrap();
        let client = AutomationClient::new(None, dir.path().join("wge.ps1"));

        let result = client.execute("perf", AutomationMode::Apply, &ExecutionContext::default());
        match result {
            RunResult::LaunchFailure { reason } => {
                assert!(reason.contains("Unable to locate Windows PowerShell"))
            }
            other => panic!("expected launch failure, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_script_is_launch_failure() {
        let dir = TempDir::new().unwrap();
        let backend = dir.path().join("pwsh");
        std::fs::write(&backend, "").unwrap();
        let client = AutomationClient::new(Some(backend), dir.path().join("wge.ps1"));

        let result = client.execute("perf", AutomationMode::StatusProbe, &ExecutionContext::default());
        match result {
            RunResult::LaunchFailure { reason } => assert!(reason.contains("Automation script missing")),
            other => panic!("expected launch failure, got {:?}", other),
        }
    }

    #[test]
    fn test_nonexistent_backend_path_is_launch_failure() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("wge.ps1"), "").unwrap();
        let client = AutomationClient::new(
            Some(dir.path().join("no-such-host")),
            dir.path().join("wge.ps1"),
        );

        let result = client.execute("perf", AutomationMode::Apply, &ExecutionContext::default());
        assert!(matches!(result, RunResult::LaunchFailure { .. }));
        assert!(result.output().is_none());
    }

    #[test]
    fn test_cancel_flag_is_shared() {
        let ctx = ExecutionContext::default();
        let handle = ctx.cancel.clone();
        assert!(!ctx.cancel.is_cancelled());
        handle.cancel();
        assert!(ctx.cancel.is_cancelled());
    }

    #[test]
    fn test_preflight_reports_missing_script() {
        let dir = TempDir::new().unwrap();
        let backend = dir.path().join("pwsh");
        std::fs::write(&backend, "").unwrap();
        let client = AutomationClient::new(Some(backend), dir.path().join("wge.ps1"));

        let err = client.preflight().unwrap_err();
        assert!(matches!(err, WgeError::BackendUnavailable(_)));
        assert!(err.to_string().contains("Automation script missing"));
    }

    #[test]
    fn test_cancelled_before_start_spawns_nothing() {
        let dir = TempDir::new().unwrap();
        // not executable: spawning it would be a launch failure
        let backend = dir.path().join("pwsh");
        let script = dir.path().join("wge.ps1");
        std::fs::write(&backend, "").unwrap();
        std::fs::write(&script, "").unwrap();
        let client = AutomationClient::new(Some(backend), script);

        let ctx = ExecutionContext::default();
        ctx.cancel.cancel();
        let result = client.execute("perf", AutomationMode::StatusProbe, &ctx);

        match result {
            RunResult::Fallback { output } => {
                assert_eq!(output.terminated, Some(Termination::Cancelled));
                assert!(output.stdout.is_empty());
            }
            other => panic!("expected cancelled fallback, got {:?}", other),
        }
    }

    #[test]
    fn test_exit_code_or_default() {
        let output = RawOutput::default();
        assert_eq!(output.exit_code_or_default(), -1);
    }
}
