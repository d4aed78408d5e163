//! Lifecycle management for backend child processes
//!
//! A backend run mutates system configuration, so it must not outlive the
//! orchestrator that started it, and a run that exceeds its deadline must be
//! stopped as a whole (the PowerShell host may itself start helpers).
//!
//! - Children are spawned in their own process group (unix)
//! - Every live child PID is tracked in a global registry
//! - On exit (Drop, SIGTERM, SIGINT, SIGHUP) all tracked groups receive
//!   SIGTERM, then SIGKILL once the grace period is over

use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
#[cfg(unix)]
use std::time::Instant;

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Registry tracking all spawned backend processes
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
    /// Set once `terminate_all` ran, prevents double cleanup
    cleanup_initiated: bool,
}

impl ChildRegistry {
    /// Get or create the global child registry
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        tracing::debug!("Registered backend process PID {}", pid);
    }

    /// Called once the child has been reaped
    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        tracing::debug!("Unregistered backend process PID {}", pid);
    }

    pub fn count(&self) -> usize {
        self.pids.len()
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.pids.contains(&pid)
    }

    /// Terminate every tracked process group.
    /// Sends SIGTERM first, waits up to `grace_period`, then SIGKILL.
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.cleanup_initiated {
            tracing::debug!("Cleanup already initiated, skipping");
            return;
        }
        self.cleanup_initiated = true;

        if self.pids.is_empty() {
            tracing::debug!("No backend processes to terminate");
            return;
        }

        tracing::info!("Terminating {} backend process(es)...", self.pids.len());

        let pids: Vec<u32> = self.pids.iter().copied().collect();
        for &pid in &pids {
            terminate_group(pid, grace_period);
        }

        self.pids.clear();
        tracing::info!("Backend process cleanup complete");
    }
}

/// Stop one process group: SIGTERM, wait up to `grace_period`, then SIGKILL.
///
/// Returns `true` if the leader exited within the grace period.
#[cfg(unix)]
pub fn terminate_group(pid: u32, grace_period: Duration) -> bool {
    use nix::sys::signal::Signal;

    if let Err(e) = signal_group(pid, Signal::SIGTERM) {
        tracing::warn!("Failed to send SIGTERM to process group {}: {}", pid, e);
        if let Err(e2) = signal_pid(pid, Signal::SIGTERM) {
            tracing::warn!("Failed to send SIGTERM to PID {}: {}", pid, e2);
        }
    }

    let start = Instant::now();
    while start.elapsed() < grace_period {
        if !is_process_alive(pid) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    if is_process_alive(pid) {
        tracing::warn!("Process group {} did not terminate, sending SIGKILL", pid);
        if let Err(e) = signal_group(pid, Signal::SIGKILL) {
            tracing::error!("Failed to send SIGKILL to process group {}: {}", pid, e);
            let _ = signal_pid(pid, Signal::SIGKILL);
        }
        return false;
    }
    true
}

/// Without process groups the caller falls back to `Child::kill`.
#[cfg(not(unix))]
pub fn terminate_group(_pid: u32, _grace_period: Duration) -> bool {
    false
}

/// SIGKILL whatever is left in a process group. The leader may already be reaped.
#[cfg(unix)]
pub fn kill_group(pgid: u32) {
    if let Err(e) = signal_group(pgid, nix::sys::signal::Signal::SIGKILL) {
        tracing::debug!("SIGKILL to process group {} failed: {}", pgid, e);
    }
}

#[cfg(not(unix))]
pub fn kill_group(_pgid: u32) {}

#[cfg(unix)]
fn signal_pid(pid: u32, signal: nix::sys::signal::Signal) -> Result<(), nix::Error> {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), signal)
}

/// Negative PID addresses the whole group led by `pgid`
#[cfg(unix)]
fn signal_group(pgid: u32, signal: nix::sys::signal::Signal) -> Result<(), nix::Error> {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(-(pgid as i32)), signal)
}

/// Alive means: exists and is neither a zombie nor dead.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    if nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }

    // Field 3 of /proc/<pid>/stat is the state
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        let fields: Vec<&str> = stat.split_whitespace().collect();
        if fields.len() > 2 {
            return !matches!(fields[2], "Z" | "X");
        }
    }

    // No /proc (macOS): existence is the best we know
    true
}

/// RAII guard that terminates all tracked backend processes on drop
pub struct ProcessGuard {
    registry: Arc<Mutex<ChildRegistry>>,
}

impl ProcessGuard {
    /// Create a new process guard attached to the global registry
    pub fn new() -> Self {
        Self {
            registry: ChildRegistry::global(),
        }
    }

    pub fn child_count(&self) -> usize {
        self.registry.lock().map(|r| r.count()).unwrap_or(0)
    }
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        tracing::debug!("ProcessGuard dropped, initiating cleanup");
        if let Ok(mut registry) = self.registry.lock() {
            registry.terminate_all(Duration::from_secs(5));
        }
    }
}

/// Install SIGINT/SIGTERM/SIGHUP handlers that stop all backend processes
/// before exiting. Call once at program start.
#[cfg(unix)]
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            let signal_name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => "UNKNOWN",
            };

            tracing::info!("Received {}, stopping backend processes...", signal_name);

            if let Ok(mut registry) = ChildRegistry::global().lock() {
                registry.terminate_all(Duration::from_secs(3));
            }

            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    Ok(())
}

/// Extension trait for `std::process::Command` to set up process groups
pub trait CommandProcessGroup {
    /// Run the command as leader of a new process group
    fn in_new_process_group(&mut self) -> &mut Self;
}

#[cfg(unix)]
impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: the closure only performs async-signal-safe syscalls
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(nix::unistd::Pid::from_raw(0), nix::unistd::Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;

                // Child dies with us instead of finishing a half-applied preset unattended
                set_parent_death_signal()
            });
        }
        self
    }
}

#[cfg(target_os = "linux")]
fn set_parent_death_signal() -> std::io::Result<()> {
    // SAFETY: prctl with PR_SET_PDEATHSIG only reads its integer arguments
    if unsafe { nix::libc::prctl(nix::libc::PR_SET_PDEATHSIG, nix::libc::SIGTERM) } == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(all(unix, not(target_os = "linux")))]
fn set_parent_death_signal() -> std::io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        self
    }
}
