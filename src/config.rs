//! Orchestrator settings
//!
//! Settings are layered, later layers winning field by field:
//!
//! 1. built-in defaults (an `Automation` folder next to the executable)
//! 2. an optional JSON settings file (`--config`)
//! 3. environment variables (`WGE_AUTOMATION_ROOT`, `WGE_MANIFEST_DIR`,
//!    `WGE_SCRIPT`, `WGE_BACKEND`, `WGE_TIMEOUT_SECS`)
//! 4. command-line flags
//!
//! Resolution never fails because the backend is missing; that is reported by
//! the automation client when a run is attempted.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default deadline for one backend run
pub const DEFAULT_TIMEOUT_SECS: u64 = 900;

/// Name of the automation entry-point script inside the automation root
pub const SCRIPT_NAME: &str = "wge.ps1";

/// Partial settings from one layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct SettingsLayer {
    pub automation_root: Option<PathBuf>,
    pub manifest_dir: Option<PathBuf>,
    pub script: Option<PathBuf>,
    pub backend: Option<PathBuf>,
    /// `0` disables the deadline
    pub timeout_secs: Option<u64>,
}

impl SettingsLayer {
    /// Load a settings layer from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings from {:?}", path.as_ref()))?;

        let layer: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse settings JSON in {:?}", path.as_ref()))?;

        Ok(layer)
    }

    /// Build a layer from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a layer from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from)
        };

        let timeout_secs = match lookup("WGE_TIMEOUT_SECS") {
            Some(raw) if !raw.trim().is_empty() => Some(
                raw.trim()
                    .parse::<u64>()
                    .with_context(|| format!("WGE_TIMEOUT_SECS is not a number: {:?}", raw))?,
            ),
            _ => None,
        };

        Ok(Self {
            automation_root: path("WGE_AUTOMATION_ROOT"),
            manifest_dir: path("WGE_MANIFEST_DIR"),
            script: path("WGE_SCRIPT"),
            backend: path("WGE_BACKEND"),
            timeout_secs,
        })
    }

    /// Overlay `other` on top of `self`; set fields in `other` win
    pub fn merge(self, other: SettingsLayer) -> SettingsLayer {
        SettingsLayer {
            automation_root: other.automation_root.or(self.automation_root),
            manifest_dir: other.manifest_dir.or(self.manifest_dir),
            script: other.script.or(self.script),
            backend: other.backend.or(self.backend),
            timeout_secs: other.timeout_secs.or(self.timeout_secs),
        }
    }

    /// Fill in defaults for everything still unset
    pub fn resolve(self) -> Settings {
        let automation_root = self.automation_root.unwrap_or_else(default_automation_root);
        let manifest_dir = self
            .manifest_dir
            .unwrap_or_else(|| automation_root.join("manifests"));
        let script = self.script.unwrap_or_else(|| automation_root.join(SCRIPT_NAME));
        let backend = self.backend.or_else(default_backend);
        let timeout = match self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Settings {
            automation_root,
            manifest_dir,
            script,
            backend,
            timeout,
        }
    }
}

/// Fully resolved settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub automation_root: PathBuf,
    pub manifest_dir: PathBuf,
    /// Automation entry-point script passed to the backend via `-File`
    pub script: PathBuf,
    /// PowerShell host executable; `None` when none could be located
    pub backend: Option<PathBuf>,
    /// Deadline for one backend run; `None` waits forever
    pub timeout: Option<Duration>,
}

impl Settings {
    /// Settings rooted at `automation_root` with every other field defaulted
    pub fn for_root(automation_root: impl Into<PathBuf>) -> Self {
        SettingsLayer {
            automation_root: Some(automation_root.into()),
            ..Default::default()
        }
        .resolve()
    }
}

/// `Automation` next to the executable when present, else `./Automation`
fn default_automation_root() -> PathBuf {
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        let candidate = dir.join("Automation");
        if candidate.is_dir() {
            return candidate;
        }
    }
    PathBuf::from("Automation")
}

/// Windows PowerShell 5.1 from the system directory
#[cfg(windows)]
fn default_backend() -> Option<PathBuf> {
    let system_root = std::env::var_os("SystemRoot")?;
    Some(
        PathBuf::from(system_root)
            .join("System32")
            .join("WindowsPowerShell")
            .join("v1.0")
            .join("powershell.exe"),
    )
}

/// First PowerShell host found on `PATH`
#[cfg(not(windows))]
fn default_backend() -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    find_on_path(&path, &["pwsh", "powershell"])
}

#[cfg_attr(windows, allow(dead_code))]
fn find_on_path(path: &std::ffi::OsStr, names: &[&str]) -> Option<PathBuf> {
    std::env::split_paths(path)
        .flat_map(|dir| names.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_resolve_derives_paths_from_root() {
        let settings = Settings::for_root("/opt/wge/Automation");

        assert_eq!(
            settings.manifest_dir,
            PathBuf::from("/opt/wge/Automation/manifests")
        );
        assert_eq!(settings.script, PathBuf::from("/opt/wge/Automation/wge.ps1"));
        assert_eq!(settings.timeout, Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)));
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        let settings = SettingsLayer {
            timeout_secs: Some(0),
            ..Default::default()
        }
        .resolve();
        assert_eq!(settings.timeout, None);
    }

    #[test]
    fn test_merge_later_layer_wins() {
        let file = SettingsLayer {
            automation_root: Some(PathBuf::from("/from/file")),
            timeout_secs: Some(60),
            ..Default::default()
        };
        let env = SettingsLayer {
            automation_root: Some(PathBuf::from("/from/env")),
            ..Default::default()
        };

        let merged = file.merge(env);
        assert_eq!(merged.automation_root, Some(PathBuf::from("/from/env")));
        assert_eq!(merged.timeout_secs, Some(60));
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("WGE_BACKEND", "/usr/bin/pwsh"),
            ("WGE_TIMEOUT_SECS", " 30 "),
            ("WGE_SCRIPT", ""),
        ]
        .into_iter()
        .collect();

        let layer =
            SettingsLayer::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(layer.backend, Some(PathBuf::from("/usr/bin/pwsh")));
        assert_eq!(layer.timeout_secs, Some(30));
        assert_eq!(layer.script, None);
        assert_eq!(layer.automation_root, None);
    }

    #[test]
    fn test_from_lookup_rejects_bad_timeout() {
        let result = SettingsLayer::from_lookup(|key| {
            (key == "WGE_TIMEOUT_SECS").then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write;

        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"automationRoot": "/srv/Automation", "timeoutSecs": 120}}"#
        )
        .unwrap();

        let layer = SettingsLayer::load_from_file(file.path()).unwrap();
        assert_eq!(layer.automation_root, Some(PathBuf::from("/srv/Automation")));
        assert_eq!(layer.timeout_secs, Some(120));
    }

    #[test]
    fn test_load_from_file_rejects_unknown_keys() {
        use std::io::Write;

        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"automation_root": "/srv"}}"#).unwrap();
        assert!(SettingsLayer::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_find_on_path() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pwsh"), "").unwrap();
        let path = std::env::join_paths([dir.path()]).unwrap();

        assert_eq!(
            find_on_path(&path, &["pwsh", "powershell"]),
            Some(dir.path().join("pwsh"))
        );
        assert_eq!(find_on_path(&path, &["powershell"]), None);
    }
}
