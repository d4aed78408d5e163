//! Preset manifests
//!
//! A preset is a JSON document bundling descriptive metadata with an ordered
//! list of tweak definitions:
//!
//! ```json
//! {
//!   "metadata": { "id": "perf", "name": "Performance", "tags": ["fps"] },
//!   "tweaks": [ { "id": "t1", "name": "Disable XYZ", "riskLevel": "low" } ]
//! }
//! ```
//!
//! [`ManifestStore::load_all`] scans one directory (non-recursive, `*.json`
//! only) and loads every file independently. A file that fails to parse, or
//! that has no `metadata` section, is skipped and logged; its siblings still
//! load.

use crate::error::{Result, WgeError};
use crate::protocol::{from_reader_ci, from_str_ci, null_as_default, nullable_list};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ManifestDocument {
    metadata: Option<MetadataDocument>,
    #[serde(deserialize_with = "nullable_list")]
    tweaks: Vec<TweakDefinition>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct MetadataDocument {
    id: Option<String>,
    name: Option<String>,
    description: Option<String>,
    default_state: Option<String>,
    category: Option<String>,
    #[serde(deserialize_with = "nullable_list")]
    tags: Vec<String>,
}

/// Descriptive metadata of a preset, with defaults already substituted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestMetadata {
    pub id: String,
    pub name: String,
    pub description: String,
    pub default_state: String,
    pub category: String,
    pub tags: Vec<String>,
}

/// One tweak as declared in a manifest. Absent fields are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TweakDefinition {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub category: String,
    #[serde(deserialize_with = "null_as_default")]
    pub default_behavior: String,
    #[serde(deserialize_with = "null_as_default")]
    pub when_disabled: String,
    #[serde(deserialize_with = "null_as_default")]
    pub risk_level: String,
}

/// A loaded preset
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    /// Backend-facing id: the manifest file's base name.
    ///
    /// May differ from `metadata.id`; this one is authoritative for backend calls.
    pub id: String,
    pub metadata: ManifestMetadata,
    pub tweaks: Vec<TweakDefinition>,
    /// Always `tweaks.len()`, never read from the document
    pub tweak_count: usize,
    pub path: PathBuf,
}

impl Preset {
    /// Load a preset from a manifest file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| WgeError::manifest_parse(path, e.to_string()))?;
        let document: ManifestDocument = from_reader_ci(BufReader::new(file))
            .map_err(|e| WgeError::manifest_parse(path, e.to_string()))?;

        Self::from_document(document, path)
    }

    /// Build a preset from manifest JSON as if it had been read from `path`
    pub fn from_json(json: &str, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let document: ManifestDocument =
            from_str_ci(json).map_err(|e| WgeError::manifest_parse(path, e.to_string()))?;

        Self::from_document(document, path)
    }

    fn from_document(document: ManifestDocument, path: &Path) -> Result<Self> {
        let metadata = document
            .metadata
            .ok_or_else(|| WgeError::manifest_parse(path, "missing metadata section"))?;

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let metadata = ManifestMetadata {
            id: metadata.id.unwrap_or_else(|| stem.clone()),
            name: metadata.name.unwrap_or_else(|| stem.clone()),
            description: metadata.description.unwrap_or_default(),
            default_state: metadata.default_state.unwrap_or_default(),
            category: metadata.category.unwrap_or_default(),
            tags: metadata.tags,
        };

        let tweaks = document.tweaks;
        Ok(Self {
            id: stem,
            metadata,
            tweak_count: tweaks.len(),
            tweaks,
            path: path.to_path_buf(),
        })
    }

    /// `"<name> (<id>)"`
    pub fn display_name(&self) -> String {
        format!("{} ({})", self.metadata.name, self.metadata.id)
    }

    /// One-line summary shown under the preset title
    pub fn meta_line(&self) -> String {
        let tags = if self.metadata.tags.is_empty() {
            "No tags".to_string()
        } else {
            self.metadata.tags.join(", ")
        };

        format!(
            "ID: {}  •  Category: {}  •  Tweaks: {}  •  Default state: {}  •  Tags: {}",
            self.metadata.id,
            self.metadata.category,
            self.tweak_count,
            self.metadata.default_state,
            tags
        )
    }
}

/// Outcome of a directory scan
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Successfully loaded presets, in file-name order
    pub presets: Vec<Preset>,
    /// One entry per file that was skipped
    pub skipped: Vec<WgeError>,
    /// The manifest directory does not exist
    pub directory_missing: bool,
}

/// Loads preset manifests from a directory
#[derive(Debug, Clone)]
pub struct ManifestStore {
    dir: PathBuf,
}

impl ManifestStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load every manifest in the directory. Never fails for an individual file.
    pub fn load_all(&self) -> Vec<Preset> {
        self.load_with_report().presets
    }

    /// Like [`load_all`](Self::load_all) but also reports what was skipped
    pub fn load_with_report(&self) -> LoadReport {
        let mut report = LoadReport::default();

        if !self.dir.is_dir() {
            warn!("Manifest directory not found: {}", self.dir.display());
            report.directory_missing = true;
            return report;
        }

        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to read manifest directory {}: {}", self.dir.display(), e);
                report.skipped.push(WgeError::Io(e));
                return report;
            }
        };

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry.path()),
                Err(e) => {
                    warn!("Skipping unreadable directory entry: {}", e);
                    None
                }
            })
            .filter(|path| path.is_file() && is_json_file(path))
            .collect();
        files.sort();

        for path in files {
            match Preset::from_file(&path) {
                Ok(preset) => {
                    debug!(
                        "Loaded preset '{}' with {} tweak(s) from {}",
                        preset.id,
                        preset.tweak_count,
                        path.display()
                    );
                    report.presets.push(preset);
                }
                Err(e) => {
                    warn!("Skipping manifest: {}", e);
                    report.skipped.push(e);
                }
            }
        }

        if report.presets.is_empty() {
            info!("No manifests were found in {}", self.dir.display());
        } else {
            info!(
                "Loaded {} preset(s) from {}",
                report.presets.len(),
                self.dir.display()
            );
        }

        report
    }
}

fn is_json_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const PERF: &str = r#"{"metadata":{"id":"perf","name":"Performance","tags":["fps"]},"tweaks":[{"id":"t1","name":"Disable XYZ"}]}"#;

    #[test]
    fn test_preset_from_json() {
        let preset = Preset::from_json(PERF, "/manifests/perf.json").unwrap();

        assert_eq!(preset.id, "perf");
        assert_eq!(preset.tweak_count, 1);
        assert_eq!(preset.display_name(), "Performance (perf)");
        assert_eq!(preset.metadata.tags, vec!["fps".to_string()]);
        assert_eq!(preset.tweaks[0].name, "Disable XYZ");
        assert_eq!(preset.tweaks[0].risk_level, "");
    }

    #[test]
    fn test_missing_metadata_fields_default_to_file_name() {
        let preset = Preset::from_json(r#"{"metadata": {}}"#, "/m/gaming-lite.json").unwrap();

        assert_eq!(preset.metadata.id, "gaming-lite");
        assert_eq!(preset.metadata.name, "gaming-lite");
        assert_eq!(preset.metadata.description, "");
        assert_eq!(preset.metadata.default_state, "");
        assert_eq!(preset.metadata.category, "");
        assert!(preset.metadata.tags.is_empty());
        assert_eq!(preset.tweak_count, 0);
    }

    #[test]
    fn test_file_name_is_backend_id() {
        let preset =
            Preset::from_json(r#"{"metadata": {"id": "performance"}}"#, "/m/perf.json").unwrap();

        assert_eq!(preset.id, "perf");
        assert_eq!(preset.metadata.id, "performance");
    }

    #[test]
    fn test_missing_metadata_is_rejected() {
        let result = Preset::from_json(r#"{"tweaks": []}"#, "/m/x.json");
        assert!(matches!(result, Err(WgeError::ManifestParse { .. })));

        let result = Preset::from_json(r#"{"metadata": null}"#, "/m/x.json");
        assert!(matches!(result, Err(WgeError::ManifestParse { .. })));
    }

    #[test]
    fn test_tweak_count_ignores_document_value() {
        let json = r#"{"metadata": {"tweakCount": 40}, "tweaks": [{"id": "a"}, {"id": "b"}, null]}"#;
        let preset = Preset::from_json(json, "/m/x.json").unwrap();
        assert_eq!(preset.tweak_count, 2);
    }

    #[test]
    fn test_meta_line() {
        let preset = Preset::from_json(PERF, "/m/perf.json").unwrap();
        assert_eq!(
            preset.meta_line(),
            "ID: perf  •  Category:   •  Tweaks: 1  •  Default state:   •  Tags: fps"
        );

        let preset = Preset::from_json(r#"{"metadata": {}}"#, "/m/x.json").unwrap();
        assert!(preset.meta_line().ends_with("Tags: No tags"));
    }

    #[test]
    fn test_load_all_isolates_bad_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.json"), PERF).unwrap();
        fs::write(dir.path().join("b.json"), "{ not json").unwrap();
        fs::write(dir.path().join("c.json"), r#"{"metadata": {"name": "C"}}"#).unwrap();
        fs::write(dir.path().join("d.json"), r#"{"tweaks": []}"#).unwrap();
        fs::write(dir.path().join("readme.txt"), "ignored").unwrap();
        fs::create_dir(dir.path().join("nested.json")).unwrap();

        let report = ManifestStore::new(dir.path()).load_with_report();

        let ids: Vec<&str> = report.presets.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(report.skipped.len(), 2);
        assert!(!report.directory_missing);
    }

    #[test]
    fn test_missing_directory_yields_no_presets() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path().join("does-not-exist"));

        let report = store.load_with_report();
        assert!(report.presets.is_empty());
        assert!(report.directory_missing);
        assert!(store.load_all().is_empty());
    }

    #[test]
    fn test_empty_directory_yields_no_presets() {
        let dir = TempDir::new().unwrap();
        let report = ManifestStore::new(dir.path()).load_with_report();
        assert!(report.presets.is_empty());
        assert!(report.skipped.is_empty());
        assert!(!report.directory_missing);
    }
}
