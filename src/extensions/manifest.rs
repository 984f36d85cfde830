//! Extension manifests and install records.
//!
//! Each extension directory carries a `manifest.json`:
//!
//! ```json
//! { "id": "word-count", "name": "Word Count", "version": "1.0.0", "main": "main.js" }
//! ```
//!
//! Installing copies the directory under the host's extensions directory and
//! persists an [`ExtensionRecord`] in the settings store.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use walkdir::WalkDir;

use super::error::{ExtensionError, ExtensionResult};
use super::storage::HostStore;

pub const MANIFEST_FILE: &str = "manifest.json";

/// Version checked against a manifest's `minHostVersion`.
pub const HOST_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Store key holding all install records.
pub const INSTALLED_KEY: &str = "plugins:installed";

fn default_main() -> String {
    "main.js".to_string()
}

/// Manifest parsed from `manifest.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionManifest {
    /// Unique identifier (lowercase alphanumeric, `-`, `_`, `.`).
    pub id: String,

    /// Human-readable name; falls back to the id.
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub author: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Entry module relative to the extension root.
    #[serde(default = "default_main")]
    pub main: String,

    /// Minimum host version required. Partial versions (`0.3`) are allowed.
    #[serde(default)]
    pub min_host_version: Option<String>,

    /// Show the extension's menu entry in the menu bar instead of the
    /// shared plugins menu.
    #[serde(default)]
    pub show_in_menu_bar: bool,
}

impl ExtensionManifest {
    /// Load manifest from a directory containing `manifest.json`.
    pub fn load(extension_dir: &Path) -> ExtensionResult<Self> {
        let manifest_path = extension_dir.join(MANIFEST_FILE);

        if !manifest_path.exists() {
            return Err(ExtensionError::ManifestNotFound(
                extension_dir.to_path_buf(),
            ));
        }

        let content = fs::read_to_string(&manifest_path)
            .map_err(|e| ExtensionError::io("Failed to read manifest", e))?;

        let manifest: Self =
            serde_json::from_str(&content).map_err(|e| ExtensionError::ManifestInvalid {
                path: manifest_path.clone(),
                message: e.to_string(),
            })?;
        manifest.validate(&manifest_path)?;
        Ok(manifest)
    }

    /// Validate required fields and constraints.
    pub fn validate(&self, path: &Path) -> ExtensionResult<()> {
        let invalid = |message: String| ExtensionError::ManifestInvalid {
            path: path.to_path_buf(),
            message,
        };

        if self.id.is_empty() {
            return Err(invalid("id is required".to_string()));
        }
        if !self
            .id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '.'))
        {
            return Err(invalid(format!(
                "id '{}' must be lowercase alphanumeric with '-', '_' or '.'",
                self.id
            )));
        }
        if self.id.starts_with('.') {
            return Err(invalid("id must not start with '.'".to_string()));
        }
        if !is_relative_inside(&self.main) {
            return Err(invalid(format!(
                "main '{}' must be a relative path inside the extension",
                self.main
            )));
        }
        if let Some(min) = self.min_host_version.as_deref().map(str::trim) {
            if !min.is_empty() {
                let required = VersionReq::parse(&format!(">={min}"))
                    .map_err(|e| invalid(format!("minHostVersion '{min}' is not a version: {e}")))?;
                let host = Version::parse(HOST_VERSION)
                    .map_err(|e| invalid(format!("host version '{HOST_VERSION}' is invalid: {e}")))?;
                if !required.matches(&host) {
                    return Err(invalid(format!(
                        "requires host version {min} or newer (running {HOST_VERSION})"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Reject empty, absolute and parent-escaping entry paths.
fn is_relative_inside(path: &str) -> bool {
    let path = Path::new(path);
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// An installed extension. Immutable after install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Absolute install directory.
    pub dir: PathBuf,
    #[serde(default = "default_main")]
    pub main: String,
    #[serde(default)]
    pub show_in_menu_bar: bool,
}

impl ExtensionRecord {
    pub fn new(id: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            version: String::new(),
            dir: dir.into(),
            main: default_main(),
            show_in_menu_bar: false,
        }
    }

    pub fn from_manifest(manifest: &ExtensionManifest, dir: PathBuf) -> Self {
        let name = if manifest.name.trim().is_empty() {
            manifest.id.clone()
        } else {
            manifest.name.clone()
        };
        Self {
            id: manifest.id.clone(),
            name,
            version: manifest.version.clone(),
            dir,
            main: manifest.main.clone(),
            show_in_menu_bar: manifest.show_in_menu_bar,
        }
    }

    pub fn main_path(&self) -> PathBuf {
        self.dir.join(&self.main)
    }
}

/// Read install records from the store. Malformed entries are skipped.
pub fn load_installed(store: &HostStore) -> BTreeMap<String, ExtensionRecord> {
    let Some(Value::Object(map)) = store.get(INSTALLED_KEY) else {
        return BTreeMap::new();
    };
    map.iter()
        .filter_map(|(id, value)| {
            match serde_json::from_value::<ExtensionRecord>(value.clone()) {
                Ok(record) => Some((id.clone(), record)),
                Err(e) => {
                    tracing::warn!(extension = %id, error = %e, "Skipping malformed install record");
                    None
                }
            }
        })
        .collect()
}

pub fn save_installed(
    store: &mut HostStore,
    records: &BTreeMap<String, ExtensionRecord>,
) -> ExtensionResult<()> {
    let value = serde_json::to_value(records)?;
    store.set(INSTALLED_KEY, value)
}

/// Copy an extension directory tree into `dest`, replacing it.
pub fn copy_extension_dir(source: &Path, dest: &Path) -> ExtensionResult<()> {
    if dest.exists() {
        fs::remove_dir_all(dest)
            .map_err(|e| ExtensionError::io("Failed to remove previous install", e))?;
    }
    fs::create_dir_all(dest)
        .map_err(|e| ExtensionError::io("Failed to create install directory", e))?;

    for entry in WalkDir::new(source).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| {
            ExtensionError::io("Failed to read extension source", std::io::Error::other(e))
        })?;
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| ExtensionError::io("Failed to create directory", e))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)
                .map_err(|e| ExtensionError::io(format!("Failed to copy {}", relative.display()), e))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_manifest(dir: &Path, json: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(MANIFEST_FILE), json).unwrap();
    }

    #[test]
    fn test_load_minimal_manifest() {
        let temp = TempDir::new().unwrap();
        write_manifest(temp.path(), r#"{"id": "word-count"}"#);

        let manifest = ExtensionManifest::load(temp.path()).unwrap();
        assert_eq!(manifest.main, "main.js");
        assert!(!manifest.show_in_menu_bar);

        let record = ExtensionRecord::from_manifest(&manifest, temp.path().to_path_buf());
        assert_eq!(record.name, "word-count");
        assert_eq!(record.main_path(), temp.path().join("main.js"));
    }

    #[test]
    fn test_camel_case_fields() {
        let temp = TempDir::new().unwrap();
        write_manifest(
            temp.path(),
            r#"{"id": "x", "name": "X", "version": "1.2.0", "minHostVersion": "0.1", "showInMenuBar": true}"#,
        );
        let manifest = ExtensionManifest::load(temp.path()).unwrap();
        assert_eq!(manifest.min_host_version.as_deref(), Some("0.1"));
        assert!(manifest.show_in_menu_bar);
    }

    #[test]
    fn test_min_host_version_is_enforced() {
        let temp = TempDir::new().unwrap();
        write_manifest(
            temp.path(),
            &format!(r#"{{"id": "x", "minHostVersion": "{HOST_VERSION}"}}"#),
        );
        assert!(ExtensionManifest::load(temp.path()).is_ok());

        for min in ["99.0", "not-a-version"] {
            write_manifest(
                temp.path(),
                &format!(r#"{{"id": "x", "minHostVersion": "{min}"}}"#),
            );
            match ExtensionManifest::load(temp.path()) {
                Err(ExtensionError::ManifestInvalid { message, .. }) => {
                    assert!(message.contains(min), "{message}")
                }
                other => panic!("accepted {min}: {other:?}"),
            }
        }
    }

    #[test]
    fn test_missing_manifest() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            ExtensionManifest::load(temp.path()),
            Err(ExtensionError::ManifestNotFound(_))
        ));
    }

    #[test]
    fn test_invalid_manifests() {
        let temp = TempDir::new().unwrap();
        for json in [
            r#"{"id": ""}"#,
            r#"{"id": "Bad Id"}"#,
            r#"{"id": "ok", "main": "../escape.js"}"#,
            r#"{"id": "ok", "main": "/abs.js"}"#,
            r#"not json"#,
        ] {
            write_manifest(temp.path(), json);
            assert!(
                matches!(
                    ExtensionManifest::load(temp.path()),
                    Err(ExtensionError::ManifestInvalid { .. })
                ),
                "accepted {json}"
            );
        }
    }

    #[test]
    fn test_installed_records_round_trip() {
        let mut store = HostStore::in_memory();
        let mut records = BTreeMap::new();
        records.insert("a".to_string(), ExtensionRecord::new("a", "/ext/a"));
        save_installed(&mut store, &records).unwrap();

        assert_eq!(load_installed(&store), records);
    }

    #[test]
    fn test_malformed_record_is_skipped() {
        let mut store = HostStore::in_memory();
        store
            .set(
                INSTALLED_KEY,
                serde_json::json!({"good": {"id": "good", "name": "Good", "dir": "/x"}, "bad": 3}),
            )
            .unwrap();
        let records = load_installed(&store);
        assert_eq!(records.len(), 1);
        assert_eq!(records["good"].main, "main.js");
    }

    #[test]
    fn test_copy_extension_dir_replaces_target() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("src");
        fs::create_dir_all(source.join("lib")).unwrap();
        fs::write(source.join("main.js"), "export function activate() {}").unwrap();
        fs::write(source.join("lib").join("util.js"), "").unwrap();

        let dest = temp.path().join("installed");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("stale.js"), "").unwrap();

        copy_extension_dir(&source, &dest).unwrap();
        assert!(dest.join("main.js").exists());
        assert!(dest.join("lib").join("util.js").exists());
        assert!(!dest.join("stale.js").exists());
    }
}
