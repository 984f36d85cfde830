use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::PlumeResult;
use crate::extensions::LibraryKeyHasher;

/// Application-local data directory, resolved once per process.
static DEFAULT_APP_DATA_DIR: Lazy<PathBuf> = Lazy::new(|| {
    dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("share")))
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("plume")
});

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub paths: PathsConfig,
    pub library: LibraryConfig,
    pub runtime: RuntimeConfig,
}

/// Where the host keeps installed extensions, the settings store and
/// per-library extension data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Overrides the application-local data directory (`~` is expanded).
    pub app_data_dir: Option<String>,
    /// Overrides `<app_data_dir>/plugins`.
    pub extensions_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Extension allow-list used by `list_library_files` when the caller
    /// does not pass one.
    pub default_extensions: Vec<String>,
    /// Default recursion limit for library listings.
    pub max_depth: usize,
    /// Highest `-N` suffix tried by the rename-auto conflict policy.
    pub rename_attempts: u32,
    /// Digest used for per-library data directory names.
    pub key_hasher: LibraryKeyHasher,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Longest error message shown in activation-failure notices.
    pub notice_message_limit: usize,
    /// How long activation-failure notices stay on screen.
    pub notice_duration_ms: u64,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            default_extensions: vec!["md".to_string(), "markdown".to_string()],
            max_depth: 32,
            rename_attempts: 10_000,
            key_hasher: LibraryKeyHasher::default(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            notice_message_limit: 120,
            notice_duration_ms: 3000,
        }
    }
}

impl HostConfig {
    /// Get the config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .map(|h| h.join(".config"))
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
            })
            .join("plume")
            .join("host.toml")
    }

    /// Load config from the default location, or return defaults if missing
    /// or unreadable.
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to load host config, using defaults");
                Self::default()
            }
        }
    }

    /// Load and validate config from an explicit file.
    pub fn load_from(path: &Path) -> PlumeResult<Self> {
        let content = fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.validate();
        Ok(config)
    }

    /// Clamp values to acceptable ranges
    fn validate(&mut self) {
        self.library.max_depth = self.library.max_depth.min(256);
        self.library.rename_attempts = self.library.rename_attempts.clamp(1, 10_000);
        self.runtime.notice_message_limit = self.runtime.notice_message_limit.clamp(16, 2000);

        let mut seen = Vec::new();
        self.library.default_extensions.retain_mut(|ext| {
            *ext = ext.trim().trim_start_matches('.').to_lowercase();
            if ext.is_empty() || seen.contains(ext) {
                return false;
            }
            seen.push(ext.clone());
            true
        });
    }

    /// Save config to an explicit file
    pub fn save_to(&self, path: &Path) -> PlumeResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Application-local data directory.
    pub fn app_data_dir(&self) -> PathBuf {
        match &self.paths.app_data_dir {
            Some(dir) => expand(dir),
            None => DEFAULT_APP_DATA_DIR.clone(),
        }
    }

    /// Directory holding one sub-directory per installed extension.
    pub fn extensions_dir(&self) -> PathBuf {
        match &self.paths.extensions_dir {
            Some(dir) => expand(dir),
            None => self.app_data_dir().join("plugins"),
        }
    }

    /// Host-wide JSON store (install records, `plugin:<id>` blobs).
    pub fn store_path(&self) -> PathBuf {
        self.app_data_dir().join("settings.json")
    }

    /// Root of the per-extension, per-library data directories.
    pub fn plugin_data_root(&self) -> PathBuf {
        self.app_data_dir().join("plugin-data")
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.library.max_depth, 32);
        assert_eq!(config.library.default_extensions, vec!["md", "markdown"]);
        assert_eq!(config.library.key_hasher, LibraryKeyHasher::Sha256);
        assert!(config.extensions_dir().ends_with("plume/plugins"));
    }

    #[test]
    fn test_load_clamps_and_normalizes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("host.toml");
        fs::write(
            &path,
            r#"
[library]
default_extensions = [".MD", "md", " txt "]
max_depth = 9000
rename_attempts = 0
key_hasher = "fnv1a"
"#,
        )
        .unwrap();

        let config = HostConfig::load_from(&path).unwrap();
        assert_eq!(config.library.default_extensions, vec!["md", "txt"]);
        assert_eq!(config.library.max_depth, 256);
        assert_eq!(config.library.rename_attempts, 1);
        assert_eq!(config.library.key_hasher, LibraryKeyHasher::Fnv1a);
        assert_eq!(config.runtime.notice_message_limit, 120);
    }

    #[test]
    fn test_paths_follow_app_data_dir() {
        let temp = TempDir::new().unwrap();
        let mut config = HostConfig::default();
        config.paths.app_data_dir = Some(temp.path().to_string_lossy().into_owned());

        assert_eq!(config.extensions_dir(), temp.path().join("plugins"));
        assert_eq!(config.store_path(), temp.path().join("settings.json"));
        assert_eq!(config.plugin_data_root(), temp.path().join("plugin-data"));
    }

    #[test]
    fn test_save_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("host.toml");
        let mut config = HostConfig::default();
        config.runtime.notice_duration_ms = 5000;
        config.save_to(&path).unwrap();

        let loaded = HostConfig::load_from(&path).unwrap();
        assert_eq!(loaded.runtime.notice_duration_ms, 5000);
    }
}
