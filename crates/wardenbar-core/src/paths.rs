//! Standard paths used by wardenbar

use std::env;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "wardenbar";

/// Snapshot file written by the Bitwarden CLI
const SNAPSHOT_FILE: &str = "data.json";

/// Standard wardenbar paths
#[derive(Debug, Clone)]
pub struct Paths {
    /// Data directory (~/.local/share/wardenbar)
    pub data: PathBuf,
    /// Cache directory (~/.cache/wardenbar)
    pub cache: PathBuf,
    /// Config directory (~/.config/wardenbar)
    pub config: PathBuf,
    /// Runtime directory for job lock files
    pub runtime: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

impl Paths {
    pub fn new() -> Self {
        let data = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join(APP_DIR);

        let cache = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("~/.cache"))
            .join(APP_DIR);

        let config = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join(APP_DIR);

        // XDG runtime dir when available, data dir otherwise
        let runtime = dirs::runtime_dir()
            .map(|dir| dir.join(APP_DIR))
            .unwrap_or_else(|| data.join("run"));

        Self {
            data,
            cache,
            config,
            runtime,
        }
    }

    /// Build all paths below a single root (used by tests and portable installs)
    pub fn with_root(root: &Path) -> Self {
        Self {
            data: root.join("data"),
            cache: root.join("cache"),
            config: root.join("config"),
            runtime: root.join("run"),
        }
    }

    /// Directory holding one lock file per background job
    pub fn jobs(&self) -> PathBuf {
        self.runtime.join("jobs")
    }

    /// Directory holding downloaded favicons, one per item id
    pub fn icons(&self) -> PathBuf {
        self.cache.join("urlicon")
    }

    /// Path of the config file
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.toml")
    }
}

/// Location of the Bitwarden CLI snapshot when none is configured.
///
/// `BITWARDENCLI_APPDATA_DIR` wins over the platform default, matching the
/// lookup order of the CLI itself.
pub fn default_snapshot_path() -> Option<PathBuf> {
    if let Ok(dir) = env::var("BITWARDENCLI_APPDATA_DIR") {
        if !dir.is_empty() {
            return Some(PathBuf::from(dir).join(SNAPSHOT_FILE));
        }
    }
    dirs::config_dir().map(|dir| dir.join("Bitwarden CLI").join(SNAPSHOT_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_root_layout() {
        let paths = Paths::with_root(Path::new("/tmp/wb"));
        assert_eq!(paths.jobs(), PathBuf::from("/tmp/wb/run/jobs"));
        assert_eq!(paths.icons(), PathBuf::from("/tmp/wb/cache/urlicon"));
        assert_eq!(paths.config_file(), PathBuf::from("/tmp/wb/config/config.toml"));
    }

    #[test]
    fn test_default_snapshot_ends_with_data_json() {
        if let Some(path) = default_snapshot_path() {
            assert!(path.ends_with(SNAPSHOT_FILE));
        }
    }
}
