//! Configuration loading for wardenbar
//!
//! Values come from `config.toml` in the config directory, then single
//! fields are overridden from the environment (the launcher passes its
//! workflow variables that way).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// wardenbar configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bitwarden CLI executable
    pub bw_exec: String,

    /// Explicit snapshot path, platform default when unset
    pub bw_data_path: Option<PathBuf>,

    /// Account email used for login prompts
    pub email: String,

    /// Vault server URL
    pub server_url: String,

    /// Where attachments are written
    pub output_folder: PathBuf,

    /// Item types dropped from the search cache (login, note, card, identity)
    pub skip_types: Vec<String>,

    /// Download favicons for login URLs
    pub icon_cache_enabled: bool,

    /// Minutes before the icon cache counts as stale
    pub icon_cache_age: u64,

    /// Minutes between automatic icon fetches triggered by a search
    pub auto_fetch_icon_cache_age: u64,

    /// Seconds to wait for the email two-step code request
    pub email_max_wait: u64,

    /// Two-step login enabled
    pub sfa_enabled: bool,

    /// Two-step method (0 authenticator, 1 email, 3 YubiKey)
    pub sfa_mode: u8,

    /// Log in with an API key instead of a password
    pub use_apikey: bool,

    /// Maximum number of search results
    pub max_results: usize,

    /// Verbose logging
    pub debug: bool,
}

fn default_output_folder() -> PathBuf {
    dirs::download_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bw_exec: "bw".to_string(),
            bw_data_path: None,
            email: String::new(),
            server_url: "https://bitwarden.com".to_string(),
            output_folder: default_output_folder(),
            skip_types: Vec::new(),
            icon_cache_enabled: true,
            icon_cache_age: 43200,
            auto_fetch_icon_cache_age: 1440,
            email_max_wait: 15,
            sfa_enabled: true,
            sfa_mode: 0,
            use_apikey: false,
            max_results: 1000,
            debug: false,
        }
    }
}

impl Config {
    /// Load configuration from `path`, falling back to defaults, then apply
    /// environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env(|key| env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;

        toml::from_str(&content).with_context(|| format!("Failed to parse config from {:?}", path))
    }

    /// Override fields from a variable lookup. Unparsable values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = var("BW_EXEC") {
            self.bw_exec = v;
        }
        if let Some(v) = var("BW_DATA_PATH") {
            self.bw_data_path = Some(PathBuf::from(v));
        }
        if let Some(v) = var("BW_EMAIL") {
            self.email = v;
        }
        if let Some(v) = var("BW_SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = var("OUTPUT_FOLDER") {
            self.output_folder = PathBuf::from(v);
        }
        if let Some(v) = var("SKIP_TYPES") {
            self.skip_types = v
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        set_parsed(&mut self.icon_cache_enabled, var("ICON_CACHE_ENABLED"));
        set_parsed(&mut self.icon_cache_age, var("ICON_CACHE_AGE"));
        set_parsed(&mut self.auto_fetch_icon_cache_age, var("AUTO_FETCH_ICON_CACHE_AGE"));
        set_parsed(&mut self.email_max_wait, var("EMAIL_MAX_WAIT"));
        set_parsed(&mut self.sfa_enabled, var("2FA_ENABLED"));
        set_parsed(&mut self.sfa_mode, var("2FA_MODE"));
        set_parsed(&mut self.use_apikey, var("USE_APIKEY"));
        set_parsed(&mut self.max_results, var("MAX_RESULTS"));
        set_parsed(&mut self.debug, var("DEBUG"));
    }

    pub fn icon_max_age(&self) -> Duration {
        Duration::from_secs(self.icon_cache_age * 60)
    }

    pub fn auto_fetch_max_age(&self) -> Duration {
        Duration::from_secs(self.auto_fetch_icon_cache_age * 60)
    }

    pub fn email_timeout(&self) -> Duration {
        Duration::from_secs(self.email_max_wait)
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, raw: Option<String>) {
    if let Some(parsed) = raw.and_then(|v| v.trim().parse().ok()) {
        *slot = parsed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let config = Config::from_file(&temp.path().join("config.toml")).unwrap();
        assert_eq!(config.bw_exec, "bw");
        assert_eq!(config.icon_cache_age, 43200);
        assert_eq!(config.email_max_wait, 15);
        assert!(config.skip_types.is_empty());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "bw_exec = \"/opt/bw\"\nskip_types = [\"card\"]\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.bw_exec, "/opt/bw");
        assert_eq!(config.skip_types, vec!["card".to_string()]);
        assert_eq!(config.max_results, 1000);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("BW_EXEC", "/usr/local/bin/bw"),
            ("SKIP_TYPES", "Note, card"),
            ("2FA_MODE", "1"),
            ("ICON_CACHE_ENABLED", "false"),
            ("MAX_RESULTS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.bw_exec, "/usr/local/bin/bw");
        assert_eq!(config.skip_types, vec!["note".to_string(), "card".to_string()]);
        assert_eq!(config.sfa_mode, 1);
        assert!(!config.icon_cache_enabled);
        assert_eq!(config.max_results, 1000);
    }
}
