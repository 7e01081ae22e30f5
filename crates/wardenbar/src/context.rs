//! Per-invocation context
//!
//! Configuration, directories and the decoded snapshot are read once at
//! startup and handed to every command by reference.

use anyhow::Result;
use std::path::PathBuf;
use tracing::debug;

use wardenbar_core::paths::default_snapshot_path;
use wardenbar_core::{Config, Paths};

use crate::cache::CacheStore;
use crate::jobs::JobRegistry;
use crate::redact::SkipSet;
use crate::state::{self, VaultState};

#[derive(Debug, Clone)]
pub struct Context {
    pub config: Config,
    pub paths: Paths,
    pub state: VaultState,
}

impl Context {
    pub fn new(config: Config, paths: Paths, state: VaultState) -> Self {
        Self { config, paths, state }
    }

    /// Load configuration from `paths` and decode the snapshot
    pub fn load_from(paths: Paths) -> Result<Self> {
        let config = Config::load(&paths.config_file())?;
        let state = match snapshot_path(&config) {
            Some(path) => state::load(&path),
            None => {
                debug!("no snapshot location known");
                VaultState::default()
            }
        };
        Ok(Self::new(config, paths, state))
    }

    pub fn cache(&self) -> CacheStore {
        CacheStore::new(&self.paths)
    }

    pub fn jobs(&self) -> JobRegistry {
        JobRegistry::new(self.paths.jobs())
    }

    pub fn skip_set(&self) -> SkipSet {
        SkipSet::from_names(&self.config.skip_types)
    }
}

fn snapshot_path(config: &Config) -> Option<PathBuf> {
    config.bw_data_path.clone().or_else(default_snapshot_path)
}
