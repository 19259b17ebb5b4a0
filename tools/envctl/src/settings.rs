//! Tool settings: logging, cache tuning and the default database

use anyhow::{anyhow, Result};
use common::logging::LogConfig;
use envmon_cache::CacheConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvctlSettings {
    pub log: LogConfig,
    pub cache: CacheConfig,
    /// Used when `--db` is not given
    pub database: Option<PathBuf>,
}

impl Default for EnvctlSettings {
    fn default() -> Self {
        Self {
            log: LogConfig {
                level: "warn".to_string(),
                ..LogConfig::new("envctl")
            },
            cache: CacheConfig::default(),
            database: None,
        }
    }
}

impl EnvctlSettings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings: Self = common::config::load_config(path)?;
        settings.cache.validate()?;
        Ok(settings)
    }

    pub fn database_path(&self, cli: Option<PathBuf>) -> Result<PathBuf> {
        cli.or_else(|| self.database.clone())
            .ok_or_else(|| anyhow!("no database given: pass --db or set ENVMON_DATABASE"))
    }
}
