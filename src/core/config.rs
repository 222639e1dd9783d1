//! Engine configuration: `viper.yaml` with environment overrides.
//!
//! Precedence: built-in defaults < config file < `VIPER_*` environment.

use super::error::{Result, ViperError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default config file looked up in the working directory.
pub const CONFIG_FILE: &str = "viper.yaml";
pub const DB_URL_ENV: &str = "VIPER_DB_URL";
pub const MAX_WORKERS_ENV: &str = "VIPER_MAX_WORKERS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ViperConfig {
    /// SQLite database holding the result history
    pub db_url: PathBuf,

    /// Batch pool size; 0 or 1 runs sequentially
    pub max_workers: usize,
}

impl Default for ViperConfig {
    fn default() -> Self {
        Self {
            db_url: PathBuf::from("viperdb.sqlite3"),
            max_workers: 0,
        }
    }
}

impl ViperConfig {
    /// Parse a config from YAML text.
    pub fn parse(yaml: &str) -> Result<Self> {
        serde_yaml_ng::from_str(yaml).map_err(|e| ViperError::Config(format!("YAML parse error: {}", e)))
    }

    /// Load from `path` (or [`CONFIG_FILE`] when absent and present on disk),
    /// then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path.unwrap_or_else(|| Path::new(CONFIG_FILE));
        let mut config = if file.exists() {
            let content = std::fs::read_to_string(file)
                .map_err(|e| ViperError::Config(format!("cannot read {}: {}", file.display(), e)))?;
            Self::parse(&content)?
        } else if path.is_some() {
            return Err(ViperError::Config(format!("{} not found", file.display())));
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `VIPER_*` overrides from a variable lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(DB_URL_ENV).filter(|v| !v.is_empty()) {
            self.db_url = PathBuf::from(url);
        }
        if let Some(raw) = lookup(MAX_WORKERS_ENV).filter(|v| !v.is_empty()) {
            self.max_workers = raw.trim().parse().map_err(|_| {
                ViperError::Config(format!("{} must be a non-negative integer, got {:?}", MAX_WORKERS_ENV, raw))
            })?;
        }
        Ok(())
    }
}
