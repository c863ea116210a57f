//! Configuration management for DeltaLedger

use crate::delta::KeyLayout;
use crate::error::{LedgerError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// File looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "deltaledger.toml";
/// Environment variable overriding [`DEFAULT_CONFIG_FILE`].
pub const CONFIG_ENV_VAR: &str = "DELTALEDGER_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub journal: JournalConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JournalConfig {
    #[serde(default)]
    pub key_layout: KeyLayout,
    /// Number of entries a range cursor pulls from the store per round trip.
    #[serde(default = "default_scan_page_size")]
    pub scan_page_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            key_layout: KeyLayout::default(),
            scan_page_size: default_scan_page_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_database_path() -> String {
    "./data/deltaledger.db".to_string()
}

fn default_scan_page_size() -> usize {
    128
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.path.trim().is_empty() {
            return Err(LedgerError::Config(
                "database.path must not be empty".to_string(),
            ));
        }
        if self.journal.scan_page_size == 0 {
            return Err(LedgerError::Config(
                "journal.scan_page_size must be at least 1".to_string(),
            ));
        }
        self.log_level()?;
        Ok(())
    }

    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging.level.parse::<tracing::Level>().map_err(|_| {
            LedgerError::Config(format!("unknown logging.level '{}'", self.logging.level))
        })
    }
}

/// Loads the configuration.
///
/// An explicit `path` must exist. Otherwise the file named by
/// `DELTALEDGER_CONFIG` (or `deltaledger.toml`) is read if present, and the
/// built-in defaults are used when it is absent.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let (path, required) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => match std::env::var_os(CONFIG_ENV_VAR) {
            Some(p) => (PathBuf::from(p), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        },
    };

    match fs::read_to_string(&path) {
        Ok(config_str) => Config::from_toml_str(&config_str),
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
        Err(e) => Err(LedgerError::Config(format!(
            "failed to read {}: {}",
            path.display(),
            e
        ))),
    }
}
