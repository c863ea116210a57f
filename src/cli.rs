//! Shared helpers for the command-line tools

use crate::config::Config;
use crate::engine::AccountingEngine;
use crate::error::{LedgerError, Result};
use crate::persistence::SqliteStore;
use std::fs;
use std::path::Path;

/// Installs the stderr `tracing` subscriber at the configured level.
pub fn init_logging(config: &Config) -> Result<()> {
    let level = config.log_level()?;
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| LedgerError::Config(format!("Failed to install logger: {}", e)))
}

/// Opens the configured SQLite database, creating its directory if needed.
pub fn open_engine(config: &Config) -> Result<AccountingEngine<SqliteStore>> {
    let db_path = Path::new(&config.database.path);
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                LedgerError::Store(format!("Failed to create data dir {:?}: {}", parent, e))
            })?;
        }
    }

    let store = SqliteStore::open(&config.database.path)?;
    Ok(AccountingEngine::from_config(store, &config.journal))
}
