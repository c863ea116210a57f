//! Error types for DeltaLedger

use std::fmt;

/// Coarse classification of a [`LedgerError`], used by callers that only
/// care whether a request was malformed, addressed something missing, or
/// hit the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Store,
    Config,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// Malformed numeric input or wrong argument count.
    Validation(String),
    /// Missing base entry or empty delta history.
    NotFound(String),
    /// Underlying storage I/O or key encoding failure.
    Store(String),
    Config(String),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation(_) => ErrorKind::Validation,
            LedgerError::NotFound(_) => ErrorKind::NotFound,
            LedgerError::Store(_) => ErrorKind::Store,
            LedgerError::Config(_) => ErrorKind::Config,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LedgerError::Validation(msg) => write!(f, "Validation failure: {}", msg),
            LedgerError::NotFound(msg) => write!(f, "Not found: {}", msg),
            LedgerError::Store(msg) => write!(f, "Store failure: {}", msg),
            LedgerError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for LedgerError {}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::Store(err.to_string())
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        LedgerError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Store(err.to_string())
    }
}

impl From<toml::de::Error> for LedgerError {
    fn from(err: toml::de::Error) -> Self {
        LedgerError::Config(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, LedgerError>;
