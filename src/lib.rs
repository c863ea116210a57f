//! DeltaLedger - An append-only delta journal for named values
//!
//! Every mutation of a named value is recorded as an immutable delta under
//! its own composite key. The current total of a name is derived on demand by
//! folding all of its deltas into the name's base value.
//!
//! # Architecture
//!
//! ## Storage
//! - [`store`] - Ordered key-value contract, composite keys, range cursors
//! - [`persistence`] - SQLite and in-memory stores
//!
//! ## Accounting
//! - [`delta`] - Delta records, signs and fixed-point amounts
//! - [`delta_store`] - Adapter between the journal and a store
//! - [`engine`] - Initialize, transfer, compute total, raw put/get
//! - [`operation`] - Typed operation router
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types
//! - [`cli`] - CLI utilities

#![forbid(unsafe_code)]

// ============================================================================
// Storage
// ============================================================================
pub mod persistence;
pub mod store;

// ============================================================================
// Accounting
// ============================================================================
pub mod delta;
pub mod delta_store;
pub mod engine;
pub mod operation;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod cli;
pub mod config;
pub mod error;

pub use delta::{Amount, DeltaRecord, KeyLayout, Sign};
pub use engine::AccountingEngine;
pub use error::{LedgerError, Result};
pub use operation::{Operation, Response, Router, TxContext};
