#![forbid(unsafe_code)]

//! SQLite-backed persistence for the experiment record store: session
//! lifecycle, typed CRUD, compiled join queries, and backup artifacts.

mod backup;
mod error;
mod store;

pub use backup::BackupArtifacts;
pub use error::StoreError;
pub use store::{Access, LogsStore, StoreConfig};

/// Generic SQL cell value, as surfaced by the raw-query escape hatch.
pub use rusqlite::types::Value as SqlValue;
