//! Error types for corpus growth operations

use scriptorium_store::StoreError;
use thiserror::Error;

/// Errors that can occur while versioning, tracking, processing or merging
#[derive(Error, Debug)]
pub enum GrowthError {
    /// Storage layer error
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// State file (de)serialization error
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// No snapshot matches the reference
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// Rollback target has no backed-up files
    #[error("Snapshot {0} has no backup to restore from")]
    NoBackup(String),

    /// Unparseable version or mode
    #[error("Invalid value: {0}")]
    Invalid(String),

    /// Conflict index out of range
    #[error("No conflict at index {0}")]
    ConflictNotFound(usize),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Destructive operation could not take its safety backup
    #[error("Backup failed: {0}")]
    Backup(String),
}
