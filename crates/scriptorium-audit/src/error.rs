//! Audit error types

use scriptorium_store::StoreError;
use thiserror::Error;

/// Errors that can occur during audit operations
#[derive(Error, Debug)]
pub enum AuditError {
    /// Storage or chunk store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Filesystem error while hashing documents
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Trace target does not exist
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Repair could not take its safety backup
    #[error("Backup failed: {0}")]
    Backup(String),
}
