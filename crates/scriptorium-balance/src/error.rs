//! Error types for density analysis and calibration

use scriptorium_store::StoreError;
use thiserror::Error;

/// Errors that can occur while analyzing or calibrating the corpus
#[derive(Error, Debug)]
pub enum BalanceError {
    /// Storage layer error
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Calibration state (de)serialization error
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// No plan with that id or prefix
    #[error("Calibration plan not found: {0}")]
    PlanNotFound(String),

    /// Unparseable action or rule
    #[error("Invalid value: {0}")]
    Invalid(String),

    /// KU rewrite could not take its safety backup
    #[error("Backup failed: {0}")]
    Backup(String),
}
