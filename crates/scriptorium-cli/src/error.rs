//! Error types for the CLI application.

use thiserror::Error;

/// Result type alias for CLI operations.
pub type Result<T> = std::result::Result<T, CliError>;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Store error
    #[error(transparent)]
    Store(#[from] scriptorium_store::StoreError),

    /// Audit error
    #[error(transparent)]
    Audit(#[from] scriptorium_audit::AuditError),

    /// Growth error
    #[error(transparent)]
    Growth(#[from] scriptorium_growth::GrowthError),

    /// Balance error
    #[error(transparent)]
    Balance(#[from] scriptorium_balance::BalanceError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
