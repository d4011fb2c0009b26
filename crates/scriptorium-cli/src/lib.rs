//! Scriptorium CLI library.
//!
//! Argument parsing, configuration loading, command execution and output
//! formatting for the `scriptorium` binary.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod outcome;
pub mod output;

pub use cli::{Cli, Command};
pub use commands::Corpus;
pub use config::Config;
pub use error::{CliError, Result};
pub use outcome::Outcome;
pub use output::Formatter;
