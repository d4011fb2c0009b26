//! Configuration management for the CLI.
//!
//! One TOML file carries a section per library crate. Lookup order:
//! `--config`, then `<root>/scriptorium.toml`, then
//! `~/.scriptorium/config.toml`, then built-in defaults.

use crate::error::{CliError, Result};
use scriptorium_audit::AuditConfig;
use scriptorium_balance::{CalibrationConfig, SkewConfig};
use scriptorium_growth::{MergeConfig, PipelineConfig};
use scriptorium_store::StoreConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Config file looked for in the corpus root
pub const ROOT_CONFIG_FILE: &str = "scriptorium.toml";

/// CLI configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// File locations
    #[serde(default)]
    pub store: StoreConfig,

    /// Audit thresholds
    #[serde(default)]
    pub audit: AuditConfig,

    /// Skew thresholds
    #[serde(default)]
    pub skew: SkewConfig,

    /// Calibration step sizes
    #[serde(default)]
    pub calibration: CalibrationConfig,

    /// Extraction pipeline invocation
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Merge defaults
    #[serde(default)]
    pub merge: MergeConfig,

    /// Output settings
    #[serde(default)]
    pub settings: Settings,
}

/// Global CLI settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,

    /// Default output format
    #[serde(default = "default_format")]
    pub format: OutputFormat,
}

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Tables and status lines
    Table,
    /// Pretty-printed JSON
    Json,
}

impl Config {
    /// The per-user configuration file path.
    pub fn user_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".scriptorium").join("config.toml"))
    }

    /// Find the file to load, if any
    ///
    /// An explicit path must exist; the fallbacks are skipped when absent.
    pub fn locate(explicit: Option<&Path>, root: &Path) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(CliError::Config(format!("config file {} not found", path.display())));
            }
            return Ok(Some(path.to_path_buf()));
        }
        let in_root = root.join(ROOT_CONFIG_FILE);
        if in_root.exists() {
            return Ok(Some(in_root));
        }
        Ok(Self::user_path().filter(|p| p.exists()))
    }

    /// Load and validate the configuration for a corpus root.
    pub fn load(explicit: Option<&Path>, root: &Path) -> Result<Self> {
        let config = match Self::locate(explicit, root)? {
            Some(path) => {
                tracing::debug!("Loading config from {}", path.display());
                Self::from_file(&path)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse one TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.audit.validate()?;
        self.skew.validate()?;
        self.calibration.validate()?;
        self.merge.validate()?;
        if self.store.hash_workers == 0 {
            return Err(CliError::Config("store.hash_workers must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            color: true,
            format: OutputFormat::Table,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_format() -> OutputFormat {
    OutputFormat::Table
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.settings.color);
        assert_eq!(config.settings.format, OutputFormat::Table);
        assert_eq!(config.store.documents_dir, "documents");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections() {
        let config: Config = toml::from_str(
            r#"
            [skew]
            imbalance_ratio = 4.0

            [pipeline]
            command = ["extract", "{document}"]
            timeout_secs = 60

            [settings]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.skew.imbalance_ratio, 4.0);
        assert_eq!(config.skew.density_cv, 0.5);
        assert_eq!(config.pipeline.timeout_secs, 60);
        assert_eq!(config.settings.format, OutputFormat::Json);
        assert!(config.settings.color);
    }

    #[test]
    fn test_root_file_is_found() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(ROOT_CONFIG_FILE), "[audit]\nfuzzy_threshold = 0.8\n").unwrap();
        let config = Config::load(None, dir.path()).unwrap();
        assert_eq!(config.audit.fuzzy_threshold, 0.8);
    }

    #[test]
    fn test_missing_explicit_file() {
        let dir = tempdir().unwrap();
        let result = Config::load(Some(&dir.path().join("nope.toml")), dir.path());
        assert!(matches!(result, Err(CliError::Config(_))));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[skew]\ncoverage_gap_fraction = 3.0\n").unwrap();
        assert!(Config::load(Some(&path), dir.path()).is_err());
    }
}
