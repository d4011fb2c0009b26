//! Configuration for the extraction pipeline and merging

use crate::merge::MergeMode;
use crate::GrowthError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the external extraction pipeline is invoked
///
/// `command` is a program followed by its arguments. The placeholders
/// `{document}`, `{stage}` and `{root}` are substituted per invocation.
///
/// # Examples
///
/// ```
/// use scriptorium_growth::PipelineConfig;
///
/// let config: PipelineConfig = toml::from_str(r#"
///     command = ["python", "-m", "extract", "--stage", "{stage}", "{document}"]
///     stages = ["chunk", "extract", "promote"]
///     timeout_secs = 600
/// "#).unwrap();
/// assert_eq!(config.max_concurrent, 2);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Program and arguments
    pub command: Vec<String>,

    /// Stage names, run in order per document
    pub stages: Vec<String>,

    /// Hard timeout per stage invocation, in seconds
    pub timeout_secs: u64,

    /// Documents processed at once
    pub max_concurrent: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            stages: vec!["extract".to_string()],
            timeout_secs: 300,
            max_concurrent: 2,
        }
    }
}

impl PipelineConfig {
    /// Per-stage timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<(), GrowthError> {
        if self.stages.is_empty() {
            return Err(GrowthError::Config("pipeline needs at least one stage".into()));
        }
        if self.timeout_secs == 0 {
            return Err(GrowthError::Config("timeout_secs must be positive".into()));
        }
        if self.max_concurrent == 0 {
            return Err(GrowthError::Config("max_concurrent must be positive".into()));
        }
        Ok(())
    }
}

/// Merge defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Token-overlap similarity at or above which two claims are near-duplicates
    pub similarity_threshold: f64,

    /// Mode used when none is given
    pub default_mode: MergeMode,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            default_mode: MergeMode::Dedupe,
        }
    }
}

impl MergeConfig {
    /// Check the threshold is a ratio
    pub fn validate(&self) -> Result<(), GrowthError> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(GrowthError::Config(format!(
                "similarity_threshold must be in [0, 1], got {}",
                self.similarity_threshold
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_defaults_validate() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_pipeline_rejects_zero_concurrency() {
        let config = PipelineConfig {
            max_concurrent: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(GrowthError::Config(_))));
    }

    #[test]
    fn test_merge_config_from_toml() {
        let config: MergeConfig = toml::from_str("default_mode = \"semantic\"").unwrap();
        assert_eq!(config.default_mode, MergeMode::Semantic);
        assert_eq!(config.similarity_threshold, 0.85);
        assert!(config.validate().is_ok());
    }
}
