//! Audit configuration

use crate::AuditError;
use serde::{Deserialize, Serialize};

/// Thresholds used by the auditors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Token-overlap score at or above which author/title strings match (0.0-1.0)
    pub fuzzy_threshold: f64,

    /// A component smaller than this fraction of the main component is isolated
    pub isolated_cluster_ratio: f64,

    /// Documents below this page coverage (percent) are reported as low coverage
    pub low_coverage_pct: f64,

    /// Recompute document hashes while tracing
    pub verify_document_hashes: bool,

    /// Report sources that carry no page range
    pub require_pages: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            fuzzy_threshold: 0.5,
            isolated_cluster_ratio: 0.10,
            low_coverage_pct: 10.0,
            verify_document_hashes: true,
            require_pages: true,
        }
    }
}

impl AuditConfig {
    /// Tighter matching and coverage expectations
    pub fn strict() -> Self {
        Self {
            fuzzy_threshold: 0.8,
            isolated_cluster_ratio: 0.25,
            low_coverage_pct: 25.0,
            verify_document_hashes: true,
            require_pages: true,
        }
    }

    /// Loose matching; skips hash verification and page presence checks
    pub fn lenient() -> Self {
        Self {
            fuzzy_threshold: 0.3,
            isolated_cluster_ratio: 0.05,
            low_coverage_pct: 5.0,
            verify_document_hashes: false,
            require_pages: false,
        }
    }

    /// Check that every ratio is in range
    pub fn validate(&self) -> Result<(), AuditError> {
        if !(0.0..=1.0).contains(&self.fuzzy_threshold) {
            return Err(AuditError::Config(format!(
                "fuzzy_threshold must be in [0, 1], got {}",
                self.fuzzy_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.isolated_cluster_ratio) {
            return Err(AuditError::Config(format!(
                "isolated_cluster_ratio must be in [0, 1], got {}",
                self.isolated_cluster_ratio
            )));
        }
        if !(0.0..=100.0).contains(&self.low_coverage_pct) {
            return Err(AuditError::Config(format!(
                "low_coverage_pct must be in [0, 100], got {}",
                self.low_coverage_pct
            )));
        }
        Ok(())
    }
}
