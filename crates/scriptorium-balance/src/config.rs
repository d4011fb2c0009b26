//! Skew thresholds and calibration step sizes

use crate::BalanceError;
use serde::{Deserialize, Serialize};

/// Thresholds for the four skew tests
///
/// # Examples
///
/// ```
/// use scriptorium_balance::SkewConfig;
///
/// let config: SkewConfig = toml::from_str("imbalance_ratio = 4.0").unwrap();
/// assert_eq!(config.density_cv, 0.5);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkewConfig {
    /// Largest:smallest domain size ratio that raises an imbalance alert
    pub imbalance_ratio: f64,

    /// Coefficient of variation of domain densities that raises an alert
    pub density_cv: f64,

    /// A source below this page coverage (percent) counts as under-covered
    pub coverage_page_pct: f64,

    /// Fraction of under-covered sources that raises a coverage-gap alert
    pub coverage_gap_fraction: f64,

    /// Domains whose mean confidence falls below this are drifting
    pub quality_confidence: f64,
}

impl Default for SkewConfig {
    fn default() -> Self {
        Self {
            imbalance_ratio: 3.0,
            density_cv: 0.5,
            coverage_page_pct: 10.0,
            coverage_gap_fraction: 0.2,
            quality_confidence: 0.5,
        }
    }
}

impl SkewConfig {
    /// Alert earlier on every test
    pub fn strict() -> Self {
        Self {
            imbalance_ratio: 2.0,
            density_cv: 0.3,
            coverage_page_pct: 25.0,
            coverage_gap_fraction: 0.1,
            quality_confidence: 0.6,
        }
    }

    /// Only alert on pronounced skew
    pub fn lenient() -> Self {
        Self {
            imbalance_ratio: 5.0,
            density_cv: 1.0,
            coverage_page_pct: 5.0,
            coverage_gap_fraction: 0.4,
            quality_confidence: 0.35,
        }
    }

    /// Check every threshold is in range
    pub fn validate(&self) -> Result<(), BalanceError> {
        if self.imbalance_ratio < 1.0 {
            return Err(BalanceError::Config(format!(
                "imbalance_ratio must be at least 1, got {}",
                self.imbalance_ratio
            )));
        }
        if self.density_cv <= 0.0 {
            return Err(BalanceError::Config(format!("density_cv must be positive, got {}", self.density_cv)));
        }
        if !(0.0..=100.0).contains(&self.coverage_page_pct) {
            return Err(BalanceError::Config(format!(
                "coverage_page_pct must be in [0, 100], got {}",
                self.coverage_page_pct
            )));
        }
        for (name, value) in [
            ("coverage_gap_fraction", self.coverage_gap_fraction),
            ("quality_confidence", self.quality_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(BalanceError::Config(format!("{} must be in [0, 1], got {}", name, value)));
            }
        }
        Ok(())
    }
}

/// Step sizes and bounds used when turning alerts into rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Weight added to or removed from a domain per rule
    pub domain_step: f64,

    /// Lowest domain weight
    pub min_weight: f64,

    /// Highest domain weight
    pub max_weight: f64,

    /// Priority change per source rule
    pub priority_step: i32,

    /// Confidence change per promote/demote rule
    pub confidence_step: f64,

    /// KUs in drifting domains below this confidence are proposed for archival
    pub archive_below: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            domain_step: 0.25,
            min_weight: 0.1,
            max_weight: 5.0,
            priority_step: 1,
            confidence_step: 0.1,
            archive_below: 0.2,
        }
    }
}

impl CalibrationConfig {
    /// Check bounds are ordered and steps positive
    pub fn validate(&self) -> Result<(), BalanceError> {
        if self.min_weight <= 0.0 || self.min_weight > self.max_weight {
            return Err(BalanceError::Config(format!(
                "weights must satisfy 0 < min_weight <= max_weight, got {} and {}",
                self.min_weight, self.max_weight
            )));
        }
        if self.domain_step <= 0.0 || self.confidence_step <= 0.0 || self.priority_step <= 0 {
            return Err(BalanceError::Config("calibration steps must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.archive_below) {
            return Err(BalanceError::Config(format!(
                "archive_below must be in [0, 1], got {}",
                self.archive_below
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_validate() {
        assert!(SkewConfig::default().validate().is_ok());
        assert!(SkewConfig::strict().validate().is_ok());
        assert!(SkewConfig::lenient().validate().is_ok());
        assert!(CalibrationConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range() {
        let skew = SkewConfig {
            coverage_gap_fraction: 1.5,
            ..Default::default()
        };
        assert!(matches!(skew.validate(), Err(BalanceError::Config(_))));

        let calibration = CalibrationConfig {
            min_weight: 3.0,
            max_weight: 1.0,
            ..Default::default()
        };
        assert!(calibration.validate().is_err());
    }
}
