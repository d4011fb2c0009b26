//! Statistical skew tests over density metrics
//!
//! Four independent tests, each raising at most one alert:
//! domain-size imbalance, density variance, coverage gaps and quality drift.

use crate::config::SkewConfig;
use crate::density::DensityReport;
use scriptorium_domain::{health_score, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which test raised an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkewKind {
    /// Largest domain dwarfs the smallest
    DomainImbalance,
    /// Domain densities spread widely
    DensityVariance,
    /// Too many sources barely covered
    CoverageGap,
    /// Domains with low mean confidence
    QualityDrift,
}

impl SkewKind {
    /// Kebab-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            SkewKind::DomainImbalance => "domain-imbalance",
            SkewKind::DensityVariance => "density-variance",
            SkewKind::CoverageGap => "coverage-gap",
            SkewKind::QualityDrift => "quality-drift",
        }
    }
}

/// One threshold crossing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkewAlert {
    /// Test that fired
    pub kind: SkewKind,
    /// Graded severity
    pub severity: Severity,
    /// One-line summary
    pub message: String,
    /// Statistics behind the alert
    pub details: BTreeMap<String, f64>,
    /// Domains or sources the alert is about
    pub affected: Vec<String>,
    /// Suggested follow-ups
    pub recommendations: Vec<String>,
}

/// Every alert plus the headline statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkewReport {
    /// Alerts, most severe first
    pub alerts: Vec<SkewAlert>,
    /// `100 - Σ weight(severity)`, floored at 0
    pub health_score: u32,
    /// Gini coefficient of domain sizes
    pub gini: f64,
    /// Largest:smallest domain size
    pub imbalance_ratio: f64,
    /// Coefficient of variation of domain densities
    pub density_cv: f64,
    /// Tests that could not run, with the reason
    pub skipped: Vec<String>,
}

impl SkewReport {
    /// Worst alert severity
    pub fn worst_severity(&self) -> Option<Severity> {
        self.alerts.iter().map(|a| a.severity).max()
    }

    /// The alert of one kind, if it fired
    pub fn alert(&self, kind: SkewKind) -> Option<&SkewAlert> {
        self.alerts.iter().find(|a| a.kind == kind)
    }
}

/// Gini coefficient of non-negative values; 0 for perfect equality
///
/// # Examples
///
/// ```
/// use scriptorium_balance::gini;
///
/// assert_eq!(gini(&[5.0, 5.0]), 0.0);
/// assert!((gini(&[9.0, 1.0]) - 0.4).abs() < 1e-9);
/// ```
pub fn gini(values: &[f64]) -> f64 {
    let n = values.len();
    let total: f64 = values.iter().sum();
    if n == 0 || total <= 0.0 {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let weighted: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, v)| (2.0 * (i as f64 + 1.0) - n as f64 - 1.0) * v)
        .sum();
    weighted / (n as f64 * total)
}

/// Population standard deviation over the mean; 0 when the mean is 0
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if mean == 0.0 {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt() / mean
}

/// Runs the skew tests
pub struct SkewDetector {
    config: SkewConfig,
}

impl SkewDetector {
    /// Create a detector
    pub fn new(config: SkewConfig) -> Self {
        Self { config }
    }

    /// Run all four tests
    pub fn detect(&self, density: &DensityReport) -> SkewReport {
        let mut report = SkewReport::default();
        let sizes: Vec<f64> = density.domains.iter().map(|d| d.ku_count as f64).collect();
        let densities: Vec<f64> = density.domains.iter().map(|d| d.density).collect();
        report.gini = gini(&sizes);
        report.density_cv = coefficient_of_variation(&densities);

        if density.domains.len() < 2 {
            report
                .skipped
                .push("domain-imbalance and density-variance need at least two domains".into());
        } else {
            let largest = sizes.iter().copied().fold(f64::MIN, f64::max);
            let smallest = sizes.iter().copied().fold(f64::MAX, f64::min);
            report.imbalance_ratio = if smallest > 0.0 { largest / smallest } else { f64::INFINITY };
            report.alerts.extend(self.imbalance(density, &report));
            report.alerts.extend(self.variance(density, &report));
        }
        match self.coverage(density) {
            Ok(alert) => report.alerts.extend(alert),
            Err(reason) => report.skipped.push(reason),
        }
        report.alerts.extend(self.drift(density));

        report.alerts.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.kind.cmp(&b.kind)));
        report.health_score = health_score(report.alerts.iter().map(|a| a.severity));
        tracing::info!(
            "Skew detection: {} alert(s), health {}",
            report.alerts.len(),
            report.health_score
        );
        report
    }

    fn imbalance(&self, density: &DensityReport, stats: &SkewReport) -> Option<SkewAlert> {
        let ratio = stats.imbalance_ratio;
        if ratio < self.config.imbalance_ratio {
            return None;
        }
        let severity = if ratio >= 10.0 {
            Severity::Critical
        } else if ratio >= 5.0 {
            Severity::High
        } else {
            Severity::Medium
        };
        let largest = density.domains.first()?;
        let cutoff = largest.ku_count as f64 / self.config.imbalance_ratio;
        let affected: Vec<String> = density
            .domains
            .iter()
            .filter(|d| (d.ku_count as f64) <= cutoff)
            .map(|d| d.domain.clone())
            .collect();
        Some(SkewAlert {
            kind: SkewKind::DomainImbalance,
            severity,
            message: format!(
                "Domain '{}' holds {:.1}x the KUs of the smallest domain",
                largest.domain, ratio
            ),
            details: BTreeMap::from([
                ("ratio".to_string(), ratio),
                ("gini".to_string(), stats.gini),
                ("largest".to_string(), largest.ku_count as f64),
            ]),
            recommendations: vec![
                format!("Add or reprocess source documents for: {}", affected.join(", ")),
                format!("Consider down-weighting '{}' in retrieval", largest.domain),
            ],
            affected,
        })
    }

    fn variance(&self, density: &DensityReport, stats: &SkewReport) -> Option<SkewAlert> {
        let cv = stats.density_cv;
        if cv < self.config.density_cv {
            return None;
        }
        let severity = if cv >= self.config.density_cv * 2.0 {
            Severity::High
        } else {
            Severity::Medium
        };
        let mean = density.domains.iter().map(|d| d.density).sum::<f64>() / density.domains.len() as f64;
        let affected: Vec<String> = density
            .domains
            .iter()
            .filter(|d| d.density < mean)
            .map(|d| d.domain.clone())
            .collect();
        Some(SkewAlert {
            kind: SkewKind::DensityVariance,
            severity,
            message: format!("Knowledge density varies widely across domains (CV {:.2})", cv),
            details: BTreeMap::from([("cv".to_string(), cv), ("mean_density".to_string(), mean)]),
            recommendations: vec![format!(
                "Raise extraction priority for sources in sparse domains: {}",
                affected.join(", ")
            )],
            affected,
        })
    }

    fn coverage(&self, density: &DensityReport) -> Result<Option<SkewAlert>, String> {
        let known: Vec<_> = density.sources.iter().filter(|s| s.coverage_pct.is_some()).collect();
        if known.is_empty() {
            return Err("coverage-gap needs page counts from the chunk store".into());
        }
        let low: Vec<String> = known
            .iter()
            .filter(|s| s.coverage_pct.unwrap_or(0.0) < self.config.coverage_page_pct)
            .map(|s| s.path.clone())
            .collect();
        let fraction = low.len() as f64 / known.len() as f64;
        if low.is_empty() || fraction < self.config.coverage_gap_fraction {
            return Ok(None);
        }
        let severity = if fraction >= 0.5 { Severity::High } else { Severity::Medium };
        Ok(Some(SkewAlert {
            kind: SkewKind::CoverageGap,
            severity,
            message: format!(
                "{} of {} sources have under {:.0}% of their pages represented",
                low.len(),
                known.len(),
                self.config.coverage_page_pct
            ),
            details: BTreeMap::from([
                ("fraction".to_string(), fraction),
                ("low_sources".to_string(), low.len() as f64),
                ("sources_with_page_counts".to_string(), known.len() as f64),
            ]),
            recommendations: vec!["Reprocess the under-covered sources with `growth process --mode force-all`".into()],
            affected: low,
        }))
    }

    fn drift(&self, density: &DensityReport) -> Option<SkewAlert> {
        let drifting: Vec<_> = density
            .domains
            .iter()
            .filter(|d| d.mean_confidence < self.config.quality_confidence)
            .collect();
        if drifting.is_empty() {
            return None;
        }
        let drifting_kus: usize = drifting.iter().map(|d| d.ku_count).sum();
        let share = if density.total_kus == 0 {
            0.0
        } else {
            drifting_kus as f64 / density.total_kus as f64
        };
        let severity = if share >= 0.5 { Severity::High } else { Severity::Medium };
        let lowest = drifting.iter().map(|d| d.mean_confidence).fold(f64::MAX, f64::min);
        Some(SkewAlert {
            kind: SkewKind::QualityDrift,
            severity,
            message: format!(
                "{} domain(s) below mean confidence {:.2}",
                drifting.len(),
                self.config.quality_confidence
            ),
            details: BTreeMap::from([
                ("lowest_mean_confidence".to_string(), lowest),
                ("ku_share".to_string(), share),
            ]),
            affected: drifting.iter().map(|d| d.domain.clone()).collect(),
            recommendations: vec![
                "Review low-confidence KUs in the affected domains; archive the weakest".into(),
            ],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::density::DomainDensity;

    fn domain(name: &str, kus: usize, density: f64, confidence: f64) -> DomainDensity {
        DomainDensity {
            domain: name.to_string(),
            ku_count: kus,
            source_count: 1,
            mean_confidence: confidence,
            total_pages: 0,
            density,
            quality: density * confidence,
        }
    }

    fn report(domains: Vec<DomainDensity>) -> DensityReport {
        DensityReport {
            total_kus: domains.iter().map(|d| d.ku_count).sum(),
            domains,
            ..Default::default()
        }
    }

    #[test]
    fn test_gini_bounds() {
        assert_eq!(gini(&[]), 0.0);
        assert_eq!(gini(&[3.0, 3.0, 3.0]), 0.0);
        let unequal = gini(&[0.0, 0.0, 0.0, 10.0]);
        assert!((unequal - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_cv() {
        assert_eq!(coefficient_of_variation(&[2.0, 2.0]), 0.0);
        assert!((coefficient_of_variation(&[1.0, 3.0]) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_single_domain_skips_pairwise_tests() {
        let result = SkewDetector::new(SkewConfig::default()).detect(&report(vec![domain("a", 10, 1.0, 0.8)]));
        assert!(result.alerts.is_empty());
        assert_eq!(result.health_score, 100);
        assert_eq!(result.skipped.len(), 2);
    }

    #[test]
    fn test_quality_drift_severity_by_share() {
        let detector = SkewDetector::new(SkewConfig::default());
        let minor = detector.detect(&report(vec![domain("a", 8, 1.0, 0.8), domain("b", 4, 1.0, 0.3)]));
        assert_eq!(minor.alert(SkewKind::QualityDrift).unwrap().severity, Severity::Medium);
        let major = detector.detect(&report(vec![domain("a", 4, 1.0, 0.8), domain("b", 4, 1.0, 0.3)]));
        assert_eq!(major.alert(SkewKind::QualityDrift).unwrap().severity, Severity::High);
    }

    #[test]
    fn test_density_variance() {
        let detector = SkewDetector::new(SkewConfig::default());
        let result = detector.detect(&report(vec![domain("a", 5, 3.0, 0.9), domain("b", 5, 1.0, 0.9)]));
        let alert = result.alert(SkewKind::DensityVariance).unwrap();
        assert_eq!(alert.severity, Severity::Medium);
        assert_eq!(alert.affected, vec!["b"]);
    }
}
