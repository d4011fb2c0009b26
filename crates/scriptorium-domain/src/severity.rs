//! Severity grading shared by gaps, orphans, citation issues and skew alerts

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a finding, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational only, never counted against health
    Info,
    /// Minor finding
    Low,
    /// Worth scheduling a fix
    Medium,
    /// Degrades trust in part of the corpus
    High,
    /// Breaks provenance outright
    Critical,
}

impl Severity {
    /// Health points deducted per finding of this severity
    pub fn weight(&self) -> u32 {
        match self {
            Severity::Critical => 20,
            Severity::High => 10,
            Severity::Medium => 5,
            Severity::Low => 2,
            Severity::Info => 0,
        }
    }

    /// Get the severity name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Parse a severity from a string
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "info" => Some(Severity::Info),
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `max(0, 100 - sum of weights)` over a set of findings
///
/// # Examples
///
/// ```
/// use scriptorium_domain::{health_score, Severity};
///
/// assert_eq!(health_score(Vec::<Severity>::new()), 100);
/// assert_eq!(health_score([Severity::Critical, Severity::Low]), 78);
/// ```
pub fn health_score<I>(severities: I) -> u32
where
    I: IntoIterator<Item = Severity>,
{
    let penalty: u32 = severities.into_iter().map(|s| s.weight()).sum();
    100u32.saturating_sub(penalty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Low > Severity::Info);
    }

    #[test]
    fn test_health_floor() {
        let many = std::iter::repeat(Severity::Critical).take(10);
        assert_eq!(health_score(many), 0);
    }

    #[test]
    fn test_extra_critical_lowers_health() {
        let base = vec![Severity::High, Severity::Medium];
        let mut worse = base.clone();
        worse.push(Severity::Critical);
        assert!(health_score(worse) < health_score(base));
    }
}
