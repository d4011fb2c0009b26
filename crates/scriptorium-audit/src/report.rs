//! Full audit: every analyzer, the gap report and one overall grade

use crate::config::AuditConfig;
use crate::gaps::{Findings, GapReport};
use crate::view::CorpusView;
use chrono::{DateTime, Utc};
use scriptorium_domain::Severity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything one audit run found
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullAuditReport {
    /// When the audit ran
    pub generated_at: DateTime<Utc>,
    /// Log lines skipped while loading
    pub skipped_lines: usize,
    /// Raw analyzer output
    #[serde(flatten)]
    pub findings: Findings,
    /// Ranked gaps, health and plan
    pub gaps: GapReport,
}

impl FullAuditReport {
    /// Health score of the gap report
    pub fn health_score(&self) -> u32 {
        self.gaps.health_score
    }

    /// Worst severity found, if anything was found
    pub fn worst_severity(&self) -> Option<Severity> {
        self.gaps.worst_severity()
    }
}

/// Runs the complete audit
///
/// # Examples
///
/// ```no_run
/// use scriptorium_audit::{AuditConfig, Auditor, CorpusView};
/// use std::collections::BTreeMap;
///
/// let view = CorpusView::default();
/// let report = Auditor::new(AuditConfig::default()).run(&view, &BTreeMap::new());
/// println!("health {}", report.health_score());
/// ```
pub struct Auditor {
    config: AuditConfig,
}

impl Auditor {
    /// Create an auditor
    pub fn new(config: AuditConfig) -> Self {
        Self { config }
    }

    /// Run every analyzer and aggregate the gaps
    pub fn run(&self, view: &CorpusView, reference_hashes: &BTreeMap<String, String>) -> FullAuditReport {
        let findings = Findings::collect(view, reference_hashes, &self.config);
        let gaps = GapReport::new(findings.gaps());
        tracing::info!(
            "Audit finished: {} gap(s), health {}",
            gaps.gaps.len(),
            gaps.health_score
        );
        FullAuditReport {
            generated_at: Utc::now(),
            skipped_lines: view.skipped_lines,
            findings,
            gaps,
        }
    }
}
