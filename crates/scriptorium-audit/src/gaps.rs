//! Gap aggregation, health scoring and the remediation plan

use crate::citations::{CitationChecker, CitationReport};
use crate::config::AuditConfig;
use crate::coverage::{CoverageAnalyzer, CoverageReport};
use crate::links::{LinkDetector, LinkReport};
use crate::orphans::{OrphanIdentifier, OrphanKind, OrphanReport};
use crate::tracer::{DocumentMismatch, Tracer};
use crate::view::CorpusView;
use scriptorium_domain::{health_score, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Gap category
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GapCategory {
    /// A provenance chain is broken or inconsistent
    BrokenChain,
    /// An entity nothing refers to
    OrphanEntity,
    /// A document is barely covered by knowledge
    LowCoverage,
    /// KUs not used by any reasoning
    MissingReasoning,
    /// Chunks no knowledge was extracted from
    UnusedContent,
}

impl GapCategory {
    /// Name used in reports
    pub fn as_str(&self) -> &'static str {
        match self {
            GapCategory::BrokenChain => "broken-chain",
            GapCategory::OrphanEntity => "orphan-entity",
            GapCategory::LowCoverage => "low-coverage",
            GapCategory::MissingReasoning => "missing-reasoning",
            GapCategory::UnusedContent => "unused-content",
        }
    }
}

/// One gap in the corpus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gap {
    /// Category
    pub category: GapCategory,
    /// Severity
    pub severity: Severity,
    /// One-line summary
    pub title: String,
    /// Entities affected
    pub entity_ids: Vec<String>,
    /// What the gap costs
    pub impact: String,
    /// How to close it
    pub remediation: String,
    /// Command that helps, if one exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// One step of the remediation plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationStep {
    /// 1 is most urgent
    pub priority: usize,
    /// Category addressed
    pub category: GapCategory,
    /// Worst severity among the gaps addressed
    pub severity: Severity,
    /// Number of gaps addressed
    pub gap_count: usize,
    /// What to do
    pub action: String,
    /// Command to run, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

/// Severity-ranked gaps with the health score
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapReport {
    /// Gaps, most severe first
    pub gaps: Vec<Gap>,
    /// `max(0, 100 - sum of severity weights)`
    pub health_score: u32,
    /// Gap count per severity name
    pub by_severity: BTreeMap<String, usize>,
    /// Ordered remediation steps
    pub remediation_plan: Vec<RemediationStep>,
}

impl GapReport {
    /// Rank gaps, score them and derive the plan
    pub fn new(mut gaps: Vec<Gap>) -> Self {
        gaps.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.category.cmp(&b.category))
                .then_with(|| a.title.cmp(&b.title))
        });
        let mut by_severity = BTreeMap::new();
        for gap in &gaps {
            *by_severity.entry(gap.severity.to_string()).or_insert(0) += 1;
        }
        Self {
            health_score: health_score(gaps.iter().map(|g| g.severity)),
            remediation_plan: plan(&gaps),
            by_severity,
            gaps,
        }
    }

    /// Worst severity present, if any gap exists
    pub fn worst_severity(&self) -> Option<Severity> {
        self.gaps.iter().map(|g| g.severity).max()
    }

    /// Gaps of one category
    pub fn of_category(&self, category: GapCategory) -> impl Iterator<Item = &Gap> {
        self.gaps.iter().filter(move |g| g.category == category)
    }
}

fn plan(gaps: &[Gap]) -> Vec<RemediationStep> {
    let mut groups: Vec<RemediationStep> = Vec::new();
    for gap in gaps {
        match groups
            .iter_mut()
            .find(|s| s.category == gap.category && s.command == gap.command)
        {
            Some(step) => {
                step.gap_count += 1;
                step.severity = step.severity.max(gap.severity);
            }
            None => groups.push(RemediationStep {
                priority: 0,
                category: gap.category,
                severity: gap.severity,
                gap_count: 1,
                action: gap.remediation.clone(),
                command: gap.command.clone(),
            }),
        }
    }
    groups.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| b.gap_count.cmp(&a.gap_count)));
    for (i, step) in groups.iter_mut().enumerate() {
        step.priority = i + 1;
    }
    groups
}

/// Raw findings from every analyzer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Findings {
    /// Link check
    pub links: LinkReport,
    /// Orphan scan
    pub orphans: OrphanReport,
    /// Citation check
    pub citations: CitationReport,
    /// Coverage analysis
    pub coverage: CoverageReport,
    /// Documents changed since their reference hash
    pub document_mismatches: Vec<DocumentMismatch>,
}

impl Findings {
    /// Run every analyzer over `view`
    pub fn collect(view: &CorpusView, reference_hashes: &BTreeMap<String, String>, config: &AuditConfig) -> Self {
        let tracer = Tracer::new(view, reference_hashes).with_hash_verification(config.verify_document_hashes);
        Self {
            links: LinkDetector::new(view).detect_all(),
            orphans: OrphanIdentifier::new(view, config).identify(),
            citations: CitationChecker::new(view, config).check_all(),
            coverage: CoverageAnalyzer::new(view, config).analyze(),
            document_mismatches: if config.verify_document_hashes {
                tracer.verify_documents()
            } else {
                Vec::new()
            },
        }
    }

    /// Convert every finding into gaps
    pub fn gaps(&self) -> Vec<Gap> {
        let mut gaps = Vec::new();

        for link in &self.links.broken {
            gaps.push(Gap {
                category: GapCategory::BrokenChain,
                severity: link.severity,
                title: format!("Broken {} reference {} -> {}", link.kind, link.source_id, link.target_id),
                entity_ids: vec![link.source_id.clone(), link.target_id.clone()],
                impact: "Claims can no longer be traced to their source".into(),
                remediation: "Strip dangling references".into(),
                command: Some("scriptorium audit fix".into()),
            });
        }

        for issue in &self.citations.issues {
            gaps.push(Gap {
                category: GapCategory::BrokenChain,
                severity: issue.severity,
                title: format!("Citation {:?} in {} ({})", issue.kind, issue.ku_id, issue.chunk_id),
                entity_ids: vec![issue.ku_id.clone(), issue.chunk_id.clone()],
                impact: "The citation does not match its chunk".into(),
                remediation: "Review the citation against the chunk metadata".into(),
                command: None,
            });
        }

        for mismatch in &self.document_mismatches {
            gaps.push(Gap {
                category: GapCategory::BrokenChain,
                severity: Severity::High,
                title: format!("Document {} changed since its snapshot", mismatch.path),
                entity_ids: vec![mismatch.path.clone()],
                impact: "KUs citing it may no longer match the text".into(),
                remediation: "Reprocess modified documents".into(),
                command: Some("scriptorium growth process --mode modified-only".into()),
            });
        }

        for orphan in self.orphans.of_kind(OrphanKind::Pdf) {
            gaps.push(Gap {
                category: GapCategory::OrphanEntity,
                severity: orphan.severity,
                title: format!("Document {} has no knowledge", orphan.id),
                entity_ids: vec![orphan.id.clone()],
                impact: "Source material contributes nothing".into(),
                remediation: orphan.recommendation.clone(),
                command: Some("scriptorium growth process --mode new-only".into()),
            });
        }

        for cluster in self.orphans.of_kind(OrphanKind::IsolatedCluster) {
            gaps.push(Gap {
                category: GapCategory::OrphanEntity,
                severity: cluster.severity,
                title: format!("Isolated cluster of {} KU(s)", cluster.members.len()),
                entity_ids: cluster.members.clone(),
                impact: "Knowledge disconnected from the main body".into(),
                remediation: cluster.recommendation.clone(),
                command: None,
            });
        }

        let orphan_kus: Vec<String> = self.orphans.of_kind(OrphanKind::Ku).map(|o| o.id.clone()).collect();
        if !orphan_kus.is_empty() {
            gaps.push(Gap {
                category: GapCategory::MissingReasoning,
                severity: Severity::Medium,
                title: format!("{} KU(s) not used by any reasoning", orphan_kus.len()),
                entity_ids: orphan_kus,
                impact: "Claims never feed a higher-order relation".into(),
                remediation: "Run the reasoning step over these KUs".into(),
                command: None,
            });
        }

        let orphan_chunks: Vec<String> = self.orphans.of_kind(OrphanKind::Chunk).map(|o| o.id.clone()).collect();
        if !orphan_chunks.is_empty() {
            gaps.push(Gap {
                category: GapCategory::UnusedContent,
                severity: Severity::Low,
                title: format!("{} chunk(s) without knowledge", orphan_chunks.len()),
                entity_ids: orphan_chunks,
                impact: "Extracted text is unused".into(),
                remediation: "Extract knowledge from unused chunks".into(),
                command: None,
            });
        }

        for path in &self.coverage.low_coverage {
            gaps.push(Gap {
                category: GapCategory::LowCoverage,
                severity: Severity::Medium,
                title: format!("Low page coverage in {}", path),
                entity_ids: vec![path.clone()],
                impact: "Most of the document is not represented".into(),
                remediation: "Reprocess the document with broader extraction".into(),
                command: Some("scriptorium growth process --mode force-all".into()),
            });
        }

        gaps
    }
}

/// Fans out to every analyzer and aggregates the result
pub struct GapReporter {
    config: AuditConfig,
}

impl GapReporter {
    /// Create a reporter
    pub fn new(config: AuditConfig) -> Self {
        Self { config }
    }

    /// Collect findings and rank them as gaps
    pub fn report(&self, view: &CorpusView, reference_hashes: &BTreeMap<String, String>) -> GapReport {
        let findings = Findings::collect(view, reference_hashes, &self.config);
        GapReport::new(findings.gaps())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gap(severity: Severity) -> Gap {
        Gap {
            category: GapCategory::BrokenChain,
            severity,
            title: format!("{} gap", severity),
            entity_ids: vec![],
            impact: String::new(),
            remediation: "fix".into(),
            command: None,
        }
    }

    #[test]
    fn test_health_and_order() {
        let report = GapReport::new(vec![gap(Severity::Low), gap(Severity::Critical), gap(Severity::Medium)]);
        assert_eq!(report.health_score, 100 - 2 - 20 - 5);
        assert_eq!(report.gaps[0].severity, Severity::Critical);
        assert_eq!(report.worst_severity(), Some(Severity::Critical));
        assert_eq!(report.remediation_plan.len(), 1);
        assert_eq!(report.remediation_plan[0].gap_count, 3);
    }

    #[test]
    fn test_critical_gap_lowers_health() {
        let base = vec![gap(Severity::High), gap(Severity::Medium)];
        let mut more = base.clone();
        more.push(gap(Severity::Critical));
        assert!(GapReport::new(more).health_score < GapReport::new(base).health_score);
    }

    #[test]
    fn test_empty_report_is_healthy() {
        let report = GapReport::new(Vec::new());
        assert_eq!(report.health_score, 100);
        assert!(report.worst_severity().is_none());
    }
}
