//! Page coverage per document and KU-to-RU connection rate

use crate::config::AuditConfig;
use crate::view::{normalize_document_path, CorpusView};
use scriptorium_domain::PageRange;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Coverage of one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentCoverage {
    /// Relative document path
    pub path: String,
    /// KUs citing the document
    pub ku_count: usize,
    /// Page count, from the chunk store's page bounds
    pub total_pages: Option<u32>,
    /// Distinct pages cited by at least one KU, within the page count when known
    pub covered_pages: u64,
    /// `covered / total * 100`, when the page count is known
    pub coverage_pct: Option<f64>,
}

/// Coverage across the corpus
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    /// Per-document coverage, sorted by path
    pub documents: Vec<DocumentCoverage>,
    /// Mean of the known per-document percentages
    pub mean_page_coverage_pct: f64,
    /// KUs in the log
    pub total_kus: usize,
    /// KUs named by at least one RU
    pub kus_in_reasoning: usize,
    /// `kus_in_reasoning / total_kus * 100`
    pub ku_coverage_pct: f64,
    /// Documents below the configured page coverage
    pub low_coverage: Vec<String>,
}

/// Measures how much of the corpus the knowledge actually covers
pub struct CoverageAnalyzer<'a> {
    view: &'a CorpusView,
    low_coverage_pct: f64,
}

impl<'a> CoverageAnalyzer<'a> {
    /// Create an analyzer over `view`
    pub fn new(view: &'a CorpusView, config: &AuditConfig) -> Self {
        Self {
            view,
            low_coverage_pct: config.low_coverage_pct,
        }
    }

    /// Compute every coverage figure
    pub fn analyze(&self) -> CoverageReport {
        let mut page_totals: BTreeMap<String, u32> = BTreeMap::new();
        if let Some(chunks) = &self.view.chunks {
            for chunk in chunks.values() {
                if let Some(range) = chunk.page_range() {
                    let total = page_totals
                        .entry(normalize_document_path(&chunk.path).to_string())
                        .or_default();
                    *total = (*total).max(range.end);
                }
            }
        }

        let mut cited: BTreeMap<String, (BTreeSet<String>, Vec<PageRange>)> = BTreeMap::new();
        for ku in &self.view.kus {
            for source in &ku.sources {
                if source.path.is_empty() {
                    continue;
                }
                let entry = cited
                    .entry(normalize_document_path(&source.path).to_string())
                    .or_default();
                entry.0.insert(ku.id.clone());
                if let Some(pages) = source.pages {
                    entry.1.push(pages);
                }
            }
        }

        let paths: BTreeSet<&String> = self.view.documents.iter().chain(cited.keys()).collect();
        let mut report = CoverageReport::default();
        let mut known_pcts = Vec::new();

        for path in paths {
            let (kus, pages) = cited.get(path).cloned().unwrap_or_default();
            let total_pages = page_totals.get(path).copied().filter(|t| *t > 0);
            let covered_pages = PageRange::covered(&pages, total_pages);
            let coverage_pct = total_pages.map(|t| covered_pages as f64 / t as f64 * 100.0);
            if let Some(pct) = coverage_pct {
                known_pcts.push(pct);
                if !kus.is_empty() && pct < self.low_coverage_pct {
                    report.low_coverage.push(path.clone());
                }
            }
            report.documents.push(DocumentCoverage {
                path: path.clone(),
                ku_count: kus.len(),
                total_pages,
                covered_pages,
                coverage_pct,
            });
        }

        if !known_pcts.is_empty() {
            report.mean_page_coverage_pct = known_pcts.iter().sum::<f64>() / known_pcts.len() as f64;
        }

        let in_reasoning: BTreeSet<&str> = self
            .view
            .rus
            .iter()
            .flat_map(|ru| ru.knowledge_ids.iter().map(String::as_str))
            .collect();
        report.total_kus = self.view.kus.len();
        report.kus_in_reasoning = self
            .view
            .kus
            .iter()
            .filter(|ku| in_reasoning.contains(ku.id.as_str()))
            .count();
        report.ku_coverage_pct = if report.total_kus == 0 {
            0.0
        } else {
            report.kus_in_reasoning as f64 / report.total_kus as f64 * 100.0
        };
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptorium_domain::{ChunkMetadata, KnowledgeUnit, ReasoningUnit, Source};

    #[test]
    fn test_page_coverage() {
        let ku = KnowledgeUnit::new(
            "x",
            vec![Source::new("c1", "a.pdf").with_pages(PageRange::new(1, 5))],
            0.5,
        );
        let chunks = vec![
            ChunkMetadata::new("c1", "a.pdf").with_pages(1, 10),
            ChunkMetadata::new("c2", "a.pdf").with_pages(11, 100),
        ];
        let view = CorpusView::from_parts(vec![ku], vec![], Some(chunks), ["a.pdf".to_string()], "/d");
        let report = CoverageAnalyzer::new(&view, &AuditConfig::default()).analyze();
        let doc = &report.documents[0];
        assert_eq!(doc.total_pages, Some(100));
        assert_eq!(doc.covered_pages, 5);
        assert_eq!(doc.coverage_pct, Some(5.0));
        assert_eq!(report.low_coverage, vec!["a.pdf".to_string()]);
    }

    #[test]
    fn test_huge_cited_range_is_clipped_to_document() {
        let wide: PageRange = serde_json::from_str("[1, 4000000000]").unwrap();
        let ku = KnowledgeUnit::new("x", vec![Source::new("c1", "a.pdf").with_pages(wide)], 0.5);
        let chunks = vec![ChunkMetadata::new("c1", "a.pdf").with_pages(1, 40)];
        let view = CorpusView::from_parts(vec![ku], vec![], Some(chunks), ["a.pdf".to_string()], "/d");
        let report = CoverageAnalyzer::new(&view, &AuditConfig::default()).analyze();
        assert_eq!(report.documents[0].covered_pages, 40);
        assert_eq!(report.documents[0].coverage_pct, Some(100.0));
    }

    #[test]
    fn test_ku_coverage_rate() {
        let a = KnowledgeUnit::new("a", vec![Source::new("c1", "a.pdf")], 0.5);
        let b = KnowledgeUnit::new("b", vec![Source::new("c2", "a.pdf")], 0.5);
        let ru = ReasoningUnit::new("supports", "t", vec![a.id.clone()], 1.0);
        let view = CorpusView::from_parts(vec![a, b], vec![ru], None, ["a.pdf".to_string()], "/d");
        let report = CoverageAnalyzer::new(&view, &AuditConfig::default()).analyze();
        assert_eq!(report.kus_in_reasoning, 1);
        assert_eq!(report.ku_coverage_pct, 50.0);
        assert!(report.documents[0].coverage_pct.is_none());
    }
}
