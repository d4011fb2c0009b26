//! Knowledge density per domain and per source document

use scriptorium_audit::{normalize_document_path, CorpusView};
use scriptorium_domain::{KnowledgeUnit, PageRange};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Domain a KU belongs to
///
/// A `domain:<name>` tag wins, then the explicit `domain` field, then the
/// first path component of the first cited document, then `unknown`.
pub fn infer_domain(ku: &KnowledgeUnit) -> String {
    if let Some(tag) = ku.domain_tag() {
        return tag.to_lowercase();
    }
    if let Some(domain) = ku.domain.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
        return domain.to_lowercase();
    }
    ku.sources
        .iter()
        .find_map(|s| path_domain(&s.path))
        .unwrap_or_else(|| "unknown".to_string())
}

fn path_domain(path: &str) -> Option<String> {
    let normalized = normalize_document_path(path);
    let (head, rest) = normalized.split_once('/')?;
    (!head.is_empty() && !rest.is_empty()).then(|| head.to_lowercase())
}

/// Metrics for one domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainDensity {
    /// Domain name
    pub domain: String,
    /// Active KUs
    pub ku_count: usize,
    /// Distinct documents cited
    pub source_count: usize,
    /// Mean KU confidence
    pub mean_confidence: f64,
    /// Distinct (document, page) pairs cited, within each page count when known
    pub total_pages: u64,
    /// `ku_count / total_pages`; `ku_count` when no pages are cited
    pub density: f64,
    /// `density * mean_confidence`
    pub quality: f64,
}

/// Metrics for one source document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDensity {
    /// Relative document path
    pub path: String,
    /// Domain of the KUs citing it (most common)
    pub domain: String,
    /// Active KUs citing it
    pub ku_count: usize,
    /// Mean confidence of those KUs
    pub mean_confidence: f64,
    /// Distinct pages cited, within the page count when known
    pub cited_pages: u64,
    /// Page count from the chunk store
    pub total_pages: Option<u32>,
    /// `cited / total * 100`, when the page count is known
    pub coverage_pct: Option<f64>,
}

/// Density across the corpus
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DensityReport {
    /// Per-domain metrics, largest domain first
    pub domains: Vec<DomainDensity>,
    /// Per-source metrics, sorted by path
    pub sources: Vec<SourceDensity>,
    /// Active KUs analyzed
    pub total_kus: usize,
    /// Archived KUs left out
    pub archived: usize,
}

impl DensityReport {
    /// Metrics of one domain
    pub fn domain(&self, name: &str) -> Option<&DomainDensity> {
        self.domains.iter().find(|d| d.domain == name)
    }

    /// Sources belonging to one domain
    pub fn sources_in<'a>(&'a self, domain: &'a str) -> impl Iterator<Item = &'a SourceDensity> + 'a {
        self.sources.iter().filter(move |s| s.domain == domain)
    }
}

#[derive(Default)]
struct Accumulator {
    kus: usize,
    confidence: f64,
    documents: BTreeSet<String>,
    pages: BTreeMap<String, Vec<PageRange>>,
    domains: BTreeMap<String, usize>,
}

impl Accumulator {
    fn cited_pages(&self, totals: &BTreeMap<String, u32>) -> u64 {
        self.pages
            .iter()
            .map(|(path, ranges)| PageRange::covered(ranges, totals.get(path).copied().filter(|t| *t > 0)))
            .sum()
    }

    fn mean_confidence(&self) -> f64 {
        if self.kus == 0 {
            0.0
        } else {
            self.confidence / self.kus as f64
        }
    }
}

/// Groups active KUs by domain and by source document
pub struct DensityAnalyzer<'a> {
    view: &'a CorpusView,
}

impl<'a> DensityAnalyzer<'a> {
    /// Create an analyzer over `view`
    pub fn new(view: &'a CorpusView) -> Self {
        Self { view }
    }

    fn page_totals(&self) -> BTreeMap<String, u32> {
        let mut totals: BTreeMap<String, u32> = BTreeMap::new();
        for chunk in self.view.chunks.iter().flat_map(|c| c.values()) {
            if let Some(range) = chunk.page_range() {
                let total = totals.entry(normalize_document_path(&chunk.path).to_string()).or_default();
                *total = (*total).max(range.end);
            }
        }
        totals
    }

    /// Compute every density figure
    pub fn analyze(&self) -> DensityReport {
        let mut by_domain: BTreeMap<String, Accumulator> = BTreeMap::new();
        let mut by_source: BTreeMap<String, Accumulator> = BTreeMap::new();
        let mut report = DensityReport::default();

        for ku in &self.view.kus {
            if ku.archived {
                report.archived += 1;
                continue;
            }
            report.total_kus += 1;
            let domain = infer_domain(ku);
            let group = by_domain.entry(domain.clone()).or_default();
            group.kus += 1;
            group.confidence += ku.confidence;

            let mut cited: BTreeSet<String> = BTreeSet::new();
            for source in ku.sources.iter().filter(|s| !s.path.is_empty()) {
                let path = normalize_document_path(&source.path).to_string();
                group.documents.insert(path.clone());
                let doc = by_source.entry(path.clone()).or_default();
                if let Some(pages) = source.pages {
                    group.pages.entry(path.clone()).or_default().push(pages);
                    doc.pages.entry(path.clone()).or_default().push(pages);
                }
                if cited.insert(path) {
                    doc.kus += 1;
                    doc.confidence += ku.confidence;
                    *doc.domains.entry(domain.clone()).or_default() += 1;
                }
            }
        }

        let totals = self.page_totals();
        for (domain, acc) in by_domain {
            let mean_confidence = acc.mean_confidence();
            let total_pages = acc.cited_pages(&totals);
            let density = if total_pages == 0 {
                acc.kus as f64
            } else {
                acc.kus as f64 / total_pages as f64
            };
            report.domains.push(DomainDensity {
                domain,
                ku_count: acc.kus,
                source_count: acc.documents.len(),
                mean_confidence,
                total_pages,
                density,
                quality: density * mean_confidence,
            });
        }
        report
            .domains
            .sort_by(|a, b| b.ku_count.cmp(&a.ku_count).then_with(|| a.domain.cmp(&b.domain)));

        for (path, acc) in by_source {
            let total_pages = totals.get(&path).copied().filter(|t| *t > 0);
            let cited_pages = acc.cited_pages(&totals);
            let domain = acc
                .domains
                .iter()
                .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
                .map(|(d, _)| d.clone())
                .unwrap_or_else(|| "unknown".to_string());
            report.sources.push(SourceDensity {
                domain,
                ku_count: acc.kus,
                mean_confidence: acc.mean_confidence(),
                cited_pages,
                total_pages,
                coverage_pct: total_pages.map(|t| cited_pages as f64 / t as f64 * 100.0),
                path,
            });
        }

        tracing::debug!(
            "Density over {} KU(s): {} domain(s), {} source(s)",
            report.total_kus,
            report.domains.len(),
            report.sources.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptorium_domain::{ChunkMetadata, Source};

    #[test]
    fn test_domain_precedence() {
        let base = KnowledgeUnit::new("c", vec![Source::new("x", "documents/physics/a.pdf")], 0.5);
        assert_eq!(infer_domain(&base), "physics");
        let with_field = base.clone().with_domain("Optics");
        assert_eq!(infer_domain(&with_field), "optics");
        let with_tag = with_field.with_tags(["domain:astronomy"]);
        assert_eq!(infer_domain(&with_tag), "astronomy");
        let flat = KnowledgeUnit::new("c", vec![Source::new("x", "a.pdf")], 0.5);
        assert_eq!(infer_domain(&flat), "unknown");
    }

    #[test]
    fn test_density_and_quality() {
        let kus = vec![
            KnowledgeUnit::new(
                "a",
                vec![Source::new("c1", "bio/a.pdf").with_pages(PageRange::new(1, 2))],
                0.8,
            ),
            KnowledgeUnit::new(
                "b",
                vec![Source::new("c2", "bio/a.pdf").with_pages(PageRange::new(2, 2))],
                0.4,
            ),
        ];
        let chunks = vec![ChunkMetadata::new("c1", "bio/a.pdf").with_pages(1, 20)];
        let view = CorpusView::from_parts(kus, vec![], Some(chunks), ["bio/a.pdf".to_string()], "/d");
        let report = DensityAnalyzer::new(&view).analyze();

        let bio = report.domain("bio").unwrap();
        assert_eq!(bio.ku_count, 2);
        assert_eq!(bio.total_pages, 2);
        assert!((bio.density - 1.0).abs() < 1e-9);
        assert!((bio.quality - 0.6).abs() < 1e-9);

        let source = &report.sources[0];
        assert_eq!(source.cited_pages, 2);
        assert_eq!(source.total_pages, Some(20));
        assert_eq!(source.coverage_pct, Some(10.0));
        assert_eq!(source.domain, "bio");
    }

    #[test]
    fn test_wide_citation_counts_only_real_pages() {
        let wide: PageRange = serde_json::from_str("[1, 4000000000]").unwrap();
        let kus = vec![KnowledgeUnit::new(
            "a",
            vec![Source::new("c1", "bio/a.pdf").with_pages(wide)],
            0.5,
        )];
        let chunks = vec![ChunkMetadata::new("c1", "bio/a.pdf").with_pages(1, 8)];
        let view = CorpusView::from_parts(kus, vec![], Some(chunks), ["bio/a.pdf".to_string()], "/d");
        let report = DensityAnalyzer::new(&view).analyze();

        assert_eq!(report.domain("bio").unwrap().total_pages, 8);
        assert_eq!(report.sources[0].cited_pages, 8);
        assert_eq!(report.sources[0].coverage_pct, Some(100.0));
    }

    #[test]
    fn test_archived_kus_are_left_out() {
        let mut archived = KnowledgeUnit::new("a", vec![Source::new("c1", "bio/a.pdf")], 0.8);
        archived.archived = true;
        let view = CorpusView::from_parts(vec![archived], vec![], None, Vec::<String>::new(), "/d");
        let report = DensityAnalyzer::new(&view).analyze();
        assert_eq!(report.total_kus, 0);
        assert_eq!(report.archived, 1);
        assert!(report.domains.is_empty());
    }
}
