//! Citation accuracy: cited pages, authors and titles against chunk metadata

use crate::config::AuditConfig;
use crate::view::CorpusView;
use scriptorium_domain::similarity::fuzzy_match;
use scriptorium_domain::{ChunkMetadata, KnowledgeUnit, Severity, Source};
use serde::{Deserialize, Serialize};

/// Kind of citation problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueKind {
    /// Cited pages fall outside the chunk's page bounds
    PageOutOfRange,
    /// Cited author does not match the chunk's author
    AuthorMismatch,
    /// Cited title does not match the chunk's title
    TitleMismatch,
    /// The source cites something the chunk has no metadata for
    MissingChunkMetadata,
    /// The source carries no page range
    MissingPages,
}

impl IssueKind {
    /// Default severity for this kind
    pub fn severity(&self) -> Severity {
        match self {
            IssueKind::PageOutOfRange => Severity::High,
            IssueKind::AuthorMismatch | IssueKind::TitleMismatch => Severity::Medium,
            IssueKind::MissingChunkMetadata => Severity::Medium,
            IssueKind::MissingPages => Severity::Low,
        }
    }
}

/// One citation problem, with what was expected and what was found
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationIssue {
    /// KU carrying the source
    pub ku_id: String,
    /// Cited chunk
    pub chunk_id: String,
    /// Problem kind
    pub kind: IssueKind,
    /// Severity
    pub severity: Severity,
    /// Value from the chunk store
    pub expected: Option<String>,
    /// Value in the citation
    pub actual: Option<String>,
}

/// Citation check results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CitationReport {
    /// Sources checked
    pub citations_checked: usize,
    /// Problems found
    pub issues: Vec<CitationIssue>,
    /// `100 * (checked - weighted issues) / checked`, clamped to [0, 100]
    pub accuracy_score: f64,
    /// Mean share of pages/author/title present per citation, in percent
    pub completeness_score: f64,
    /// No chunk store, so nothing could be compared
    pub skipped: bool,
}

/// Validates each KU source against its resolved chunk
pub struct CitationChecker<'a> {
    view: &'a CorpusView,
    threshold: f64,
    require_pages: bool,
}

impl<'a> CitationChecker<'a> {
    /// Create a checker over `view`
    pub fn new(view: &'a CorpusView, config: &AuditConfig) -> Self {
        Self {
            view,
            threshold: config.fuzzy_threshold,
            require_pages: config.require_pages,
        }
    }

    /// Check every source of every KU
    pub fn check_all(&self) -> CitationReport {
        self.check(self.view.kus.iter())
    }

    /// Check the sources of selected KUs
    pub fn check<'k, I>(&self, kus: I) -> CitationReport
    where
        I: IntoIterator<Item = &'k KnowledgeUnit>,
    {
        let mut report = CitationReport {
            skipped: !self.view.chunks_available(),
            ..Default::default()
        };
        let mut completeness_sum = 0.0;

        for ku in kus {
            for source in &ku.sources {
                report.citations_checked += 1;
                completeness_sum += completeness(source);
                if self.require_pages && source.pages.is_none() {
                    report.issues.push(issue(ku, source, IssueKind::MissingPages, None, None));
                }
                // Unresolvable chunks are the link detector's concern
                if let Some(chunk) = self.view.chunk(&source.chunk_id) {
                    self.compare(ku, source, chunk, &mut report.issues);
                }
            }
        }

        if report.citations_checked == 0 {
            report.accuracy_score = 100.0;
            report.completeness_score = 100.0;
        } else {
            let checked = report.citations_checked as f64;
            let penalty: f64 = report.issues.iter().map(|i| issue_weight(i.severity)).sum();
            report.accuracy_score = ((checked - penalty) / checked * 100.0).clamp(0.0, 100.0);
            report.completeness_score = completeness_sum / checked * 100.0;
        }
        report
    }

    fn compare(&self, ku: &KnowledgeUnit, source: &Source, chunk: &ChunkMetadata, issues: &mut Vec<CitationIssue>) {
        if let Some(pages) = source.pages {
            match chunk.page_range() {
                Some(bounds) if !bounds.contains_range(&pages) => issues.push(issue(
                    ku,
                    source,
                    IssueKind::PageOutOfRange,
                    Some(bounds.canonical()),
                    Some(pages.canonical()),
                )),
                Some(_) => {}
                None => issues.push(issue(
                    ku,
                    source,
                    IssueKind::MissingChunkMetadata,
                    None,
                    Some(format!("pages {}", pages.canonical())),
                )),
            }
        }

        self.compare_text(ku, source, source.author.as_deref(), chunk.author.as_deref(), IssueKind::AuthorMismatch, issues);
        self.compare_text(ku, source, source.title.as_deref(), chunk.title.as_deref(), IssueKind::TitleMismatch, issues);
    }

    fn compare_text(
        &self,
        ku: &KnowledgeUnit,
        source: &Source,
        cited: Option<&str>,
        known: Option<&str>,
        kind: IssueKind,
        issues: &mut Vec<CitationIssue>,
    ) {
        match (cited, known) {
            (Some(cited), Some(known)) if !fuzzy_match(cited, known, self.threshold) => {
                issues.push(issue(ku, source, kind, Some(known.to_string()), Some(cited.to_string())))
            }
            (Some(cited), None) => issues.push(issue(
                ku,
                source,
                IssueKind::MissingChunkMetadata,
                None,
                Some(cited.to_string()),
            )),
            _ => {}
        }
    }
}

fn issue(
    ku: &KnowledgeUnit,
    source: &Source,
    kind: IssueKind,
    expected: Option<String>,
    actual: Option<String>,
) -> CitationIssue {
    CitationIssue {
        ku_id: ku.id.clone(),
        chunk_id: source.chunk_id.clone(),
        kind,
        severity: kind.severity(),
        expected,
        actual,
    }
}

fn completeness(source: &Source) -> f64 {
    let present = [source.pages.is_some(), source.author.is_some(), source.title.is_some()]
        .iter()
        .filter(|p| **p)
        .count();
    present as f64 / 3.0
}

fn issue_weight(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => 1.0,
        Severity::High => 0.75,
        Severity::Medium => 0.5,
        Severity::Low => 0.25,
        Severity::Info => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptorium_domain::PageRange;

    fn view(source: Source) -> CorpusView {
        let ku = KnowledgeUnit::new("claim", vec![source], 0.5);
        let chunk = ChunkMetadata::new("c1", "a.pdf")
            .with_pages(10, 20)
            .with_citation(Some("Ada Lovelace"), Some("Notes on the Analytical Engine"));
        CorpusView::from_parts(vec![ku], vec![], Some(vec![chunk]), ["a.pdf".to_string()], "/d")
    }

    #[test]
    fn test_accurate_citation() {
        let source = Source::new("c1", "a.pdf")
            .with_pages(PageRange::new(12, 14))
            .with_author("Lovelace")
            .with_title("Notes on the analytical engine");
        let view = view(source);
        let report = CitationChecker::new(&view, &AuditConfig::default()).check_all();
        assert!(report.issues.is_empty());
        assert_eq!(report.accuracy_score, 100.0);
        assert_eq!(report.completeness_score, 100.0);
    }

    #[test]
    fn test_page_out_of_range_is_high() {
        let view = view(Source::new("c1", "a.pdf").with_pages(PageRange::new(18, 25)));
        let report = CitationChecker::new(&view, &AuditConfig::default()).check_all();
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].kind, IssueKind::PageOutOfRange);
        assert_eq!(report.issues[0].expected.as_deref(), Some("10-20"));
        assert_eq!(report.accuracy_score, 25.0);
    }

    #[test]
    fn test_author_mismatch() {
        let view = view(
            Source::new("c1", "a.pdf")
                .with_pages(PageRange::single(11))
                .with_author("Charles Babbage"),
        );
        let report = CitationChecker::new(&view, &AuditConfig::default()).check_all();
        assert_eq!(report.issues[0].kind, IssueKind::AuthorMismatch);
        assert_eq!(report.issues[0].severity, Severity::Medium);
    }

    #[test]
    fn test_missing_pages_when_required() {
        let view = view(Source::new("c1", "a.pdf"));
        let strict = CitationChecker::new(&view, &AuditConfig::default()).check_all();
        assert_eq!(strict.issues[0].kind, IssueKind::MissingPages);
        let lenient = CitationChecker::new(&view, &AuditConfig::lenient()).check_all();
        assert!(lenient.issues.is_empty());
    }
}
