//! Knowledge Unit module - the atomic cited claim

use crate::hashing::{hash_fields, prefixed_id, sha256_hex};
use crate::similarity::normalize_text;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Confidence assigned when a record omits it
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

fn default_confidence() -> f64 {
    DEFAULT_CONFIDENCE
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Inclusive page range cited by a source
///
/// Written as `[start, end]`. On read, `"3-5"`, `"7"`, `[7]` and a bare `7`
/// are accepted as well. Page 0 is rejected on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawPages", into = "[u32; 2]")]
pub struct PageRange {
    /// First page (1-based)
    pub start: u32,
    /// Last page, inclusive
    pub end: u32,
}

impl PageRange {
    /// Create a page range; reversed bounds are swapped and page 0 becomes 1
    pub fn new(start: u32, end: u32) -> Self {
        let (start, end) = (start.max(1), end.max(1));
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    /// A single page
    pub fn single(page: u32) -> Self {
        Self::new(page, page)
    }

    /// Number of pages covered
    pub fn len(&self) -> u64 {
        u64::from(self.end) - u64::from(self.start) + 1
    }

    /// Ranges always cover at least one page
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether `other` lies entirely within this range
    pub fn contains_range(&self, other: &PageRange) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    /// Whether the two ranges share at least one page
    pub fn overlaps(&self, other: &PageRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Distinct pages covered by `ranges`, clipped to `1..=limit` when given
    ///
    /// Works on merged intervals, so a range of any width costs the same.
    pub fn covered<'a, I>(ranges: I, limit: Option<u32>) -> u64
    where
        I: IntoIterator<Item = &'a PageRange>,
    {
        let mut spans: Vec<(u32, u32)> = ranges
            .into_iter()
            .filter_map(|r| match limit {
                Some(limit) => (r.start <= limit).then(|| (r.start, r.end.min(limit))),
                None => Some((r.start, r.end)),
            })
            .collect();
        spans.sort_unstable();

        let mut total = 0u64;
        let mut current: Option<(u32, u32)> = None;
        for (start, end) in spans {
            current = match current {
                Some((cs, ce)) if start <= ce.saturating_add(1) => Some((cs, ce.max(end))),
                Some((cs, ce)) => {
                    total += u64::from(ce - cs) + 1;
                    Some((start, end))
                }
                None => Some((start, end)),
            };
        }
        if let Some((cs, ce)) = current {
            total += u64::from(ce - cs) + 1;
        }
        total
    }

    /// Canonical text form used for hashing (`"3-5"`)
    pub fn canonical(&self) -> String {
        format!("{}-{}", self.start, self.end)
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "p.{}", self.start)
        } else {
            write!(f, "pp.{}-{}", self.start, self.end)
        }
    }
}

impl From<PageRange> for [u32; 2] {
    fn from(range: PageRange) -> Self {
        [range.start, range.end]
    }
}

/// Every shape a page reference has been seen in
#[derive(Deserialize)]
#[serde(untagged)]
enum RawPages {
    List(Vec<u32>),
    Single(u32),
    Text(String),
}

impl TryFrom<RawPages> for PageRange {
    type Error = String;

    fn try_from(raw: RawPages) -> Result<Self, Self::Error> {
        let (start, end) = match raw {
            RawPages::Single(page) => (page, page),
            RawPages::List(pages) => match pages.as_slice() {
                [page] => (*page, *page),
                [start, end] => (*start, *end),
                other => return Err(format!("expected 1 or 2 page numbers, got {}", other.len())),
            },
            RawPages::Text(text) => parse_page_text(&text)?,
        };
        if start == 0 || end == 0 {
            return Err("page numbers are 1-based, got 0".to_string());
        }
        Ok(PageRange::new(start, end))
    }
}

fn parse_page_text(text: &str) -> Result<(u32, u32), String> {
    let trimmed = text
        .trim()
        .trim_start_matches("pp.")
        .trim_start_matches("p.")
        .trim();
    let parse = |s: &str| {
        s.trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid page '{}': {}", s.trim(), e))
    };
    match trimmed.split_once('-') {
        Some((start, end)) => Ok((parse(start)?, parse(end)?)),
        None => {
            let page = parse(trimmed)?;
            Ok((page, page))
        }
    }
}

/// A reference from a KU to the material it was drawn from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// Identifier of the chunk in the external chunk store
    #[serde(default)]
    pub chunk_id: String,

    /// Document path relative to the corpus documents directory
    #[serde(default)]
    pub path: String,

    /// Cited page range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<PageRange>,

    /// Cited author
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    /// Cited title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Unknown fields, preserved on rewrite but otherwise ignored
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Source {
    /// Create a source pointing at a chunk of a document
    pub fn new(chunk_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            path: path.into(),
            pages: None,
            author: None,
            title: None,
            extra: BTreeMap::new(),
        }
    }

    /// Attach a page range
    pub fn with_pages(mut self, pages: PageRange) -> Self {
        self.pages = Some(pages);
        self
    }

    /// Attach an author
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Attach a title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Canonical form of every identity-bearing field
    pub fn canonical(&self) -> String {
        [
            self.chunk_id.as_str(),
            self.path.as_str(),
            &self.pages.map(|p| p.canonical()).unwrap_or_default(),
            self.author.as_deref().unwrap_or(""),
            self.title.as_deref().unwrap_or(""),
        ]
        .join("\u{1e}")
    }
}

/// A Knowledge Unit: one claim with the sources it cites
///
/// The id is derived from the claim text and sources. Confidence and the
/// archived flag are the only fields expected to change after promotion, and
/// only calibration changes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeUnit {
    /// Content-derived identifier (`ku_<hex>`)
    #[serde(default)]
    pub id: String,

    /// Claim text
    pub claim: String,

    /// Cited sources, in extraction order
    #[serde(default)]
    pub sources: Vec<Source>,

    /// Confidence in [0, 1]
    #[serde(default = "default_confidence")]
    pub confidence: f64,

    /// Free-form tags; a `domain:<name>` tag names the KU's domain
    #[serde(default)]
    pub tags: Vec<String>,

    /// Explicit domain, when the extractor provided one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Archived KUs stay in the log but drop out of density analysis
    #[serde(default, skip_serializing_if = "is_false")]
    pub archived: bool,

    /// Extraction debug payload, carried opaquely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<Value>,

    /// Unknown fields, preserved on rewrite but otherwise ignored
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl KnowledgeUnit {
    /// Create a KU, deriving its id from the claim and sources
    ///
    /// # Examples
    ///
    /// ```
    /// use scriptorium_domain::{KnowledgeUnit, Source};
    ///
    /// let a = KnowledgeUnit::new("Water boils at 100C", vec![
    ///     Source::new("c1", "physics.pdf"),
    ///     Source::new("c2", "chem.pdf"),
    /// ], 0.9);
    /// let b = KnowledgeUnit::new("Water boils at 100C", vec![
    ///     Source::new("c2", "chem.pdf"),
    ///     Source::new("c1", "physics.pdf"),
    /// ], 0.4);
    /// assert_eq!(a.id, b.id);
    /// ```
    pub fn new(claim: impl Into<String>, sources: Vec<Source>, confidence: f64) -> Self {
        let claim = claim.into();
        let id = Self::compute_id(&claim, &sources);
        Self {
            id,
            claim,
            sources,
            confidence: clamp_confidence(confidence),
            tags: Vec::new(),
            domain: None,
            archived: false,
            debug: None,
            extra: BTreeMap::new(),
        }
    }

    /// Attach tags
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Attach an explicit domain
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Derive the id for a claim and its sources
    ///
    /// Sources are sorted by canonical form and repeats dropped first, so
    /// neither their order nor a duplicated source affects the result.
    pub fn compute_id(claim: &str, sources: &[Source]) -> String {
        let mut canonical: Vec<String> = sources.iter().map(Source::canonical).collect();
        canonical.sort();
        canonical.dedup();
        let digest = hash_fields(
            std::iter::once(claim).chain(canonical.iter().map(String::as_str)),
        );
        prefixed_id("ku", &digest)
    }

    /// Recompute this KU's id from its current content
    pub fn recompute_id(&self) -> String {
        Self::compute_id(&self.claim, &self.sources)
    }

    /// Whether the stored id matches the content
    pub fn has_valid_id(&self) -> bool {
        self.id == self.recompute_id()
    }

    /// Hash of the normalized claim text alone, for exact-content dedup
    pub fn content_hash(&self) -> String {
        sha256_hex(normalize_text(&self.claim).as_bytes())
    }

    /// Distinct document paths cited by this KU
    pub fn document_paths(&self) -> BTreeSet<&str> {
        self.sources
            .iter()
            .map(|s| s.path.as_str())
            .filter(|p| !p.is_empty())
            .collect()
    }

    /// Distinct chunk ids cited by this KU
    pub fn chunk_ids(&self) -> BTreeSet<&str> {
        self.sources
            .iter()
            .map(|s| s.chunk_id.as_str())
            .filter(|c| !c.is_empty())
            .collect()
    }

    /// Domain named by a `domain:<name>` tag, if any
    pub fn domain_tag(&self) -> Option<&str> {
        self.tags
            .iter()
            .find_map(|t| t.strip_prefix("domain:"))
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

/// Clamp a confidence value into [0, 1]; NaN becomes the default
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        DEFAULT_CONFIDENCE
    } else {
        value.clamp(0.0, 1.0)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_source() -> impl Strategy<Value = Source> {
        ("[a-z0-9]{1,8}", "[a-z/]{1,12}", 1u32..50, 0u32..5, "[A-Za-z ]{0,10}").prop_map(
            |(chunk, path, start, span, author)| {
                let mut s = Source::new(chunk, path).with_pages(PageRange::new(start, start + span));
                if !author.is_empty() {
                    s.author = Some(author);
                }
                s
            },
        )
    }

    proptest! {
        /// Property: id is independent of source order
        #[test]
        fn test_id_order_independent(claim in ".{0,40}", sources in prop::collection::vec(arb_source(), 0..5)) {
            let mut reversed = sources.clone();
            reversed.reverse();
            prop_assert_eq!(
                KnowledgeUnit::compute_id(&claim, &sources),
                KnowledgeUnit::compute_id(&claim, &reversed)
            );
        }

        /// Property: appending a character to the claim changes the id
        #[test]
        fn test_claim_change_changes_id(claim in ".{0,40}", extra in any::<char>(), sources in prop::collection::vec(arb_source(), 0..3)) {
            let mut changed = claim.clone();
            changed.push(extra);
            prop_assert_ne!(
                KnowledgeUnit::compute_id(&claim, &sources),
                KnowledgeUnit::compute_id(&changed, &sources)
            );
        }

        /// Property: changing a chunk id changes the id
        #[test]
        fn test_chunk_change_changes_id(claim in ".{0,20}", source in arb_source()) {
            let mut changed = source.clone();
            changed.chunk_id.push('x');
            prop_assert_ne!(
                KnowledgeUnit::compute_id(&claim, std::slice::from_ref(&source)),
                KnowledgeUnit::compute_id(&claim, std::slice::from_ref(&changed))
            );
        }
    }
}
