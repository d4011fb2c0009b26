//! Provenance tracing: RU -> KU -> Chunk -> Document page -> Document

use crate::graph::ReverseIndex;
use crate::view::{normalize_document_path, CorpusView};
use crate::AuditError;
use scriptorium_domain::{KnowledgeUnit, Source};
use scriptorium_store::hash_file;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

/// Type of a node in a provenance chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    /// Reasoning Unit
    Ru,
    /// Knowledge Unit
    Ku,
    /// Chunk in the external chunk store
    Chunk,
    /// Cited page range within a document
    DocumentPage,
    /// Source document
    Document,
}

/// Overall verdict for a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainStatus {
    /// Every node resolved and every document hash matched
    Complete,
    /// Some nodes failed, but not most of them
    Partial,
    /// More than half of the nodes failed
    Broken,
}

impl ChainStatus {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainStatus::Complete => "complete",
            ChainStatus::Partial => "partial",
            ChainStatus::Broken => "broken",
        }
    }
}

/// One node of a provenance tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceNode {
    /// Node type
    pub kind: NodeKind,
    /// Entity id (or path, or page range for page nodes)
    pub id: String,
    /// Short human-readable label
    pub label: String,
    /// Whether the node resolved and checked out
    pub verified: bool,
    /// Why the node failed, or what was not checked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Child nodes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ProvenanceNode>,
}

impl ProvenanceNode {
    fn new(kind: NodeKind, id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            label: label.into(),
            verified: true,
            detail: None,
            children: Vec::new(),
        }
    }

    fn failed(mut self, detail: impl Into<String>) -> Self {
        self.verified = false;
        self.detail = Some(detail.into());
        self
    }

    fn note(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Visit this node and every descendant, depth first
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a ProvenanceNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

/// A traced provenance tree with its verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceChain {
    /// Root node (an RU or a KU)
    pub root: ProvenanceNode,
    /// Overall verdict
    pub status: ChainStatus,
    /// Nodes in the tree
    pub total_nodes: usize,
    /// Nodes that failed verification
    pub unverified_nodes: usize,
    /// One line per failed node
    pub issues: Vec<String>,
}

impl ProvenanceChain {
    fn from_root(root: ProvenanceNode) -> Self {
        let mut total = 0;
        let mut issues = Vec::new();
        root.walk(&mut |node| {
            total += 1;
            if !node.verified {
                issues.push(format!(
                    "{:?} {}: {}",
                    node.kind,
                    node.id,
                    node.detail.as_deref().unwrap_or("unverified")
                ));
            }
        });
        let failing = issues.len();
        let status = if failing == 0 {
            ChainStatus::Complete
        } else if failing * 2 > total {
            ChainStatus::Broken
        } else {
            ChainStatus::Partial
        };
        Self {
            root,
            status,
            total_nodes: total,
            unverified_nodes: failing,
            issues,
        }
    }
}

/// Everything that depends on one chunk or document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dependents {
    /// The chunk id or document path traced from
    pub origin: String,
    /// KUs citing it
    pub knowledge_ids: Vec<String>,
    /// RUs naming any of those KUs
    pub reasoning_ids: Vec<String>,
}

/// A document whose current hash differs from its reference hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMismatch {
    /// Relative document path
    pub path: String,
    /// Hash recorded in the reference (snapshot or tracker)
    pub expected: String,
    /// Hash of the file now, `None` if it is gone
    pub actual: Option<String>,
}

/// Walks provenance chains over a loaded view
///
/// Document nodes are verified by hashing the file and comparing with
/// `reference_hashes` (normally the latest snapshot's map). A document with
/// no reference hash verifies as long as the file exists.
pub struct Tracer<'a> {
    view: &'a CorpusView,
    reference_hashes: &'a BTreeMap<String, String>,
    verify_hashes: bool,
    hash_cache: RefCell<BTreeMap<String, Option<String>>>,
    reverse: ReverseIndex,
}

impl<'a> Tracer<'a> {
    /// Create a tracer over `view`
    pub fn new(view: &'a CorpusView, reference_hashes: &'a BTreeMap<String, String>) -> Self {
        Self {
            view,
            reference_hashes,
            verify_hashes: true,
            hash_cache: RefCell::new(BTreeMap::new()),
            reverse: ReverseIndex::from_view(view),
        }
    }

    /// Skip or enable document hash recomputation
    pub fn with_hash_verification(mut self, enabled: bool) -> Self {
        self.verify_hashes = enabled;
        self
    }

    /// Trace an RU or KU by id
    pub fn trace(&self, id: &str) -> Result<ProvenanceChain, AuditError> {
        if self.view.ru(id).is_some() {
            self.trace_ru(id)
        } else {
            self.trace_ku(id)
        }
    }

    /// Trace an RU down to its documents
    pub fn trace_ru(&self, ru_id: &str) -> Result<ProvenanceChain, AuditError> {
        let ru = self
            .view
            .ru(ru_id)
            .ok_or_else(|| AuditError::NotFound(ru_id.to_string()))?;

        let mut node = ProvenanceNode::new(NodeKind::Ru, &ru.id, format!("{} ({})", ru.relation, ru.topic));
        if !ru.hash_matches() {
            node = node.failed("content hash mismatch");
        }
        for ku_id in &ru.knowledge_ids {
            node.children.push(match self.view.ku(ku_id) {
                Some(ku) => self.ku_node(ku),
                None => ProvenanceNode::new(NodeKind::Ku, ku_id, ku_id).failed("KU not found"),
            });
        }
        tracing::debug!("Traced RU {}", ru_id);
        Ok(ProvenanceChain::from_root(node))
    }

    /// Trace a KU down to its documents
    pub fn trace_ku(&self, ku_id: &str) -> Result<ProvenanceChain, AuditError> {
        let ku = self
            .view
            .ku(ku_id)
            .ok_or_else(|| AuditError::NotFound(ku_id.to_string()))?;
        Ok(ProvenanceChain::from_root(self.ku_node(ku)))
    }

    fn ku_node(&self, ku: &KnowledgeUnit) -> ProvenanceNode {
        let mut node = ProvenanceNode::new(NodeKind::Ku, &ku.id, truncate(&ku.claim, 60));
        if ku.sources.is_empty() {
            node = node.failed("KU cites no sources");
        }
        for source in &ku.sources {
            node.children.push(self.chunk_node(source));
        }
        node
    }

    fn chunk_node(&self, source: &Source) -> ProvenanceNode {
        let mut node = ProvenanceNode::new(NodeKind::Chunk, &source.chunk_id, &source.chunk_id);
        if self.view.chunks_available() {
            match self.view.chunk(&source.chunk_id) {
                Some(_) => {}
                None => node = node.failed("chunk not found in chunk store"),
            }
        } else {
            node = node.note("not checked: chunk store unavailable");
        }

        let document = self.document_node(&source.path);
        match source.pages {
            Some(pages) => {
                let mut page = ProvenanceNode::new(NodeKind::DocumentPage, pages.canonical(), pages.to_string());
                if let Some(bounds) = self.view.chunk(&source.chunk_id).and_then(|c| c.page_range()) {
                    if !bounds.contains_range(&pages) {
                        page = page.failed(format!("cited {} outside chunk bounds {}", pages, bounds));
                    }
                }
                page.children.push(document);
                node.children.push(page);
            }
            None => node.children.push(document),
        }
        node
    }

    fn document_node(&self, cited: &str) -> ProvenanceNode {
        let path = normalize_document_path(cited);
        let node = ProvenanceNode::new(NodeKind::Document, path, path);
        if path.is_empty() {
            return node.failed("source has no document path");
        }
        if !self.view.has_document(path) {
            return node.failed("document not found");
        }
        if !self.verify_hashes {
            return node;
        }
        match (self.reference_hashes.get(path), self.current_hash(path)) {
            (_, None) => node.failed("document unreadable"),
            (Some(expected), Some(actual)) if *expected != actual => {
                node.failed(format!("hash mismatch: expected {}, found {}", short(expected), short(&actual)))
            }
            _ => node,
        }
    }

    fn current_hash(&self, path: &str) -> Option<String> {
        if let Some(cached) = self.hash_cache.borrow().get(path) {
            return cached.clone();
        }
        let hash = match hash_file(&self.view.document_path(path)) {
            Ok(hash) => Some(hash),
            Err(e) => {
                tracing::warn!("Cannot hash {}: {}", path, e);
                None
            }
        };
        self.hash_cache.borrow_mut().insert(path.to_string(), hash.clone());
        hash
    }

    /// Every document whose current hash differs from its reference hash
    pub fn verify_documents(&self) -> Vec<DocumentMismatch> {
        self.reference_hashes
            .iter()
            .filter(|(path, _)| self.view.documents.contains(path.as_str()))
            .filter_map(|(path, expected)| {
                let actual = self.current_hash(path);
                (actual.as_deref() != Some(expected.as_str())).then(|| DocumentMismatch {
                    path: path.clone(),
                    expected: expected.clone(),
                    actual,
                })
            })
            .collect()
    }

    /// Everything that depends on a chunk
    pub fn trace_back_chunk(&self, chunk_id: &str) -> Dependents {
        let kus = self.reverse.chunk_to_kus.get(chunk_id).cloned().unwrap_or_default();
        self.dependents(chunk_id, kus)
    }

    /// Everything that depends on a document
    pub fn trace_back_document(&self, path: &str) -> Dependents {
        let path = normalize_document_path(path);
        let kus = self.reverse.document_to_kus.get(path).cloned().unwrap_or_default();
        self.dependents(path, kus)
    }

    fn dependents(&self, origin: &str, knowledge_ids: Vec<String>) -> Dependents {
        let reasoning_ids: BTreeSet<String> = knowledge_ids
            .iter()
            .filter_map(|id| self.reverse.ku_to_rus.get(id))
            .flatten()
            .cloned()
            .collect();
        Dependents {
            origin: origin.to_string(),
            knowledge_ids,
            reasoning_ids: reasoning_ids.into_iter().collect(),
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
