//! Scriptorium Audit
//!
//! Read-only provenance and integrity analysis over a loaded corpus.
//!
//! The audit layer provides:
//! - Provenance tracing (RU -> KU -> Chunk -> Document page -> Document)
//! - Broken-reference detection, plus an opt-in repair that strips dangling ids
//! - Orphan and isolated-cluster detection
//! - Citation accuracy against chunk metadata
//! - Page and reasoning coverage
//! - Gap aggregation with a health score and remediation plan
//!
//! # Examples
//!
//! ```no_run
//! use scriptorium_audit::{AuditConfig, CorpusView, GapReporter};
//! use scriptorium_store::{KnowledgeStore, NullChunkStore, StoreLayout};
//! use std::collections::BTreeMap;
//!
//! let store = KnowledgeStore::open(StoreLayout::new("corpus")).unwrap();
//! let view = CorpusView::load(&store, &NullChunkStore).unwrap();
//! let report = GapReporter::new(AuditConfig::default()).report(&view, &BTreeMap::new());
//! println!("health {}", report.health_score);
//! ```

#![warn(missing_docs)]

mod citations;
mod config;
mod coverage;
mod error;
mod gaps;
mod graph;
mod links;
mod orphans;
mod report;
mod tracer;
mod view;

pub use citations::{CitationChecker, CitationIssue, CitationReport, IssueKind};
pub use config::AuditConfig;
pub use coverage::{CoverageAnalyzer, CoverageReport, DocumentCoverage};
pub use error::AuditError;
pub use gaps::{Findings, Gap, GapCategory, GapReport, GapReporter, RemediationStep};
pub use graph::{BitSet, CorpusGraph, ReverseIndex};
pub use links::{
    apply_repair, plan_repair, BrokenLink, EntityLinks, KuFix, LinkDetector, LinkKind, LinkReport, Repair,
    RepairPlan, RuFix,
};
pub use orphans::{OrphanEntity, OrphanIdentifier, OrphanKind, OrphanReport};
pub use report::{Auditor, FullAuditReport};
pub use tracer::{ChainStatus, Dependents, DocumentMismatch, NodeKind, ProvenanceChain, ProvenanceNode, Tracer};
pub use view::{normalize_document_path, CorpusView};
