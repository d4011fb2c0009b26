//! Scriptorium Growth
//!
//! Everything that changes the corpus over time, done so it can be undone.
//!
//! - Versioning: content-hash snapshots, integrity checks, rollback, diff
//! - Changelog: append-only record of every mutating action
//! - Tracking: per-document change detection with persisted status
//! - Incremental processing: bounded, timed runs of the extraction pipeline
//! - Merging: five reconciliation modes and a conflict review queue
//!
//! # Examples
//!
//! ```no_run
//! use scriptorium_growth::{DocumentTracker, VersionManager};
//! use scriptorium_store::StoreLayout;
//!
//! let layout = StoreLayout::new("corpus");
//! let versions = VersionManager::open(layout.clone()).unwrap();
//! let latest = versions.latest().unwrap();
//! let mut tracker = DocumentTracker::load(&layout).unwrap();
//! let changes = tracker
//!     .detect_changes(latest.as_ref().map(|s| &s.document_hashes))
//!     .unwrap();
//! println!("{} changed document(s)", changes.changed());
//! ```

#![warn(missing_docs)]

mod changelog;
mod config;
mod error;
mod incremental;
mod merge;
mod snapshot;
mod tracker;

pub use changelog::{export_json, export_markdown, ChangeEntry, ChangeKind, ChangeQuery, Changelog, Impact, NewChange};
pub use config::{MergeConfig, PipelineConfig};
pub use error::GrowthError;
pub use incremental::{
    BatchReport, DocumentOutcome, ExtractionPipeline, IncrementalProcessor, ProcessingMode, ProcessingResult,
    StageOutcome, SubprocessPipeline,
};
pub use merge::{ConflictKind, ConflictStore, MergeConflict, MergeMode, MergeOutcome, MergeStrategy, Resolution};
pub use snapshot::{
    CorpusSnapshot, IntegrityCheck, RollbackOutcome, SnapshotDiff, SnapshotStats, VersionManager, VersionState,
    VersionStatus,
};
pub use tracker::{ChangeSet, DocumentStatus, DocumentTracker, TrackedDocument};
