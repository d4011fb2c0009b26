//! Scriptorium Storage Layer
//!
//! Append-only record files for Knowledge Units and Reasoning Units, a
//! byte-offset index over the knowledge log, document scanning, and the
//! adapters that sit in front of the external chunk store.
//!
//! # Architecture
//!
//! - JSON Lines logs: one KU / RU record per line, appended by a single writer
//! - Index file mapping each KU id to the byte offset of its line
//! - Tolerant loading: a malformed line is skipped and reported, never fatal
//! - Chunk store adapters: SQLite, in-memory (JSONL exports), and a no-op
//!
//! # Examples
//!
//! ```no_run
//! use scriptorium_store::{KnowledgeStore, StoreLayout};
//!
//! let layout = StoreLayout::new("corpus");
//! let store = KnowledgeStore::open(layout).unwrap();
//! let report = store.load_knowledge().unwrap();
//! println!("{} KUs, {} bad lines", report.records.len(), report.errors.len());
//! ```

#![warn(missing_docs)]

mod chunks;
mod documents;
mod knowledge;
mod layout;
mod loader;

pub use chunks::{ChunkBackend, MemoryChunkStore, NullChunkStore, SqliteChunkStore};
pub use documents::{corpus_hash, hash_file, list_documents, scan_documents, DocumentInfo};
pub use knowledge::{IndexCheck, KnowledgeStore, PromoteOutcome};
pub use layout::{StoreConfig, StoreLayout};
pub use loader::{read_jsonl, LineError, LoadReport, Located};

use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record (de)serialization error
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Chunk database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid data format
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A rewrite would drop lines the tolerant loader skipped
    #[error("Refusing to rewrite {path}: malformed line(s) {lines:?} would be lost; repair or remove them first")]
    UncleanLog {
        /// Log file
        path: String,
        /// 1-based numbers of the unparsable lines
        lines: Vec<usize>,
    },

    /// The single-writer lock was poisoned by a panicking writer
    #[error("Writer lock poisoned")]
    Poisoned,
}
