//! Scriptorium Domain Layer
//!
//! This crate contains the core domain model for Scriptorium, a provenance
//! ledger for source-cited knowledge. It defines the value types every other
//! layer depends upon and the trait seams to external collaborators.
//!
//! ## Key Concepts
//!
//! - **Knowledge Unit (KU)**: an atomic claim citing one or more sources
//! - **Reasoning Unit (RU)**: a relation built over several KUs
//! - **Chunk**: an externally owned span of a source document
//! - **Corpus Version**: the semantic version advanced by each snapshot
//! - **Severity**: the shared grading scale behind every health score
//!
//! ## Identity
//!
//! KU and RU ids are pure functions of their content. Identical claim text
//! and sources always hash to the same id, whatever order the sources were
//! listed in, which makes promotion idempotent and dedup a plain id lookup.
//!
//! ## Architecture
//!
//! - Pure domain logic, no I/O
//! - Storage lives in `scriptorium-store`, analysis in the audit, growth and
//!   balance crates
//! - Trait definitions for every external interaction

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod hashing;
pub mod knowledge;
pub mod reasoning;
pub mod severity;
pub mod similarity;
pub mod traits;
pub mod version;

// Re-exports for convenience
pub use chunk::{Chunk, ChunkMetadata};
pub use hashing::sha256_hex;
pub use knowledge::{KnowledgeUnit, PageRange, Source};
pub use reasoning::ReasoningUnit;
pub use severity::{health_score, Severity};
pub use traits::{BackupProvider, ChunkStore};
pub use version::{BumpKind, CorpusVersion};
