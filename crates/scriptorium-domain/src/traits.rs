//! Trait definitions for external interactions
//!
//! These traits define the boundaries between domain logic and infrastructure.
//! Implementations live in other crates.

use crate::{Chunk, ChunkMetadata};

/// Boundary to the external chunk store
///
/// Implemented by the infrastructure layer (scriptorium-store). The store is
/// never written to; it is only resolved against.
pub trait ChunkStore {
    /// Error type for chunk store operations
    type Error;

    /// Whether a real chunk store is behind this handle
    ///
    /// A no-op implementation returns `false`, and auditors skip chunk-level
    /// checks rather than report every reference as broken.
    fn is_available(&self) -> bool {
        true
    }

    /// Resolve a chunk id to its text and metadata
    fn resolve(&self, chunk_id: &str) -> Result<Option<Chunk>, Self::Error>;

    /// List every chunk the store knows about
    fn list_all(&self) -> Result<Vec<ChunkMetadata>, Self::Error>;
}

/// Something able to take a restorable backup of the mutable corpus files
///
/// Implemented by the version manager (scriptorium-growth). Every operation
/// that rewrites the knowledge or reasoning log calls this first.
pub trait BackupProvider {
    /// Error type for backup operations
    type Error;

    /// Take a backup and return an identifier it can be restored from
    fn backup(&self, reason: &str) -> Result<String, Self::Error>;
}
