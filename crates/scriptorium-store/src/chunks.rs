//! Chunk store adapters
//!
//! The chunk store is owned by the upstream chunking step. Scriptorium only
//! resolves ids against it, through one of three adapters:
//!
//! - `SqliteChunkStore`: a `chunks` table in a SQLite database
//! - `MemoryChunkStore`: chunks held in memory, loaded from a JSONL export
//! - `NullChunkStore`: no chunk store configured; reports itself unavailable

use crate::layout::StoreLayout;
use crate::loader::read_jsonl;
use crate::StoreError;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use scriptorium_domain::{Chunk, ChunkMetadata, ChunkStore};
use std::collections::BTreeMap;
use std::path::Path;

/// Read-only view over an external SQLite chunk table
///
/// SQLite connections are not thread-safe. Each thread should open its own
/// `SqliteChunkStore`.
pub struct SqliteChunkStore {
    conn: Connection,
}

impl SqliteChunkStore {
    /// Open an existing chunk database read-only
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { conn })
    }

    /// Create (or open) a writable chunk database with the expected schema
    ///
    /// Use `:memory:` for an in-memory database.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Self { conn })
    }

    /// Insert or replace a chunk; only valid on a database from `create`
    pub fn insert_chunk(&self, chunk: &Chunk) -> Result<(), StoreError> {
        let meta = &chunk.metadata;
        self.conn.execute(
            "INSERT OR REPLACE INTO chunks (id, text, path, page_start, page_end, author, title)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                meta.chunk_id,
                chunk.text,
                meta.path,
                meta.page_start,
                meta.page_end,
                meta.author,
                meta.title,
            ],
        )?;
        Ok(())
    }

    fn metadata_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChunkMetadata> {
        Ok(ChunkMetadata {
            chunk_id: row.get(0)?,
            path: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            page_start: row.get(2)?,
            page_end: row.get(3)?,
            author: row.get(4)?,
            title: row.get(5)?,
        })
    }
}

impl ChunkStore for SqliteChunkStore {
    type Error = StoreError;

    fn resolve(&self, chunk_id: &str) -> Result<Option<Chunk>, Self::Error> {
        let chunk = self
            .conn
            .query_row(
                "SELECT id, path, page_start, page_end, author, title, text
                 FROM chunks WHERE id = ?1",
                params![chunk_id],
                |row| {
                    Ok(Chunk {
                        metadata: Self::metadata_from_row(row)?,
                        text: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                    })
                },
            )
            .optional()?;
        Ok(chunk)
    }

    fn list_all(&self) -> Result<Vec<ChunkMetadata>, Self::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT id, path, page_start, page_end, author, title FROM chunks ORDER BY id",
        )?;
        let chunks = stmt
            .query_map([], Self::metadata_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(chunks)
    }
}

/// Chunks held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryChunkStore {
    chunks: BTreeMap<String, Chunk>,
}

impl MemoryChunkStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSONL export (one chunk object per line); bad lines are skipped
    pub fn load_jsonl(path: &Path) -> Result<Self, StoreError> {
        let report = read_jsonl::<Chunk>(path)?;
        let mut store = Self::new();
        for located in report.records {
            store.insert(located.record);
        }
        Ok(store)
    }

    /// Insert or replace a chunk
    pub fn insert(&mut self, chunk: Chunk) {
        self.chunks.insert(chunk.metadata.chunk_id.clone(), chunk);
    }

    /// Remove a chunk, returning it if present
    pub fn remove(&mut self, chunk_id: &str) -> Option<Chunk> {
        self.chunks.remove(chunk_id)
    }

    /// Number of chunks
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl FromIterator<Chunk> for MemoryChunkStore {
    fn from_iter<I: IntoIterator<Item = Chunk>>(iter: I) -> Self {
        let mut store = Self::new();
        for chunk in iter {
            store.insert(chunk);
        }
        store
    }
}

impl ChunkStore for MemoryChunkStore {
    type Error = StoreError;

    fn resolve(&self, chunk_id: &str) -> Result<Option<Chunk>, Self::Error> {
        Ok(self.chunks.get(chunk_id).cloned())
    }

    fn list_all(&self) -> Result<Vec<ChunkMetadata>, Self::Error> {
        Ok(self.chunks.values().map(|c| c.metadata.clone()).collect())
    }
}

/// Stand-in used when no chunk store is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NullChunkStore;

impl ChunkStore for NullChunkStore {
    type Error = StoreError;

    fn is_available(&self) -> bool {
        false
    }

    fn resolve(&self, _chunk_id: &str) -> Result<Option<Chunk>, Self::Error> {
        Ok(None)
    }

    fn list_all(&self) -> Result<Vec<ChunkMetadata>, Self::Error> {
        Ok(Vec::new())
    }
}

/// The chunk adapter selected for a corpus
pub enum ChunkBackend {
    /// SQLite chunk table
    Sqlite(SqliteChunkStore),
    /// In-memory chunks
    Memory(MemoryChunkStore),
    /// No chunk store
    Null(NullChunkStore),
}

impl ChunkBackend {
    /// Pick the adapter for a layout's configured chunk store
    ///
    /// A `.jsonl` path loads into memory, any other path opens as SQLite.
    /// A missing or absent path falls back to `NullChunkStore`.
    pub fn from_layout(layout: &StoreLayout) -> Result<Self, StoreError> {
        let Some(path) = layout.chunk_store() else {
            tracing::debug!("No chunk store configured");
            return Ok(Self::Null(NullChunkStore));
        };
        if !path.exists() {
            tracing::warn!(
                "Chunk store {} not found, chunk checks disabled",
                path.display()
            );
            return Ok(Self::Null(NullChunkStore));
        }
        if path.extension().is_some_and(|ext| ext == "jsonl") {
            Ok(Self::Memory(MemoryChunkStore::load_jsonl(path)?))
        } else {
            Ok(Self::Sqlite(SqliteChunkStore::open(path)?))
        }
    }

    /// Short name of the active adapter
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite",
            Self::Memory(_) => "memory",
            Self::Null(_) => "none",
        }
    }
}

impl From<MemoryChunkStore> for ChunkBackend {
    fn from(store: MemoryChunkStore) -> Self {
        Self::Memory(store)
    }
}

impl ChunkStore for ChunkBackend {
    type Error = StoreError;

    fn is_available(&self) -> bool {
        match self {
            Self::Sqlite(s) => s.is_available(),
            Self::Memory(s) => s.is_available(),
            Self::Null(s) => s.is_available(),
        }
    }

    fn resolve(&self, chunk_id: &str) -> Result<Option<Chunk>, Self::Error> {
        match self {
            Self::Sqlite(s) => s.resolve(chunk_id),
            Self::Memory(s) => s.resolve(chunk_id),
            Self::Null(s) => s.resolve(chunk_id),
        }
    }

    fn list_all(&self) -> Result<Vec<ChunkMetadata>, Self::Error> {
        match self {
            Self::Sqlite(s) => s.list_all(),
            Self::Memory(s) => s.list_all(),
            Self::Null(s) => s.list_all(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, path: &str) -> Chunk {
        Chunk {
            metadata: ChunkMetadata::new(id, path)
                .with_pages(3, 5)
                .with_citation(Some("Ada Lovelace"), Some("Notes")),
            text: format!("text of {}", id),
        }
    }

    #[test]
    fn test_sqlite_resolve_and_list() {
        let store = SqliteChunkStore::create(":memory:").unwrap();
        store.insert_chunk(&chunk("c2", "b.pdf")).unwrap();
        store.insert_chunk(&chunk("c1", "a.pdf")).unwrap();

        let resolved = store.resolve("c1").unwrap().unwrap();
        assert_eq!(resolved.metadata.path, "a.pdf");
        assert_eq!(resolved.metadata.page_start, Some(3));
        assert_eq!(resolved.metadata.author.as_deref(), Some("Ada Lovelace"));
        assert!(store.resolve("missing").unwrap().is_none());

        let ids: Vec<_> = store.list_all().unwrap().into_iter().map(|m| m.chunk_id).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[test]
    fn test_memory_store() {
        let mut store: MemoryChunkStore = vec![chunk("c1", "a.pdf")].into_iter().collect();
        assert!(store.is_available());
        assert!(store.resolve("c1").unwrap().is_some());
        store.remove("c1");
        assert!(store.resolve("c1").unwrap().is_none());
    }

    #[test]
    fn test_null_store_unavailable() {
        let store = NullChunkStore;
        assert!(!store.is_available());
        assert!(store.list_all().unwrap().is_empty());
    }

    #[test]
    fn test_backend_falls_back_to_null() {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::StoreConfig {
            chunk_store: Some("missing.db".into()),
            ..Default::default()
        };
        let layout = StoreLayout::from_config(dir.path(), &config);
        let backend = ChunkBackend::from_layout(&layout).unwrap();
        assert_eq!(backend.kind(), "none");
        assert!(!backend.is_available());
    }

    #[test]
    fn test_backend_loads_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let line = serde_json::to_string(&chunk("c9", "z.pdf")).unwrap();
        std::fs::write(dir.path().join("chunks.jsonl"), format!("{}\n", line)).unwrap();
        let config = crate::StoreConfig {
            chunk_store: Some("chunks.jsonl".into()),
            ..Default::default()
        };
        let backend = ChunkBackend::from_layout(&StoreLayout::from_config(dir.path(), &config)).unwrap();
        assert_eq!(backend.kind(), "memory");
        assert_eq!(backend.resolve("c9").unwrap().unwrap().metadata.path, "z.pdf");
    }
}
