//! A read-only, in-memory view of one corpus

use crate::AuditError;
use scriptorium_domain::{ChunkMetadata, ChunkStore, KnowledgeUnit, ReasoningUnit};
use scriptorium_store::{list_documents, KnowledgeStore, StoreError, StoreLayout};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

/// Everything the auditors read, loaded once
///
/// Chunk metadata is `None` when no chunk store is available; chunk-level
/// checks are then skipped instead of flagging every reference.
#[derive(Debug, Clone, Default)]
pub struct CorpusView {
    /// Knowledge Units in log order
    pub kus: Vec<KnowledgeUnit>,
    /// Reasoning Units in log order
    pub rus: Vec<ReasoningUnit>,
    /// Chunk metadata keyed by chunk id
    pub chunks: Option<BTreeMap<String, ChunkMetadata>>,
    /// Relative paths of the source documents on disk
    pub documents: BTreeSet<String>,
    /// Directory the document paths are relative to
    pub documents_dir: PathBuf,
    /// Log lines skipped while loading
    pub skipped_lines: usize,
    ku_positions: HashMap<String, usize>,
    ru_positions: HashMap<String, usize>,
}

/// Position of the first record with each id
fn positions<'a>(ids: impl Iterator<Item = &'a str>) -> HashMap<String, usize> {
    let mut map = HashMap::new();
    for (i, id) in ids.enumerate() {
        map.entry(id.to_string()).or_insert(i);
    }
    map
}

impl CorpusView {
    /// Load the logs, the chunk metadata and the document listing
    pub fn load<C>(store: &KnowledgeStore, chunks: &C) -> Result<Self, AuditError>
    where
        C: ChunkStore<Error = StoreError>,
    {
        let knowledge = store.load_knowledge()?;
        let reasoning = store.load_reasoning()?;
        let layout: &StoreLayout = store.layout();

        let chunks = if chunks.is_available() {
            Some(
                chunks
                    .list_all()?
                    .into_iter()
                    .map(|c| (c.chunk_id.clone(), c))
                    .collect(),
            )
        } else {
            tracing::warn!("Chunk store unavailable, chunk-level checks skipped");
            None
        };

        let mut view = Self::from_parts(
            knowledge.records,
            reasoning.records,
            None,
            list_documents(layout.documents_dir())?,
            layout.documents_dir(),
        );
        view.chunks = chunks;
        view.skipped_lines = knowledge.errors.len() + reasoning.errors.len();
        tracing::debug!(
            "Loaded view: {} KUs, {} RUs, {} documents",
            view.kus.len(),
            view.rus.len(),
            view.documents.len()
        );
        Ok(view)
    }

    /// Build a view from parts already in memory
    pub fn from_parts(
        kus: Vec<KnowledgeUnit>,
        rus: Vec<ReasoningUnit>,
        chunks: Option<Vec<ChunkMetadata>>,
        documents: impl IntoIterator<Item = String>,
        documents_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ku_positions: positions(kus.iter().map(|k| k.id.as_str())),
            ru_positions: positions(rus.iter().map(|r| r.id.as_str())),
            kus,
            rus,
            chunks: chunks.map(|list| list.into_iter().map(|c| (c.chunk_id.clone(), c)).collect()),
            documents: documents.into_iter().collect(),
            documents_dir: documents_dir.into(),
            skipped_lines: 0,
        }
    }

    /// Whether chunk metadata was loaded
    pub fn chunks_available(&self) -> bool {
        self.chunks.is_some()
    }

    /// Metadata for one chunk
    pub fn chunk(&self, chunk_id: &str) -> Option<&ChunkMetadata> {
        self.chunks.as_ref().and_then(|c| c.get(chunk_id))
    }

    /// Find a KU by id
    ///
    /// Uses the position index built at construction; falls back to a scan
    /// when `kus` was edited since.
    pub fn ku(&self, id: &str) -> Option<&KnowledgeUnit> {
        self.ku_positions
            .get(id)
            .and_then(|&i| self.kus.get(i))
            .filter(|k| k.id == id)
            .or_else(|| self.kus.iter().find(|k| k.id == id))
    }

    /// Find an RU by id, as `ku` does
    pub fn ru(&self, id: &str) -> Option<&ReasoningUnit> {
        self.ru_positions
            .get(id)
            .and_then(|&i| self.rus.get(i))
            .filter(|r| r.id == id)
            .or_else(|| self.rus.iter().find(|r| r.id == id))
    }

    /// Set of every KU id
    pub fn ku_ids(&self) -> BTreeSet<&str> {
        self.kus.iter().map(|k| k.id.as_str()).collect()
    }

    /// Whether a document path cited by a source exists on disk
    pub fn has_document(&self, cited: &str) -> bool {
        self.documents.contains(normalize_document_path(cited))
    }

    /// Absolute path of a cited document
    pub fn document_path(&self, cited: &str) -> PathBuf {
        self.documents_dir.join(normalize_document_path(cited))
    }
}

/// Strip a leading `./` or `documents/` from a cited path
pub fn normalize_document_path(path: &str) -> &str {
    let path = path.strip_prefix("./").unwrap_or(path);
    path.strip_prefix("documents/").unwrap_or(path)
}
