//! Chunk module - externally owned spans of source documents

use crate::knowledge::PageRange;
use serde::{Deserialize, Serialize};

/// Metadata describing a chunk, as reported by the chunk store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Stable chunk identifier
    pub chunk_id: String,

    /// Document path relative to the corpus documents directory
    #[serde(default)]
    pub path: String,

    /// First page covered by the chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_start: Option<u32>,

    /// Last page covered by the chunk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_end: Option<u32>,

    /// Document author, if the store knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    /// Document title, if the store knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl ChunkMetadata {
    /// Create metadata for a chunk of a document
    pub fn new(chunk_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            path: path.into(),
            page_start: None,
            page_end: None,
            author: None,
            title: None,
        }
    }

    /// Attach page bounds
    pub fn with_pages(mut self, start: u32, end: u32) -> Self {
        let range = PageRange::new(start, end);
        self.page_start = Some(range.start);
        self.page_end = Some(range.end);
        self
    }

    /// Attach bibliographic metadata
    pub fn with_citation(mut self, author: Option<&str>, title: Option<&str>) -> Self {
        self.author = author.map(str::to_string);
        self.title = title.map(str::to_string);
        self
    }

    /// Page bounds, when both ends are known
    pub fn page_range(&self) -> Option<PageRange> {
        match (self.page_start, self.page_end) {
            (Some(start), Some(end)) => Some(PageRange::new(start, end)),
            (Some(page), None) | (None, Some(page)) => Some(PageRange::single(page)),
            (None, None) => None,
        }
    }
}

/// A resolved chunk: metadata plus its text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk metadata
    #[serde(flatten)]
    pub metadata: ChunkMetadata,

    /// Chunk text
    #[serde(default)]
    pub text: String,
}

impl Chunk {
    /// The chunk's id
    pub fn id(&self) -> &str {
        &self.metadata.chunk_id
    }
}
