//! Corpus file layout
//!
//! A `StoreLayout` is the explicit handle every component receives at
//! construction. It carries the corpus root and every file location; nothing
//! in the workspace reads paths from process-wide state.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory holding the system's own state under the corpus root
pub const STATE_DIR: &str = ".scriptorium";

/// File locations, relative to the corpus root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Knowledge log
    #[serde(default = "default_knowledge_log")]
    pub knowledge_log: String,

    /// Reasoning log
    #[serde(default = "default_reasoning_log")]
    pub reasoning_log: String,

    /// Source documents directory
    #[serde(default = "default_documents_dir")]
    pub documents_dir: String,

    /// External chunk store: a SQLite database or a JSONL export
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_store: Option<String>,

    /// Worker threads used to hash documents
    #[serde(default = "default_hash_workers")]
    pub hash_workers: usize,
}

fn default_knowledge_log() -> String {
    "knowledge.jsonl".to_string()
}

fn default_reasoning_log() -> String {
    "reasoning.jsonl".to_string()
}

fn default_documents_dir() -> String {
    "documents".to_string()
}

fn default_hash_workers() -> usize {
    4
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            knowledge_log: default_knowledge_log(),
            reasoning_log: default_reasoning_log(),
            documents_dir: default_documents_dir(),
            chunk_store: None,
            hash_workers: default_hash_workers(),
        }
    }
}

/// Resolved file locations for one corpus
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
    knowledge_log: PathBuf,
    reasoning_log: PathBuf,
    documents_dir: PathBuf,
    chunk_store: Option<PathBuf>,
    hash_workers: usize,
}

impl StoreLayout {
    /// Layout with default file names under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::from_config(root, &StoreConfig::default())
    }

    /// Layout from configuration; relative paths resolve against `root`
    pub fn from_config(root: impl Into<PathBuf>, config: &StoreConfig) -> Self {
        let root = root.into();
        let resolve = |p: &str| {
            let path = Path::new(p);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                root.join(path)
            }
        };
        Self {
            knowledge_log: resolve(&config.knowledge_log),
            reasoning_log: resolve(&config.reasoning_log),
            documents_dir: resolve(&config.documents_dir),
            chunk_store: config.chunk_store.as_deref().map(resolve),
            hash_workers: config.hash_workers.max(1),
            root,
        }
    }

    /// Corpus root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Knowledge log path
    pub fn knowledge_log(&self) -> &Path {
        &self.knowledge_log
    }

    /// Reasoning log path
    pub fn reasoning_log(&self) -> &Path {
        &self.reasoning_log
    }

    /// Index file, stored beside the knowledge log
    pub fn index_path(&self) -> PathBuf {
        self.knowledge_log.with_extension("idx.json")
    }

    /// Source documents directory
    pub fn documents_dir(&self) -> &Path {
        &self.documents_dir
    }

    /// Absolute path of a document given its corpus-relative path
    pub fn document_path(&self, relative: &str) -> PathBuf {
        self.documents_dir.join(relative)
    }

    /// Configured external chunk store, if any
    pub fn chunk_store(&self) -> Option<&Path> {
        self.chunk_store.as_deref()
    }

    /// Worker threads for document hashing
    pub fn hash_workers(&self) -> usize {
        self.hash_workers
    }

    /// The system's private state directory
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    /// Snapshot records and backups
    pub fn snapshots_dir(&self) -> PathBuf {
        self.state_dir().join("snapshots")
    }

    /// Current version pointer
    pub fn version_file(&self) -> PathBuf {
        self.state_dir().join("version.json")
    }

    /// Changelog
    pub fn changelog_path(&self) -> PathBuf {
        self.state_dir().join("changelog.jsonl")
    }

    /// Document tracker state
    pub fn tracking_path(&self) -> PathBuf {
        self.state_dir().join("tracking.json")
    }

    /// Open merge conflicts
    pub fn conflicts_path(&self) -> PathBuf {
        self.state_dir().join("conflicts.json")
    }

    /// Calibration state
    pub fn calibration_path(&self) -> PathBuf {
        self.state_dir().join("calibration.json")
    }

    /// The files a snapshot backs up and a rollback restores, with their
    /// file names inside a backup directory
    pub fn mutable_files(&self) -> [(&'static str, &Path); 2] {
        [
            ("knowledge.jsonl", self.knowledge_log.as_path()),
            ("reasoning.jsonl", self.reasoning_log.as_path()),
        ]
    }

    /// Create the root, documents and state directories
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(&self.documents_dir)?;
        std::fs::create_dir_all(self.snapshots_dir())?;
        Ok(())
    }
}
