//! Per-document change detection and processing state

use crate::changelog::{ChangeKind, Impact, NewChange};
use crate::incremental::ProcessingMode;
use crate::snapshot::{write_json_atomic, VersionManager};
use crate::GrowthError;
use chrono::{DateTime, Utc};
use scriptorium_store::{scan_documents, StoreLayout};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Where a document stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    /// Never seen in the reference state
    New,
    /// Content differs from the reference state
    Modified,
    /// Content matches the reference state
    Unchanged,
    /// Selected for processing, not finished
    Pending,
    /// Extraction finished
    Processed,
    /// Extraction failed or timed out
    Failed,
    /// No longer on disk
    Deleted,
}

impl DocumentStatus {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::New => "new",
            DocumentStatus::Modified => "modified",
            DocumentStatus::Unchanged => "unchanged",
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processed => "processed",
            DocumentStatus::Failed => "failed",
            DocumentStatus::Deleted => "deleted",
        }
    }

    fn awaits_processing(&self) -> bool {
        matches!(self, DocumentStatus::Pending | DocumentStatus::Failed)
    }
}

/// Tracker state for one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedDocument {
    /// Corpus-relative path; the map key on disk
    #[serde(skip)]
    pub path: String,
    /// Current status
    pub status: DocumentStatus,
    /// Hash seen at the last detection pass
    #[serde(default)]
    pub current_hash: Option<String>,
    /// Hash at the last snapshot or successful processing
    #[serde(default)]
    pub snapshot_hash: Option<String>,
    /// File modification time at the last detection pass
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    /// When extraction last succeeded
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    /// Last failure message
    #[serde(default)]
    pub error: Option<String>,
}

impl TrackedDocument {
    fn new(path: &str, status: DocumentStatus) -> Self {
        Self {
            path: path.to_string(),
            status,
            current_hash: None,
            snapshot_hash: None,
            modified_at: None,
            processed_at: None,
            error: None,
        }
    }
}

/// Classification of every document against a reference state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// On disk, not in the reference
    pub new: Vec<String>,
    /// On disk with a different hash
    pub modified: Vec<String>,
    /// On disk with the same hash
    pub unchanged: Vec<String>,
    /// In the reference, gone from disk
    pub deleted: Vec<String>,
}

impl ChangeSet {
    /// Whether anything differs from the reference
    pub fn has_changes(&self) -> bool {
        !(self.new.is_empty() && self.modified.is_empty() && self.deleted.is_empty())
    }

    /// Number of changed documents
    pub fn changed(&self) -> usize {
        self.new.len() + self.modified.len() + self.deleted.len()
    }

    /// Write one changelog entry per changed document
    pub fn record(&self, manager: &VersionManager) -> Result<(), GrowthError> {
        let groups = [
            (&self.new, ChangeKind::DocumentAdded, "Document added", Impact::Medium),
            (&self.modified, ChangeKind::DocumentModified, "Document modified", Impact::Medium),
            (&self.deleted, ChangeKind::DocumentRemoved, "Document removed", Impact::High),
        ];
        for (paths, kind, text, impact) in groups {
            for path in paths {
                manager.record(NewChange::new(kind, "document", path, text).impact(impact))?;
            }
        }
        Ok(())
    }
}

/// Persistent `path -> state` map (`tracking.json`)
pub struct DocumentTracker {
    state_path: PathBuf,
    documents_dir: PathBuf,
    workers: usize,
    documents: BTreeMap<String, TrackedDocument>,
}

impl DocumentTracker {
    /// Load tracker state for a corpus; a missing file starts empty
    pub fn load(layout: &StoreLayout) -> Result<Self, GrowthError> {
        let state_path = layout.tracking_path();
        let mut documents: BTreeMap<String, TrackedDocument> = if state_path.exists() {
            serde_json::from_str(&fs::read_to_string(&state_path)?)?
        } else {
            BTreeMap::new()
        };
        for (path, doc) in documents.iter_mut() {
            doc.path = path.clone();
        }
        Ok(Self {
            state_path,
            documents_dir: layout.documents_dir().to_path_buf(),
            workers: layout.hash_workers(),
            documents,
        })
    }

    /// Persist to disk
    pub fn save(&self) -> Result<(), GrowthError> {
        write_json_atomic(&self.state_path, &self.documents)
    }

    /// State file location
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Tracked documents by path
    pub fn documents(&self) -> &BTreeMap<String, TrackedDocument> {
        &self.documents
    }

    /// One tracked document
    pub fn get(&self, path: &str) -> Option<&TrackedDocument> {
        self.documents.get(path)
    }

    /// Count per status
    pub fn status_counts(&self) -> BTreeMap<DocumentStatus, usize> {
        let mut counts = BTreeMap::new();
        for doc in self.documents.values() {
            *counts.entry(doc.status).or_insert(0) += 1;
        }
        counts
    }

    /// The tracker's own reference: hashes at the last snapshot or processing
    fn own_reference(&self) -> BTreeMap<String, String> {
        self.documents
            .iter()
            .filter(|(_, doc)| doc.status != DocumentStatus::Deleted)
            .filter_map(|(path, doc)| Some((path.clone(), doc.snapshot_hash.clone()?)))
            .collect()
    }

    fn classify(
        &self,
        reference: Option<&BTreeMap<String, String>>,
    ) -> Result<(ChangeSet, BTreeMap<String, scriptorium_store::DocumentInfo>), GrowthError> {
        let current = scan_documents(&self.documents_dir, self.workers)?;
        let own;
        let reference = match reference {
            Some(r) => r,
            None => {
                own = self.own_reference();
                &own
            }
        };

        let mut changes = ChangeSet::default();
        for (path, info) in &current {
            match reference.get(path) {
                None => changes.new.push(path.clone()),
                Some(hash) if *hash != info.hash => changes.modified.push(path.clone()),
                Some(_) => changes.unchanged.push(path.clone()),
            }
        }
        let tracked_live = self
            .documents
            .iter()
            .filter(|(_, doc)| doc.status != DocumentStatus::Deleted)
            .map(|(path, _)| path);
        let mut deleted: Vec<String> = reference
            .keys()
            .chain(tracked_live)
            .filter(|path| !current.contains_key(*path))
            .cloned()
            .collect();
        deleted.sort();
        deleted.dedup();
        changes.deleted = deleted;
        Ok((changes, current))
    }

    /// Classify documents without touching persisted state
    pub fn preview_changes(&self, reference: Option<&BTreeMap<String, String>>) -> Result<ChangeSet, GrowthError> {
        Ok(self.classify(reference)?.0)
    }

    /// Rescan, classify against `reference` (or the tracker's own state), and persist
    ///
    /// Documents already pending or failed stay that way while their content
    /// is unchanged, so an interrupted run resumes where it stopped.
    pub fn detect_changes(&mut self, reference: Option<&BTreeMap<String, String>>) -> Result<ChangeSet, GrowthError> {
        let changes = self.refresh(reference)?;
        self.save()?;
        tracing::info!(
            "Detected {} new, {} modified, {} deleted, {} unchanged",
            changes.new.len(),
            changes.modified.len(),
            changes.deleted.len(),
            changes.unchanged.len()
        );
        Ok(changes)
    }

    /// Same classification as `detect_changes`, applied in memory only
    pub fn refresh(&mut self, reference: Option<&BTreeMap<String, String>>) -> Result<ChangeSet, GrowthError> {
        let (changes, current) = self.classify(reference)?;

        for (path, info) in &current {
            let status = if changes.new.contains(path) {
                DocumentStatus::New
            } else if changes.modified.contains(path) {
                DocumentStatus::Modified
            } else {
                DocumentStatus::Unchanged
            };
            let doc = self
                .documents
                .entry(path.clone())
                .or_insert_with(|| TrackedDocument::new(path, status));
            let same_content = doc.current_hash.as_deref() == Some(info.hash.as_str());
            doc.status = match status {
                DocumentStatus::Unchanged if doc.status == DocumentStatus::Processed => DocumentStatus::Processed,
                DocumentStatus::New | DocumentStatus::Modified if same_content && doc.status.awaits_processing() => {
                    doc.status
                }
                other => other,
            };
            if let Some(hash) = reference.and_then(|r| r.get(path)) {
                doc.snapshot_hash = Some(hash.clone());
            }
            doc.current_hash = Some(info.hash.clone());
            doc.modified_at = info.modified_at;
        }
        for path in &changes.deleted {
            let doc = self
                .documents
                .entry(path.clone())
                .or_insert_with(|| TrackedDocument::new(path, DocumentStatus::Deleted));
            doc.status = DocumentStatus::Deleted;
            doc.current_hash = None;
        }
        Ok(changes)
    }

    /// Documents a processing mode would pick, in path order
    pub fn select(&self, mode: ProcessingMode) -> Vec<String> {
        self.documents
            .values()
            .filter(|doc| match mode {
                ProcessingMode::NewOnly => doc.status == DocumentStatus::New,
                ProcessingMode::ModifiedOnly => doc.status == DocumentStatus::Modified,
                ProcessingMode::AllChanged => matches!(
                    doc.status,
                    DocumentStatus::New | DocumentStatus::Modified | DocumentStatus::Pending
                ),
                ProcessingMode::ForceAll => doc.status != DocumentStatus::Deleted,
            })
            .map(|doc| doc.path.clone())
            .collect()
    }

    /// Documents currently pending
    pub fn pending(&self) -> Vec<String> {
        self.with_status(DocumentStatus::Pending)
    }

    /// Documents with a given status
    pub fn with_status(&self, status: DocumentStatus) -> Vec<String> {
        self.documents
            .values()
            .filter(|doc| doc.status == status)
            .map(|doc| doc.path.clone())
            .collect()
    }

    /// Mark documents as selected for processing
    pub fn mark_pending(&mut self, paths: &[String]) {
        for path in paths {
            if let Some(doc) = self.documents.get_mut(path) {
                doc.status = DocumentStatus::Pending;
            }
        }
    }

    /// Record a successful run; the current hash becomes the reference
    pub fn mark_processed(&mut self, path: &str) {
        if let Some(doc) = self.documents.get_mut(path) {
            doc.status = DocumentStatus::Processed;
            doc.processed_at = Some(Utc::now());
            doc.snapshot_hash = doc.current_hash.clone();
            doc.error = None;
        }
    }

    /// Record a failure
    pub fn mark_failed(&mut self, path: &str, error: impl Into<String>) {
        if let Some(doc) = self.documents.get_mut(path) {
            doc.status = DocumentStatus::Failed;
            doc.error = Some(error.into());
        }
    }

    /// Move every failed document back to pending and return them
    pub fn reset_failed(&mut self) -> Vec<String> {
        let failed = self.with_status(DocumentStatus::Failed);
        self.mark_pending(&failed);
        failed
    }

    /// Adopt a snapshot's hashes as the reference for future passes
    pub fn set_snapshot_hashes(&mut self, hashes: &BTreeMap<String, String>) {
        for (path, hash) in hashes {
            self.documents
                .entry(path.clone())
                .or_insert_with(|| TrackedDocument::new(path, DocumentStatus::Unchanged))
                .snapshot_hash = Some(hash.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptorium_domain::sha256_hex;
    use tempfile::tempdir;

    fn corpus(files: &[(&str, &str)]) -> (tempfile::TempDir, StoreLayout) {
        let dir = tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.ensure_dirs().unwrap();
        for (name, body) in files {
            fs::write(layout.document_path(name), body).unwrap();
        }
        (dir, layout)
    }

    #[test]
    fn test_classifies_against_reference() {
        let (_dir, layout) = corpus(&[("a.pdf", "a"), ("b.pdf", "b2"), ("c.pdf", "c")]);
        let reference = BTreeMap::from([
            ("a.pdf".to_string(), sha256_hex(b"a")),
            ("b.pdf".to_string(), sha256_hex(b"b")),
            ("gone.pdf".to_string(), sha256_hex(b"gone")),
        ]);
        let mut tracker = DocumentTracker::load(&layout).unwrap();
        let changes = tracker.detect_changes(Some(&reference)).unwrap();

        assert_eq!(changes.new, vec!["c.pdf"]);
        assert_eq!(changes.modified, vec!["b.pdf"]);
        assert_eq!(changes.unchanged, vec!["a.pdf"]);
        assert_eq!(changes.deleted, vec!["gone.pdf"]);
        assert_eq!(tracker.get("gone.pdf").unwrap().status, DocumentStatus::Deleted);
    }

    #[test]
    fn test_state_survives_reload() {
        let (_dir, layout) = corpus(&[("a.pdf", "a")]);
        let mut tracker = DocumentTracker::load(&layout).unwrap();
        tracker.detect_changes(None).unwrap();
        tracker.mark_processed("a.pdf");
        tracker.save().unwrap();

        let mut reloaded = DocumentTracker::load(&layout).unwrap();
        assert_eq!(reloaded.get("a.pdf").unwrap().path, "a.pdf");
        let changes = reloaded.detect_changes(None).unwrap();
        assert_eq!(changes.unchanged, vec!["a.pdf"]);
        assert_eq!(reloaded.get("a.pdf").unwrap().status, DocumentStatus::Processed);
    }

    #[test]
    fn test_pending_survives_redetection() {
        let (_dir, layout) = corpus(&[("a.pdf", "a"), ("b.pdf", "b")]);
        let mut tracker = DocumentTracker::load(&layout).unwrap();
        tracker.detect_changes(None).unwrap();
        tracker.mark_pending(&["a.pdf".to_string()]);
        tracker.mark_failed("b.pdf", "timeout");

        tracker.detect_changes(None).unwrap();
        assert_eq!(tracker.get("a.pdf").unwrap().status, DocumentStatus::Pending);
        assert_eq!(tracker.get("b.pdf").unwrap().status, DocumentStatus::Failed);
        assert_eq!(tracker.reset_failed(), vec!["b.pdf"]);
        assert_eq!(tracker.pending(), vec!["a.pdf", "b.pdf"]);
    }

    #[test]
    fn test_select_by_mode() {
        let (_dir, layout) = corpus(&[("a.pdf", "a"), ("b.pdf", "b2")]);
        let reference = BTreeMap::from([("b.pdf".to_string(), sha256_hex(b"b"))]);
        let mut tracker = DocumentTracker::load(&layout).unwrap();
        tracker.detect_changes(Some(&reference)).unwrap();

        assert_eq!(tracker.select(ProcessingMode::NewOnly), vec!["a.pdf"]);
        assert_eq!(tracker.select(ProcessingMode::ModifiedOnly), vec!["b.pdf"]);
        assert_eq!(tracker.select(ProcessingMode::AllChanged).len(), 2);
        tracker.mark_processed("a.pdf");
        assert_eq!(tracker.select(ProcessingMode::AllChanged), vec!["b.pdf"]);
        assert_eq!(tracker.select(ProcessingMode::ForceAll).len(), 2);
    }

    #[test]
    fn test_preview_does_not_persist() {
        let (_dir, layout) = corpus(&[("a.pdf", "a")]);
        let tracker = DocumentTracker::load(&layout).unwrap();
        let changes = tracker.preview_changes(None).unwrap();
        assert_eq!(changes.new, vec!["a.pdf"]);
        assert!(!tracker.state_path().exists());
    }
}
