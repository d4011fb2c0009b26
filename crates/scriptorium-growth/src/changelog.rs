//! Append-only trail of every mutating action

use crate::GrowthError;
use chrono::{DateTime, Utc};
use scriptorium_domain::CorpusVersion;
use scriptorium_store::read_jsonl;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

/// Kind of recorded change
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeKind {
    /// A source document was added
    DocumentAdded,
    /// A source document disappeared
    DocumentRemoved,
    /// A source document's content changed
    DocumentModified,
    /// A document went through the extraction pipeline
    Reprocessed,
    /// A snapshot was taken
    SnapshotCreated,
    /// The corpus was rolled back to a snapshot
    Rollback,
    /// A calibration rule was applied
    Calibration,
    /// KUs were merged into the store
    Merge,
    /// Dangling references were stripped
    Repair,
}

impl ChangeKind {
    /// Kebab-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::DocumentAdded => "document-added",
            ChangeKind::DocumentRemoved => "document-removed",
            ChangeKind::DocumentModified => "document-modified",
            ChangeKind::Reprocessed => "reprocessed",
            ChangeKind::SnapshotCreated => "snapshot-created",
            ChangeKind::Rollback => "rollback",
            ChangeKind::Calibration => "calibration",
            ChangeKind::Merge => "merge",
            ChangeKind::Repair => "repair",
        }
    }
}

impl FromStr for ChangeKind {
    type Err = GrowthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_lowercase()))
            .map_err(|_| GrowthError::Invalid(format!("unknown change kind '{}'", s)))
    }
}

/// How much a change affects the corpus
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    /// Bookkeeping only
    Low,
    /// Changes derived knowledge
    Medium,
    /// Replaces or removes knowledge
    High,
}

/// One changelog row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEntry {
    /// `CHG-000001`, increasing across the log
    pub change_id: String,
    /// Change kind
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    /// When it happened
    pub timestamp: DateTime<Utc>,
    /// Corpus version at the time
    pub version: String,
    /// What sort of entity changed (document, snapshot, ku, ...)
    pub entity_type: String,
    /// Which entity changed
    pub entity_id: String,
    /// Human-readable description
    pub description: String,
    /// Impact level
    pub impact: Impact,
    /// Whether a snapshot can undo it
    pub reversible: bool,
}

/// A change about to be recorded
#[derive(Debug, Clone)]
pub struct NewChange {
    kind: ChangeKind,
    entity_type: String,
    entity_id: String,
    description: String,
    impact: Impact,
    reversible: bool,
}

impl NewChange {
    /// Describe a change; impact defaults to low, reversible to true
    pub fn new(
        kind: ChangeKind,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            description: description.into(),
            impact: Impact::Low,
            reversible: true,
        }
    }

    /// Set the impact level
    pub fn impact(mut self, impact: Impact) -> Self {
        self.impact = impact;
        self
    }

    /// Set whether the change can be undone
    pub fn reversible(mut self, reversible: bool) -> Self {
        self.reversible = reversible;
        self
    }
}

/// Filter for changelog queries; empty fields match everything
#[derive(Debug, Clone, Default)]
pub struct ChangeQuery {
    /// Accepted kinds
    pub kinds: Vec<ChangeKind>,
    /// Entity type
    pub entity_type: Option<String>,
    /// Entity id
    pub entity_id: Option<String>,
    /// Inclusive lower bound
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    pub until: Option<DateTime<Utc>>,
    /// Keep only the most recent `limit` matches
    pub limit: Option<usize>,
}

impl ChangeQuery {
    fn matches(&self, entry: &ChangeEntry) -> bool {
        (self.kinds.is_empty() || self.kinds.contains(&entry.kind))
            && self.entity_type.as_ref().is_none_or(|t| *t == entry.entity_type)
            && self.entity_id.as_ref().is_none_or(|id| *id == entry.entity_id)
            && self.since.is_none_or(|since| entry.timestamp >= since)
            && self.until.is_none_or(|until| entry.timestamp <= until)
    }
}

/// The changelog file
pub struct Changelog {
    path: PathBuf,
    next_id: Mutex<Option<u64>>,
}

impl Changelog {
    /// Changelog stored at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            next_id: Mutex::new(None),
        }
    }

    /// File location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry, stamping id, time and version
    pub fn record(&self, change: NewChange, version: &CorpusVersion) -> Result<ChangeEntry, GrowthError> {
        let mut next = self
            .next_id
            .lock()
            .map_err(|_| GrowthError::Invalid("changelog lock poisoned".into()))?;
        let id = match *next {
            Some(id) => id,
            None => self.max_id()? + 1,
        };

        let entry = ChangeEntry {
            change_id: format!("CHG-{:06}", id),
            kind: change.kind,
            timestamp: Utc::now(),
            version: version.to_string(),
            entity_type: change.entity_type,
            entity_id: change.entity_id,
            description: change.description,
            impact: change.impact,
            reversible: change.reversible,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        *next = Some(id + 1);

        tracing::debug!("Recorded {} {} {}", entry.change_id, entry.kind.as_str(), entry.entity_id);
        Ok(entry)
    }

    fn max_id(&self) -> Result<u64, GrowthError> {
        Ok(self
            .entries()?
            .iter()
            .filter_map(|e| e.change_id.strip_prefix("CHG-")?.parse::<u64>().ok())
            .max()
            .unwrap_or(0))
    }

    /// Every entry, oldest first; malformed lines are skipped
    pub fn entries(&self) -> Result<Vec<ChangeEntry>, GrowthError> {
        Ok(read_jsonl::<ChangeEntry>(&self.path)?
            .records
            .into_iter()
            .map(|l| l.record)
            .collect())
    }

    /// Entries matching `query`, oldest first
    pub fn query(&self, query: &ChangeQuery) -> Result<Vec<ChangeEntry>, GrowthError> {
        let mut matched: Vec<ChangeEntry> = self.entries()?.into_iter().filter(|e| query.matches(e)).collect();
        if let Some(limit) = query.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        Ok(matched)
    }
}

/// Render entries as a Markdown table
pub fn export_markdown(entries: &[ChangeEntry]) -> String {
    let mut out = String::from("# Changelog\n\n");
    out.push_str("| ID | Date | Version | Type | Entity | Impact | Description |\n");
    out.push_str("|----|------|---------|------|--------|--------|-------------|\n");
    for e in entries {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {}:{} | {:?} | {} |",
            e.change_id,
            e.timestamp.format("%Y-%m-%d %H:%M:%S"),
            e.version,
            e.kind.as_str(),
            e.entity_type,
            e.entity_id,
            e.impact,
            e.description.replace('|', "\\|")
        );
    }
    out
}

/// Render entries as pretty JSON
pub fn export_json(entries: &[ChangeEntry]) -> Result<String, GrowthError> {
    Ok(serde_json::to_string_pretty(entries)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_ids_increase_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("changelog.jsonl");
        let v = CorpusVersion::default();
        {
            let log = Changelog::new(&path);
            let a = log.record(NewChange::new(ChangeKind::DocumentAdded, "document", "a.pdf", "added"), &v).unwrap();
            assert_eq!(a.change_id, "CHG-000001");
            log.record(NewChange::new(ChangeKind::DocumentAdded, "document", "b.pdf", "added"), &v).unwrap();
        }
        let log = Changelog::new(&path);
        let c = log.record(NewChange::new(ChangeKind::Rollback, "snapshot", "s", "x"), &v).unwrap();
        assert_eq!(c.change_id, "CHG-000003");
    }

    #[test]
    fn test_query_filters_and_limit() {
        let dir = tempdir().unwrap();
        let log = Changelog::new(dir.path().join("changelog.jsonl"));
        let v = CorpusVersion::new(1, 0, 0);
        for name in ["a", "b", "c"] {
            log.record(NewChange::new(ChangeKind::DocumentAdded, "document", name, "added"), &v).unwrap();
        }
        log.record(
            NewChange::new(ChangeKind::SnapshotCreated, "snapshot", "s1", "snap").impact(Impact::Medium),
            &v,
        )
        .unwrap();

        let added = log
            .query(&ChangeQuery {
                kinds: vec![ChangeKind::DocumentAdded],
                limit: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(added.len(), 2);
        assert_eq!(added[1].entity_id, "c");

        let by_entity = log
            .query(&ChangeQuery {
                entity_id: Some("s1".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_entity[0].impact, Impact::Medium);
    }

    #[test]
    fn test_export_formats() {
        let dir = tempdir().unwrap();
        let log = Changelog::new(dir.path().join("changelog.jsonl"));
        log.record(
            NewChange::new(ChangeKind::Reprocessed, "document", "a.pdf", "stage a | b"),
            &CorpusVersion::new(0, 1, 0),
        )
        .unwrap();
        let entries = log.entries().unwrap();
        let md = export_markdown(&entries);
        assert!(md.contains("| CHG-000001 |"));
        assert!(md.contains("stage a \\| b"));
        let json = export_json(&entries).unwrap();
        assert!(json.contains("\"type\": \"reprocessed\""));
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("snapshot-created".parse::<ChangeKind>().unwrap(), ChangeKind::SnapshotCreated);
        assert!("bogus".parse::<ChangeKind>().is_err());
    }
}
