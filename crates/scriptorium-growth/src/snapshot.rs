//! Content-hash snapshots, rollback and diff
//!
//! Snapshot records are written once and never edited. The only files a
//! rollback touches are the mutable logs named by `StoreLayout::mutable_files`,
//! and a rollback always snapshots them first.

use crate::changelog::{ChangeKind, Changelog, Impact, NewChange};
use crate::GrowthError;
use chrono::{DateTime, Utc};
use scriptorium_domain::{BackupProvider, BumpKind, CorpusVersion, KnowledgeUnit, ReasoningUnit};
use scriptorium_store::{corpus_hash, read_jsonl, scan_documents, KnowledgeStore, StoreLayout};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

/// Entity counts at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotStats {
    /// Source documents
    pub documents: usize,
    /// Chunks in the chunk store (0 when none is configured)
    pub chunks: usize,
    /// Knowledge Units
    pub knowledge_units: usize,
    /// Reasoning Units
    pub reasoning_units: usize,
}

impl SnapshotStats {
    /// Per-entity `other - self`
    pub fn delta(&self, other: &SnapshotStats) -> BTreeMap<String, i64> {
        let d = |a: usize, b: usize| b as i64 - a as i64;
        BTreeMap::from([
            ("documents".to_string(), d(self.documents, other.documents)),
            ("chunks".to_string(), d(self.chunks, other.chunks)),
            ("knowledge_units".to_string(), d(self.knowledge_units, other.knowledge_units)),
            ("reasoning_units".to_string(), d(self.reasoning_units, other.reasoning_units)),
        ])
    }
}

/// Immutable record of the corpus at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusSnapshot {
    /// `snap-<YYYYMMDDTHHMMSS>-<8 hex>`
    pub snapshot_id: String,
    /// Version this snapshot introduced
    pub version: CorpusVersion,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Why it was taken
    pub description: String,
    /// Content hash per document path
    pub document_hashes: BTreeMap<String, String>,
    /// Hash over the sorted document map
    pub corpus_hash: String,
    /// Entity counts
    pub stats: SnapshotStats,
    /// Backup directory relative to the corpus root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<String>,
}

/// Current version pointer (`version.json`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionState {
    /// Current corpus version
    pub current: CorpusVersion,
    /// Snapshot the current version came from
    #[serde(default)]
    pub current_snapshot: Option<String>,
}

/// Result of comparing live documents with a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityCheck {
    /// Snapshot checked against
    pub snapshot_id: String,
    /// True when all three sets are empty
    pub verified: bool,
    /// Documents present now but not in the snapshot
    pub added: Vec<String>,
    /// Documents in the snapshot but gone now
    pub removed: Vec<String>,
    /// Documents whose hash changed
    pub modified: Vec<String>,
}

/// Difference between two snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    /// Older side
    pub from: String,
    /// Newer side
    pub to: String,
    /// Version of the older side
    pub from_version: CorpusVersion,
    /// Version of the newer side
    pub to_version: CorpusVersion,
    /// Documents only in `to`
    pub added: Vec<String>,
    /// Documents only in `from`
    pub removed: Vec<String>,
    /// Documents in both with different hashes
    pub modified: Vec<String>,
    /// Count changes, `to - from`
    pub stat_deltas: BTreeMap<String, i64>,
}

/// Result of a rollback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    /// Snapshot restored
    pub target: String,
    /// Snapshot taken just before restoring; roll back to it to undo
    pub pre_rollback_snapshot: String,
    /// Version now current
    pub restored_version: CorpusVersion,
    /// Files copied back
    pub restored_files: Vec<String>,
}

/// Version summary for `status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionStatus {
    /// Current version
    pub current: CorpusVersion,
    /// Snapshot the current version came from
    pub current_snapshot: Option<String>,
    /// Most recent snapshot
    pub latest_snapshot: Option<CorpusSnapshot>,
    /// Snapshots on disk
    pub snapshot_count: usize,
    /// Live counts
    pub live: SnapshotStats,
}

/// Snapshot, verify, rollback and diff over one corpus
///
/// # Examples
///
/// ```no_run
/// use scriptorium_domain::BumpKind;
/// use scriptorium_growth::VersionManager;
/// use scriptorium_store::StoreLayout;
///
/// let manager = VersionManager::open(StoreLayout::new("corpus")).unwrap();
/// let snap = manager.create_snapshot("before reprocessing", BumpKind::Minor, true).unwrap();
/// assert!(manager.verify_integrity(&snap).unwrap().verified);
/// ```
pub struct VersionManager {
    layout: StoreLayout,
    changelog: Changelog,
    chunk_count: usize,
}

impl VersionManager {
    /// Open the version state under `layout`, creating directories as needed
    pub fn open(layout: StoreLayout) -> Result<Self, GrowthError> {
        layout.ensure_dirs()?;
        Ok(Self {
            changelog: Changelog::new(layout.changelog_path()),
            layout,
            chunk_count: 0,
        })
    }

    /// Record this many chunks in future snapshot stats
    pub fn with_chunk_count(mut self, chunks: usize) -> Self {
        self.chunk_count = chunks;
        self
    }

    /// The changelog this manager records into
    pub fn changelog(&self) -> &Changelog {
        &self.changelog
    }

    /// Corpus layout
    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Current version pointer
    pub fn state(&self) -> Result<VersionState, GrowthError> {
        let path = self.layout.version_file();
        if !path.exists() {
            return Ok(VersionState::default());
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// Current version
    pub fn current_version(&self) -> Result<CorpusVersion, GrowthError> {
        Ok(self.state()?.current)
    }

    fn write_state(&self, state: &VersionState) -> Result<(), GrowthError> {
        write_json_atomic(&self.layout.version_file(), state)
    }

    /// Record a change at the current version
    pub fn record(&self, change: NewChange) -> Result<(), GrowthError> {
        let version = self.current_version()?;
        self.changelog.record(change, &version)?;
        Ok(())
    }

    fn live_stats(&self, documents: usize) -> Result<SnapshotStats, GrowthError> {
        Ok(SnapshotStats {
            documents,
            chunks: self.chunk_count,
            knowledge_units: read_jsonl::<KnowledgeUnit>(self.layout.knowledge_log())?.records.len(),
            reasoning_units: read_jsonl::<ReasoningUnit>(self.layout.reasoning_log())?.records.len(),
        })
    }

    fn current_hashes(&self) -> Result<BTreeMap<String, String>, GrowthError> {
        Ok(scan_documents(self.layout.documents_dir(), self.layout.hash_workers())?
            .into_iter()
            .map(|(path, info)| (path, info.hash))
            .collect())
    }

    /// Take a snapshot and advance the version
    ///
    /// With `backup`, the mutable logs are copied into a snapshot-scoped
    /// directory so the snapshot can be rolled back to. The new version is
    /// bumped from the highest version any snapshot carries, so after a
    /// rollback to an older version the next snapshot never reuses a number.
    pub fn create_snapshot(&self, description: &str, bump: BumpKind, backup: bool) -> Result<CorpusSnapshot, GrowthError> {
        let mut state = self.state()?;
        let base = self
            .list_snapshots()?
            .iter()
            .map(|s| s.version)
            .fold(state.current, CorpusVersion::max);
        let created_at = Utc::now();
        let suffix = Uuid::now_v7().simple().to_string();
        let snapshot_id = format!(
            "snap-{}-{}",
            created_at.format("%Y%m%dT%H%M%S"),
            &suffix[suffix.len() - 8..]
        );

        let document_hashes = self.current_hashes()?;
        let stats = self.live_stats(document_hashes.len())?;

        let backup_path = if backup {
            let dir = self.layout.snapshots_dir().join(&snapshot_id);
            fs::create_dir_all(&dir)?;
            for (name, live) in self.layout.mutable_files() {
                if live.exists() {
                    fs::copy(live, dir.join(name))?;
                }
            }
            Some(relative_to_root(&self.layout, &dir))
        } else {
            None
        };

        let snapshot = CorpusSnapshot {
            snapshot_id,
            version: base.bump(bump),
            created_at,
            description: description.to_string(),
            corpus_hash: corpus_hash(&document_hashes),
            document_hashes,
            stats,
            backup_path,
        };
        write_json_atomic(&self.snapshot_file(&snapshot.snapshot_id), &snapshot)?;

        state.current = snapshot.version;
        state.current_snapshot = Some(snapshot.snapshot_id.clone());
        self.write_state(&state)?;
        self.changelog.record(
            NewChange::new(ChangeKind::SnapshotCreated, "snapshot", &snapshot.snapshot_id, description)
                .impact(Impact::Low),
            &snapshot.version,
        )?;

        tracing::info!(
            "Created snapshot {} at version {} ({} documents)",
            snapshot.snapshot_id,
            snapshot.version,
            snapshot.stats.documents
        );
        Ok(snapshot)
    }

    fn snapshot_file(&self, id: &str) -> PathBuf {
        self.layout.snapshots_dir().join(format!("{}.json", id))
    }

    /// Every snapshot, oldest first
    pub fn list_snapshots(&self) -> Result<Vec<CorpusSnapshot>, GrowthError> {
        let dir = self.layout.snapshots_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match fs::read_to_string(&path)
                .map_err(GrowthError::from)
                .and_then(|s| serde_json::from_str::<CorpusSnapshot>(&s).map_err(GrowthError::from))
            {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => tracing::warn!("Skipping unreadable snapshot {}: {}", path.display(), e),
            }
        }
        snapshots.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.snapshot_id.cmp(&b.snapshot_id))
        });
        Ok(snapshots)
    }

    /// Find a snapshot by id, unique id prefix, version (`1.2.0`, `v1.2.0`) or `latest`
    pub fn resolve(&self, reference: &str) -> Result<CorpusSnapshot, GrowthError> {
        let snapshots = self.list_snapshots()?;
        let not_found = || GrowthError::SnapshotNotFound(reference.to_string());

        if reference.eq_ignore_ascii_case("latest") {
            return snapshots.into_iter().last().ok_or_else(not_found);
        }
        if let Some(found) = snapshots.iter().find(|s| s.snapshot_id == reference) {
            return Ok(found.clone());
        }
        if let Ok(version) = reference.parse::<CorpusVersion>() {
            if let Some(found) = snapshots.iter().rev().find(|s| s.version == version) {
                return Ok(found.clone());
            }
        }
        let mut prefixed = snapshots.iter().filter(|s| s.snapshot_id.starts_with(reference));
        match (prefixed.next(), prefixed.next()) {
            (Some(found), None) => Ok(found.clone()),
            (Some(_), Some(_)) => Err(GrowthError::Invalid(format!("snapshot prefix '{}' is ambiguous", reference))),
            _ => Err(not_found()),
        }
    }

    /// Most recent snapshot, if any
    pub fn latest(&self) -> Result<Option<CorpusSnapshot>, GrowthError> {
        Ok(self.list_snapshots()?.into_iter().last())
    }

    /// Compare live documents with a snapshot
    pub fn verify_integrity(&self, snapshot: &CorpusSnapshot) -> Result<IntegrityCheck, GrowthError> {
        let current = self.current_hashes()?;
        let (added, removed, modified) = compare_maps(&snapshot.document_hashes, &current);
        let check = IntegrityCheck {
            snapshot_id: snapshot.snapshot_id.clone(),
            verified: added.is_empty() && removed.is_empty() && modified.is_empty(),
            added,
            removed,
            modified,
        };
        tracing::debug!("Verified {}: {}", check.snapshot_id, check.verified);
        Ok(check)
    }

    /// Compare two snapshots without touching live state
    pub fn diff(&self, from: &CorpusSnapshot, to: &CorpusSnapshot) -> SnapshotDiff {
        let (added, removed, modified) = compare_maps(&from.document_hashes, &to.document_hashes);
        SnapshotDiff {
            from: from.snapshot_id.clone(),
            to: to.snapshot_id.clone(),
            from_version: from.version,
            to_version: to.version,
            added,
            removed,
            modified,
            stat_deltas: from.stats.delta(&to.stats),
        }
    }

    /// Restore the mutable logs from a snapshot's backup
    ///
    /// The current state is snapshotted first, so the rollback itself can
    /// be rolled back. Fails without touching anything if the target has no
    /// backup.
    pub fn rollback(&self, target: &CorpusSnapshot) -> Result<RollbackOutcome, GrowthError> {
        let backup_dir = match &target.backup_path {
            Some(rel) => self.layout.root().join(rel),
            None => return Err(GrowthError::NoBackup(target.snapshot_id.clone())),
        };
        if !backup_dir.is_dir() {
            return Err(GrowthError::NoBackup(target.snapshot_id.clone()));
        }

        let pre = self.create_snapshot(
            &format!("pre-rollback to {}", target.snapshot_id),
            BumpKind::Patch,
            true,
        )?;

        let mut restored_files = Vec::new();
        for (name, live) in self.layout.mutable_files() {
            let saved = backup_dir.join(name);
            if saved.exists() {
                let tmp = live.with_extension("restore.tmp");
                fs::copy(&saved, &tmp)?;
                fs::rename(&tmp, live)?;
                restored_files.push(name.to_string());
            } else if live.exists() {
                fs::remove_file(live)?;
                restored_files.push(name.to_string());
            }
        }
        KnowledgeStore::open(self.layout.clone())?.rebuild_index()?;

        self.write_state(&VersionState {
            current: target.version,
            current_snapshot: Some(target.snapshot_id.clone()),
        })?;
        self.changelog.record(
            NewChange::new(
                ChangeKind::Rollback,
                "snapshot",
                &target.snapshot_id,
                format!("Rolled back to {} (undo via {})", target.snapshot_id, pre.snapshot_id),
            )
            .impact(Impact::High),
            &target.version,
        )?;

        tracing::info!("Rolled back to {} ({})", target.snapshot_id, target.version);
        Ok(RollbackOutcome {
            target: target.snapshot_id.clone(),
            pre_rollback_snapshot: pre.snapshot_id,
            restored_version: target.version,
            restored_files,
        })
    }

    /// Version summary
    pub fn status(&self) -> Result<VersionStatus, GrowthError> {
        let state = self.state()?;
        let snapshots = self.list_snapshots()?;
        let documents = scriptorium_store::list_documents(self.layout.documents_dir())?.len();
        Ok(VersionStatus {
            current: state.current,
            current_snapshot: state.current_snapshot,
            snapshot_count: snapshots.len(),
            latest_snapshot: snapshots.into_iter().last(),
            live: self.live_stats(documents)?,
        })
    }
}

impl BackupProvider for VersionManager {
    type Error = GrowthError;

    fn backup(&self, reason: &str) -> Result<String, Self::Error> {
        Ok(self.create_snapshot(&format!("backup before {}", reason), BumpKind::Patch, true)?.snapshot_id)
    }
}

/// `(added, removed, modified)` going from `old` to `new`
fn compare_maps(
    old: &BTreeMap<String, String>,
    new: &BTreeMap<String, String>,
) -> (Vec<String>, Vec<String>, Vec<String>) {
    let old_keys: BTreeSet<&String> = old.keys().collect();
    let new_keys: BTreeSet<&String> = new.keys().collect();
    let added = new_keys.difference(&old_keys).map(|s| s.to_string()).collect();
    let removed = old_keys.difference(&new_keys).map(|s| s.to_string()).collect();
    let modified = old_keys
        .intersection(&new_keys)
        .filter(|k| old.get(**k) != new.get(**k))
        .map(|s| s.to_string())
        .collect();
    (added, removed, modified)
}

fn relative_to_root(layout: &StoreLayout, path: &std::path::Path) -> String {
    path.strip_prefix(layout.root())
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

pub(crate) fn write_json_atomic<T: Serialize>(path: &std::path::Path, value: &T) -> Result<(), GrowthError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_maps() {
        let a = BTreeMap::from([("x".to_string(), "1".to_string()), ("y".to_string(), "2".to_string())]);
        let b = BTreeMap::from([("y".to_string(), "3".to_string()), ("z".to_string(), "4".to_string())]);
        let (added, removed, modified) = compare_maps(&a, &b);
        assert_eq!(added, vec!["z"]);
        assert_eq!(removed, vec!["x"]);
        assert_eq!(modified, vec!["y"]);
    }

    #[test]
    fn test_stats_delta() {
        let a = SnapshotStats {
            documents: 3,
            knowledge_units: 10,
            ..Default::default()
        };
        let b = SnapshotStats {
            documents: 2,
            knowledge_units: 15,
            ..Default::default()
        };
        let delta = a.delta(&b);
        assert_eq!(delta["documents"], -1);
        assert_eq!(delta["knowledge_units"], 5);
    }
}
