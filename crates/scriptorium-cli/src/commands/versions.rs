//! Snapshot commands: status, snapshot, list, verify, rollback, diff.

use super::{emit, finish, Corpus};
use crate::cli::{DiffArgs, ListArgs, RollbackArgs, SnapshotArgs, VerifyArgs};
use crate::error::{CliError, Result};
use crate::output::{truncate, Formatter};
use crate::outcome::Outcome;
use scriptorium_domain::BumpKind;
use scriptorium_growth::{ConflictStore, CorpusSnapshot, DocumentStatus, DocumentTracker};
use serde_json::json;

fn snapshot_rows(snapshots: &[CorpusSnapshot]) -> impl Iterator<Item = Vec<String>> + '_ {
    snapshots.iter().map(|s| {
        vec![
            s.snapshot_id.clone(),
            s.version.to_string(),
            s.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            s.stats.documents.to_string(),
            s.stats.knowledge_units.to_string(),
            s.stats.reasoning_units.to_string(),
            if s.backup_path.is_some() { "yes" } else { "no" }.to_string(),
            truncate(&s.description, 40),
        ]
    })
}

const SNAPSHOT_HEADERS: [&str; 8] = ["Snapshot", "Version", "Created", "Docs", "KUs", "RUs", "Backup", "Description"];

/// Execute `growth status`.
pub fn execute_status(corpus: &Corpus, formatter: &Formatter) -> Result<Outcome> {
    let versions = corpus.versions()?;
    let status = versions.status()?;
    let tracker = DocumentTracker::load(&corpus.layout)?;
    let counts = tracker.status_counts();
    let conflicts = ConflictStore::new(corpus.layout.conflicts_path()).load()?.len();
    let failed = counts.get(&DocumentStatus::Failed).copied().unwrap_or(0);

    let by_status: serde_json::Map<String, serde_json::Value> =
        counts.iter().map(|(s, n)| (s.as_str().to_string(), json!(n))).collect();
    let value = json!({
        "version": status,
        "tracked_documents": by_status,
        "open_conflicts": conflicts,
    });
    let text = formatter.render(&value, |f| {
        let tracked = if counts.is_empty() {
            "none".to_string()
        } else {
            counts
                .iter()
                .map(|(s, n)| format!("{} {}", n, s.as_str()))
                .collect::<Vec<_>>()
                .join(", ")
        };
        f.fields(&[
            ("Corpus", corpus.layout.root().display().to_string()),
            ("Version", status.current.to_string()),
            ("Current snapshot", status.current_snapshot.clone().unwrap_or_else(|| "-".into())),
            (
                "Latest snapshot",
                status
                    .latest_snapshot
                    .as_ref()
                    .map(|s| format!("{} ({})", s.snapshot_id, s.version))
                    .unwrap_or_else(|| "-".into()),
            ),
            ("Snapshots", status.snapshot_count.to_string()),
            (
                "Live",
                format!(
                    "{} document(s), {} chunk(s), {} KU(s), {} RU(s)",
                    status.live.documents, status.live.chunks, status.live.knowledge_units, status.live.reasoning_units
                ),
            ),
            ("Tracked", tracked),
            ("Open conflicts", conflicts.to_string()),
        ])
    })?;
    emit(&text);

    let outcome = if failed > 0 {
        Outcome::Errors
    } else if conflicts > 0 {
        Outcome::Warnings
    } else {
        Outcome::Success
    };
    let message = format!(
        "Version {}, {} failed document(s), {} open conflict(s)",
        status.current, failed, conflicts
    );
    Ok(finish(formatter, outcome, &message))
}

/// Execute `growth snapshot`.
pub fn execute_snapshot(args: SnapshotArgs, corpus: &Corpus, formatter: &Formatter) -> Result<Outcome> {
    let versions = corpus.versions()?;
    let bump: BumpKind = args.bump.into();
    let snapshot = versions.create_snapshot(&args.message, bump, !args.no_backup)?;

    let mut tracker = DocumentTracker::load(&corpus.layout)?;
    tracker.set_snapshot_hashes(&snapshot.document_hashes);
    tracker.save()?;

    let text = formatter.render(&snapshot, |f| {
        f.fields(&[
            ("Snapshot", snapshot.snapshot_id.clone()),
            ("Version", snapshot.version.to_string()),
            ("Corpus hash", snapshot.corpus_hash.clone()),
            ("Documents", snapshot.stats.documents.to_string()),
            ("Backup", snapshot.backup_path.clone().unwrap_or_else(|| "none".into())),
        ])
    })?;
    emit(&text);
    let message = format!("Created {} at version {}", snapshot.snapshot_id, snapshot.version);
    Ok(finish(formatter, Outcome::Success, &message))
}

/// Execute `growth list`.
pub fn execute_list(args: ListArgs, corpus: &Corpus, formatter: &Formatter) -> Result<Outcome> {
    let versions = corpus.versions()?;
    let mut snapshots = versions.list_snapshots()?;
    let total = snapshots.len();
    if let Some(limit) = args.limit {
        snapshots.drain(..total.saturating_sub(limit));
    }

    let text = formatter.render(&snapshots, |f| {
        f.table(&SNAPSHOT_HEADERS, snapshot_rows(&snapshots), "No snapshots yet.")
    })?;
    emit(&text);
    let message = format!("{} of {} snapshot(s)", snapshots.len(), total);
    Ok(finish(formatter, Outcome::Success, &message))
}

/// Execute `growth verify`.
pub fn execute_verify(args: VerifyArgs, corpus: &Corpus, formatter: &Formatter) -> Result<Outcome> {
    let versions = corpus.versions()?;
    let snapshot = versions.resolve(&args.snapshot)?;
    let check = versions.verify_integrity(&snapshot)?;

    let text = formatter.render(&check, |f| {
        let rows = check
            .added
            .iter()
            .map(|p| vec!["added".to_string(), p.clone()])
            .chain(check.removed.iter().map(|p| vec!["removed".to_string(), p.clone()]))
            .chain(check.modified.iter().map(|p| vec!["modified".to_string(), p.clone()]));
        f.table(&["Change", "Document"], rows, "")
    })?;
    emit(&text);

    if check.verified {
        let message = format!("{} verified: documents match", snapshot.snapshot_id);
        Ok(finish(formatter, Outcome::Success, &message))
    } else {
        let message = format!(
            "{} differs: {} added, {} removed, {} modified",
            snapshot.snapshot_id,
            check.added.len(),
            check.removed.len(),
            check.modified.len()
        );
        Ok(finish(formatter, Outcome::Errors, &message))
    }
}

/// Execute `growth rollback`.
pub fn execute_rollback(args: RollbackArgs, corpus: &Corpus, formatter: &Formatter) -> Result<Outcome> {
    let versions = corpus.versions()?;
    let target = versions.resolve(&args.target)?;

    if args.dry_run {
        let Some(backup) = &target.backup_path else {
            return Err(CliError::InvalidInput(format!(
                "snapshot {} has no backup to roll back to",
                target.snapshot_id
            )));
        };
        let value = json!({ "dry_run": true, "target": target.snapshot_id, "version": target.version, "backup": backup });
        let text = formatter.render(&value, |f| {
            f.fields(&[
                ("Target", target.snapshot_id.clone()),
                ("Version", target.version.to_string()),
                ("Restore from", backup.clone()),
            ])
        })?;
        emit(&text);
        let message = format!("Would roll back to {} ({})", target.snapshot_id, target.version);
        return Ok(finish(formatter, Outcome::Success, &message));
    }

    let outcome = versions.rollback(&target)?;
    let text = formatter.render(&outcome, |f| {
        f.fields(&[
            ("Restored", outcome.target.clone()),
            ("Version", outcome.restored_version.to_string()),
            ("Files", outcome.restored_files.join(", ")),
            ("Undo with", format!("scriptorium growth rollback {}", outcome.pre_rollback_snapshot)),
        ])
    })?;
    emit(&text);
    let message = format!("Rolled back to {} ({})", outcome.target, outcome.restored_version);
    Ok(finish(formatter, Outcome::Success, &message))
}

/// Execute `growth diff`.
pub fn execute_diff(args: DiffArgs, corpus: &Corpus, formatter: &Formatter) -> Result<Outcome> {
    let versions = corpus.versions()?;
    let from = versions.resolve(&args.from)?;
    let to = versions.resolve(&args.to)?;
    let diff = versions.diff(&from, &to);

    let text = formatter.render(&diff, |f| {
        let rows = diff
            .added
            .iter()
            .map(|p| vec!["added".to_string(), p.clone()])
            .chain(diff.removed.iter().map(|p| vec!["removed".to_string(), p.clone()]))
            .chain(diff.modified.iter().map(|p| vec!["modified".to_string(), p.clone()]));
        let table = f.table(&["Change", "Document"], rows, "No document changes.");
        let deltas = diff
            .stat_deltas
            .iter()
            .map(|(k, v)| format!("{} {:+}", k, v))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{}\n{}",
            table,
            f.fields(&[
                ("Versions", format!("{} -> {}", diff.from_version, diff.to_version)),
                ("Counts", deltas),
            ])
        )
    })?;
    emit(&text);
    let message = format!(
        "{} added, {} removed, {} modified",
        diff.added.len(),
        diff.removed.len(),
        diff.modified.len()
    );
    Ok(finish(formatter, Outcome::Success, &message))
}
