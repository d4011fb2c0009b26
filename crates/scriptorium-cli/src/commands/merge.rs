//! `growth merge`: reconcile a batch of KUs, and review the conflict queue.

use super::{emit, finish, record_change, Corpus};
use crate::cli::{KeepArg, MergeArgs};
use crate::error::{CliError, Result};
use crate::output::{short_id, truncate, Formatter};
use crate::outcome::Outcome;
use scriptorium_domain::KnowledgeUnit;
use scriptorium_growth::{
    ChangeKind, ConflictKind, ConflictStore, Impact, MergeConflict, MergeMode, MergeStrategy, NewChange,
};
use scriptorium_store::read_jsonl;
use serde_json::json;
use std::fs;
use std::path::Path;

/// Read a batch: a JSON array, or one KU per line
fn read_batch(path: &Path) -> Result<Vec<KnowledgeUnit>> {
    let text = fs::read_to_string(path)?;
    if text.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(&text)?);
    }
    let report = read_jsonl::<KnowledgeUnit>(path)?;
    for error in &report.errors {
        tracing::warn!("{}:{}: {}", path.display(), error.line, error.message);
    }
    Ok(report.records.into_iter().map(|l| l.record).collect())
}

fn conflict_rows(conflicts: &[(usize, MergeConflict)]) -> impl Iterator<Item = Vec<String>> + '_ {
    conflicts.iter().map(|(i, c)| {
        vec![
            i.to_string(),
            c.kind.as_str().to_string(),
            format!("{:.2}", c.similarity),
            truncate(&c.new_ku.claim, 40),
            c.existing
                .iter()
                .map(|k| short_id(&k.id, 12))
                .collect::<Vec<_>>()
                .join(", "),
        ]
    })
}

/// Execute `growth merge`.
pub fn execute_merge(args: MergeArgs, corpus: &Corpus, formatter: &Formatter) -> Result<Outcome> {
    let queue = ConflictStore::new(corpus.layout.conflicts_path());

    if args.conflicts {
        let kind: Option<ConflictKind> = args.kind.map(Into::into);
        let conflicts = queue.list(kind)?;
        let value: Vec<_> = conflicts.iter().map(|(i, c)| json!({"index": i, "conflict": c})).collect();
        let text = formatter.render(&value, |f| {
            f.table(
                &["#", "Kind", "Similarity", "Incoming claim", "Stored KUs"],
                conflict_rows(&conflicts),
                "No open conflicts.",
            )
        })?;
        emit(&text);
        let outcome = if conflicts.is_empty() { Outcome::Success } else { Outcome::Warnings };
        let message = format!("{} open conflict(s)", conflicts.len());
        return Ok(finish(formatter, outcome, &message));
    }

    let store = corpus.store()?;
    let versions = corpus.versions()?;

    if let Some(index) = args.resolve {
        let keep_existing = args.keep == KeepArg::Existing;
        let conflict = queue.resolve(index, keep_existing, &store, &versions)?;
        let text = formatter.render(&conflict, |f| {
            f.fields(&[
                ("Conflict", conflict.id.clone()),
                ("Kind", conflict.kind.as_str().to_string()),
                ("Kept", if keep_existing { "existing" } else { "new" }.to_string()),
            ])
        })?;
        emit(&text);
        let remaining = queue.load()?.len();
        let message = format!("Resolved conflict {}; {} remaining", index, remaining);
        return Ok(finish(formatter, Outcome::Success, &message));
    }

    let file = args
        .file
        .ok_or_else(|| CliError::InvalidInput("a batch file, --conflicts or --resolve is required".into()))?;
    let batch = read_batch(&file)?;
    let mode: MergeMode = args.mode.map(Into::into).unwrap_or(corpus.config.merge.default_mode);
    let strategy = MergeStrategy::new(&store, corpus.config.merge.clone());
    let outcome = strategy.merge(batch, mode, args.dry_run, &versions)?;

    if !outcome.dry_run && outcome.added + outcome.updated > 0 {
        record_change(
            &versions,
            NewChange::new(
                ChangeKind::Merge,
                "batch",
                file.display().to_string(),
                format!(
                    "{} merge: {} added, {} updated, {} skipped",
                    mode, outcome.added, outcome.updated, outcome.skipped
                ),
            )
            .impact(if outcome.updated > 0 { Impact::High } else { Impact::Medium })
            .reversible(outcome.backup.is_some()),
        );
    }

    let text = formatter.render(&outcome, |f| {
        let mut pairs = vec![
            ("Mode", outcome.mode.as_str().to_string()),
            ("Added", outcome.added.to_string()),
            ("Updated", outcome.updated.to_string()),
            ("Skipped", outcome.skipped.to_string()),
            ("Conflicts", outcome.conflicts.len().to_string()),
        ];
        if let Some(backup) = &outcome.backup {
            pairs.push(("Backup", backup.clone()));
        }
        f.fields(&pairs)
    })?;
    emit(&text);

    let verb = if outcome.dry_run { "Would merge" } else { "Merged" };
    let mut message = format!(
        "{} {} KU(s): {} added, {} updated",
        verb,
        outcome.added + outcome.updated + outcome.skipped + outcome.conflicts.len(),
        outcome.added,
        outcome.updated
    );
    let result = if outcome.conflicts.is_empty() {
        Outcome::Success
    } else {
        message.push_str(&format!(
            "; {} conflict(s) queued, review with `scriptorium growth merge --conflicts`",
            outcome.conflicts.len()
        ));
        Outcome::Warnings
    };
    Ok(finish(formatter, result, &message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_batch_accepts_array_and_lines() {
        let dir = TempDir::new().unwrap();
        let array = dir.path().join("batch.json");
        fs::write(&array, r#"[{"claim": "a"}, {"claim": "b"}]"#).unwrap();
        assert_eq!(read_batch(&array).unwrap().len(), 2);

        let lines = dir.path().join("batch.jsonl");
        fs::write(&lines, "{\"claim\": \"a\"}\nnot json\n{\"claim\": \"c\"}\n").unwrap();
        let kus = read_batch(&lines).unwrap();
        assert_eq!(kus.len(), 2);
        assert_eq!(kus[1].claim, "c");
    }
}
