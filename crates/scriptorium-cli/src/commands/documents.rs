//! Bringing documents into the corpus: `growth add` and `growth process`.

use super::{emit, finish, Corpus};
use crate::cli::{AddArgs, ProcessArgs};
use crate::error::{CliError, Result};
use crate::output::Formatter;
use crate::outcome::Outcome;
use scriptorium_growth::{
    BatchReport, ChangeSet, DocumentStatus, DocumentTracker, IncrementalProcessor, ProcessingMode, SubprocessPipeline,
};
use scriptorium_store::hash_file;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// What `growth add` did with one file
#[derive(Debug, Serialize)]
struct Placement {
    source: String,
    destination: String,
    action: &'static str,
}

#[derive(Debug, Serialize)]
struct AddReport {
    dry_run: bool,
    placements: Vec<Placement>,
    changes: Option<ChangeSet>,
}

fn destination(documents_dir: &Path, into: Option<&str>, source: &Path) -> Result<PathBuf> {
    let name = source
        .file_name()
        .ok_or_else(|| CliError::InvalidInput(format!("{} has no file name", source.display())))?;
    let mut dest = documents_dir.to_path_buf();
    if let Some(sub) = into {
        let sub = Path::new(sub);
        if sub.is_absolute() || sub.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            return Err(CliError::InvalidInput(format!(
                "--into must be a relative path inside the documents directory, got {}",
                sub.display()
            )));
        }
        dest.push(sub);
    }
    dest.push(name);
    Ok(dest)
}

/// Execute `growth add`.
pub fn execute_add(args: AddArgs, corpus: &Corpus, formatter: &Formatter) -> Result<Outcome> {
    let documents_dir = corpus.layout.documents_dir();
    let mut placements = Vec::with_capacity(args.files.len());

    for source in &args.files {
        if !source.is_file() {
            return Err(CliError::InvalidInput(format!("{} is not a file", source.display())));
        }
        let dest = destination(documents_dir, args.into.as_deref(), source)?;
        let action = if dest.exists() {
            if hash_file(&dest)? == hash_file(source)? {
                "unchanged"
            } else {
                "replace"
            }
        } else {
            "copy"
        };

        if !args.dry_run && action != "unchanged" {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(source, &dest)?;
            tracing::debug!("Copied {} to {}", source.display(), dest.display());
        }
        placements.push(Placement {
            source: source.display().to_string(),
            destination: dest.display().to_string(),
            action,
        });
    }

    let changes = if args.dry_run {
        None
    } else {
        let versions = corpus.versions()?;
        let mut tracker = DocumentTracker::load(&corpus.layout)?;
        let changes = tracker.detect_changes(None)?;
        changes.record(&versions)?;
        Some(changes)
    };

    let report = AddReport {
        dry_run: args.dry_run,
        placements,
        changes,
    };
    let text = formatter.render(&report, |f| {
        let rows = report
            .placements
            .iter()
            .map(|p| vec![p.action.to_string(), p.source.clone(), p.destination.clone()]);
        f.table(&["Action", "Source", "Destination"], rows, "")
    })?;
    emit(&text);

    let copied = report.placements.iter().filter(|p| p.action != "unchanged").count();
    let message = match &report.changes {
        None => format!("Would add {} file(s)", copied),
        Some(c) => format!(
            "Added {} file(s); {} new, {} modified document(s) await processing",
            copied,
            c.new.len(),
            c.modified.len()
        ),
    };
    Ok(finish(formatter, Outcome::Success, &message))
}

fn batch_rows(report: &BatchReport) -> Vec<Vec<String>> {
    if report.dry_run {
        return report
            .selected
            .iter()
            .map(|d| vec![d.clone(), "selected".to_string(), String::new()])
            .collect();
    }
    report
        .documents
        .iter()
        .map(|d| {
            vec![
                d.document.clone(),
                if d.success { "processed" } else { "failed" }.to_string(),
                d.error().unwrap_or_default().to_string(),
            ]
        })
        .collect()
}

/// Execute `growth process`.
pub async fn execute_process(args: ProcessArgs, corpus: &Corpus, formatter: &Formatter) -> Result<Outcome> {
    let mode: ProcessingMode = args.mode.into();
    let mut tracker = DocumentTracker::load(&corpus.layout)?;

    // A dry run only needs the selection, so it works before a pipeline is configured.
    let report = if args.dry_run {
        tracker.refresh(None)?;
        let selected = if args.resume {
            let mut selected = tracker.with_status(DocumentStatus::Failed);
            selected.extend(tracker.pending());
            selected.sort();
            selected
        } else {
            tracker.select(mode)
        };
        BatchReport {
            mode: (!args.resume).then_some(mode),
            dry_run: true,
            selected,
            documents: Vec::new(),
            processed: 0,
            failed: 0,
        }
    } else {
        let versions = corpus.versions()?;
        let changes = tracker.detect_changes(None)?;
        changes.record(&versions)?;
        let pipeline = SubprocessPipeline::from_config(&corpus.config.pipeline, corpus.layout.root())?;
        let processor = IncrementalProcessor::new(pipeline, &corpus.config.pipeline, corpus.layout.documents_dir());
        if args.resume {
            processor.resume(&mut tracker, false, Some(&versions)).await?
        } else {
            processor.run(&mut tracker, mode, false, Some(&versions)).await?
        }
    };

    let text = formatter.render(&report, |f| {
        f.table(&["Document", "Result", "Error"], batch_rows(&report), "Nothing to process.")
    })?;
    emit(&text);

    if report.dry_run {
        let message = format!("Would process {} document(s)", report.selected.len());
        return Ok(finish(formatter, Outcome::Success, &message));
    }
    let outcome = if report.failed > 0 { Outcome::Errors } else { Outcome::Success };
    let mut message = format!("Processed {}, failed {}", report.processed, report.failed);
    if report.failed > 0 {
        message.push_str("; retry with `scriptorium growth process --resume`");
    }
    Ok(finish(formatter, outcome, &message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_with_subdirectory() {
        let dest = destination(Path::new("/corpus/docs"), Some("physics"), Path::new("/tmp/a.pdf")).unwrap();
        assert_eq!(dest, PathBuf::from("/corpus/docs/physics/a.pdf"));
    }

    #[test]
    fn test_destination_rejects_escape() {
        assert!(destination(Path::new("/corpus/docs"), Some("../out"), Path::new("a.pdf")).is_err());
        assert!(destination(Path::new("/corpus/docs"), Some("/etc"), Path::new("a.pdf")).is_err());
    }
}
