//! Incremental processing with a scripted pipeline

use scriptorium_growth::{
    DocumentStatus, DocumentTracker, ExtractionPipeline, IncrementalProcessor, PipelineConfig, ProcessingMode,
    StageOutcome, VersionManager,
};
use scriptorium_store::StoreLayout;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

/// Fails any document named `bad*` until `fixed` is set, and hangs on `slow*`
struct ScriptedPipeline {
    calls: Arc<Mutex<Vec<String>>>,
    fixed: Arc<AtomicBool>,
}

impl ExtractionPipeline for ScriptedPipeline {
    fn stages(&self) -> Vec<String> {
        vec!["chunk".to_string(), "extract".to_string()]
    }

    async fn run_stage(&self, document: &Path, stage: &str) -> StageOutcome {
        let name = document.file_name().unwrap().to_string_lossy().into_owned();
        self.calls.lock().unwrap().push(format!("{}:{}", name, stage));
        if name.starts_with("slow") {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if name.starts_with("bad") && stage == "extract" && !self.fixed.load(Ordering::SeqCst) {
            return StageOutcome::failed("extractor crashed");
        }
        StageOutcome::ok(vec![format!("{}.{}.json", name, stage)])
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    layout: StoreLayout,
    calls: Arc<Mutex<Vec<String>>>,
    fixed: Arc<AtomicBool>,
}

impl Fixture {
    fn new(documents: &[&str]) -> Self {
        let dir = tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.ensure_dirs().unwrap();
        for name in documents {
            fs::write(layout.document_path(name), name.as_bytes()).unwrap();
        }
        Self {
            _dir: dir,
            layout,
            calls: Arc::new(Mutex::new(Vec::new())),
            fixed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn processor(&self, timeout_secs: u64) -> IncrementalProcessor<ScriptedPipeline> {
        let config = PipelineConfig {
            timeout_secs,
            max_concurrent: 2,
            ..Default::default()
        };
        let pipeline = ScriptedPipeline {
            calls: Arc::clone(&self.calls),
            fixed: Arc::clone(&self.fixed),
        };
        IncrementalProcessor::new(pipeline, &config, self.layout.documents_dir())
    }

    fn calls(&self) -> Vec<String> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort();
        calls
    }
}

#[tokio::test]
async fn test_failure_stops_chain_but_not_batch() {
    let fx = Fixture::new(&["a.pdf", "bad.pdf", "c.pdf"]);
    let versions = VersionManager::open(fx.layout.clone()).unwrap();
    let mut tracker = DocumentTracker::load(&fx.layout).unwrap();
    tracker.detect_changes(None).unwrap();

    let report = fx
        .processor(5)
        .run(&mut tracker, ProcessingMode::NewOnly, false, Some(&versions))
        .await
        .unwrap();

    assert_eq!(report.selected.len(), 3);
    assert_eq!(report.processed, 2);
    assert_eq!(report.failed, 1);
    let bad = report.documents.iter().find(|d| d.document == "bad.pdf").unwrap();
    assert_eq!(bad.stages.len(), 2);
    assert!(!bad.stages[1].success);
    assert_eq!(bad.error(), Some("extractor crashed"));

    let reloaded = DocumentTracker::load(&fx.layout).unwrap();
    assert_eq!(reloaded.get("a.pdf").unwrap().status, DocumentStatus::Processed);
    assert_eq!(reloaded.get("bad.pdf").unwrap().status, DocumentStatus::Failed);
    assert_eq!(reloaded.get("bad.pdf").unwrap().error.as_deref(), Some("extractor crashed"));
    assert_eq!(versions.changelog().entries().unwrap().len(), 3);
}

#[tokio::test]
async fn test_resume_retries_only_failed() {
    let fx = Fixture::new(&["a.pdf", "bad.pdf"]);
    let mut tracker = DocumentTracker::load(&fx.layout).unwrap();
    tracker.detect_changes(None).unwrap();
    let processor = fx.processor(5);
    processor
        .run(&mut tracker, ProcessingMode::AllChanged, false, None)
        .await
        .unwrap();
    fx.calls.lock().unwrap().clear();

    fx.fixed.store(true, Ordering::SeqCst);
    let report = processor.resume(&mut tracker, false, None).await.unwrap();
    assert_eq!(report.selected, vec!["bad.pdf"]);
    assert_eq!(report.processed, 1);
    assert_eq!(fx.calls(), vec!["bad.pdf:chunk", "bad.pdf:extract"]);
    assert_eq!(tracker.get("bad.pdf").unwrap().status, DocumentStatus::Processed);
    assert!(tracker.get("bad.pdf").unwrap().error.is_none());
}

#[tokio::test]
async fn test_timeout_marks_failed() {
    let fx = Fixture::new(&["slow.pdf", "quick.pdf"]);
    let mut tracker = DocumentTracker::load(&fx.layout).unwrap();
    tracker.detect_changes(None).unwrap();

    let report = fx
        .processor(1)
        .run(&mut tracker, ProcessingMode::ForceAll, false, None)
        .await
        .unwrap();

    assert_eq!(report.failed, 1);
    let slow = report.documents.iter().find(|d| d.document == "slow.pdf").unwrap();
    assert_eq!(slow.stages.len(), 1);
    assert!(slow.error().unwrap().contains("timed out"));
    assert_eq!(tracker.get("slow.pdf").unwrap().status, DocumentStatus::Failed);
    assert_eq!(tracker.get("quick.pdf").unwrap().status, DocumentStatus::Processed);
}

#[tokio::test]
async fn test_dry_run_invokes_nothing() {
    let fx = Fixture::new(&["a.pdf", "b.pdf"]);
    let mut tracker = DocumentTracker::load(&fx.layout).unwrap();
    tracker.detect_changes(None).unwrap();

    let report = fx
        .processor(5)
        .run(&mut tracker, ProcessingMode::AllChanged, true, None)
        .await
        .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.selected, vec!["a.pdf", "b.pdf"]);
    assert!(report.documents.is_empty());
    assert!(fx.calls().is_empty());
    assert_eq!(tracker.get("a.pdf").unwrap().status, DocumentStatus::New);
}
