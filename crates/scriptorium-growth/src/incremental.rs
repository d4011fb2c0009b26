//! Incremental reprocessing through the external extraction pipeline
//!
//! Documents are selected from the tracker by mode, then run through every
//! pipeline stage in order. A stage failure or timeout stops that
//! document's chain and marks it failed; the batch moves on. Tracker state
//! is saved after each document so a cancelled batch resumes cleanly.

use crate::changelog::{ChangeKind, Impact, NewChange};
use crate::config::PipelineConfig;
use crate::snapshot::VersionManager;
use crate::tracker::DocumentTracker;
use crate::GrowthError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::task::JoinSet;

/// Which documents a run selects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessingMode {
    /// Only documents never seen before
    NewOnly,
    /// Only documents whose content changed
    ModifiedOnly,
    /// New, modified, and left-over pending documents
    AllChanged,
    /// Every document on disk
    ForceAll,
}

impl ProcessingMode {
    /// Kebab-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::NewOnly => "new-only",
            ProcessingMode::ModifiedOnly => "modified-only",
            ProcessingMode::AllChanged => "all-changed",
            ProcessingMode::ForceAll => "force-all",
        }
    }
}

impl FromStr for ProcessingMode {
    type Err = GrowthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "new-only" | "new" => Ok(ProcessingMode::NewOnly),
            "modified-only" | "modified" => Ok(ProcessingMode::ModifiedOnly),
            "all-changed" | "changed" => Ok(ProcessingMode::AllChanged),
            "force-all" | "all" => Ok(ProcessingMode::ForceAll),
            other => Err(GrowthError::Invalid(format!("unknown processing mode '{}'", other))),
        }
    }
}

/// What one pipeline stage reported
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    /// Whether the stage succeeded
    pub success: bool,
    /// Artifacts or messages the stage produced
    pub outputs: Vec<String>,
    /// Failure detail
    pub error: Option<String>,
}

impl StageOutcome {
    /// Successful stage
    pub fn ok(outputs: Vec<String>) -> Self {
        Self {
            success: true,
            outputs,
            error: None,
        }
    }

    /// Failed stage
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            outputs: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Result of one stage for one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingResult {
    /// Document path
    pub document: String,
    /// Stage name
    pub stage: String,
    /// Whether the stage succeeded
    pub success: bool,
    /// Wall time
    pub duration_ms: u64,
    /// Stage outputs
    pub outputs: Vec<String>,
    /// Failure detail
    pub error: Option<String>,
}

/// Every stage result for one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentOutcome {
    /// Document path
    pub document: String,
    /// Whether every stage succeeded
    pub success: bool,
    /// Stage results in run order; stops at the first failure
    pub stages: Vec<ProcessingResult>,
}

impl DocumentOutcome {
    /// First failure message, if any
    pub fn error(&self) -> Option<&str> {
        self.stages.iter().find_map(|s| s.error.as_deref())
    }

    fn crashed(document: &str, error: String) -> Self {
        Self {
            document: document.to_string(),
            success: false,
            stages: vec![ProcessingResult {
                document: document.to_string(),
                stage: "<task>".to_string(),
                success: false,
                duration_ms: 0,
                outputs: Vec::new(),
                error: Some(error),
            }],
        }
    }
}

/// Summary of one batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Mode used for selection; `None` for a resume
    pub mode: Option<ProcessingMode>,
    /// Whether the pipeline was skipped
    pub dry_run: bool,
    /// Documents selected, in path order
    pub selected: Vec<String>,
    /// Per-document results, in completion order
    pub documents: Vec<DocumentOutcome>,
    /// Documents that succeeded
    pub processed: usize,
    /// Documents that failed
    pub failed: usize,
}

/// The external extraction pipeline
///
/// Each call runs one stage over one document. Implementations must be
/// cancel-safe: the processor drops the future on timeout.
pub trait ExtractionPipeline: Send + Sync + 'static {
    /// Stage names, in run order
    fn stages(&self) -> Vec<String>;

    /// Run one stage over one document
    fn run_stage(&self, document: &Path, stage: &str) -> impl Future<Output = StageOutcome> + Send;
}

/// Pipeline that runs a configured command per stage
///
/// `{document}`, `{stage}` and `{root}` in the arguments are substituted.
/// The child is killed if its stage times out.
pub struct SubprocessPipeline {
    command: Vec<String>,
    stages: Vec<String>,
    root: PathBuf,
}

impl SubprocessPipeline {
    /// Build from configuration
    pub fn from_config(config: &PipelineConfig, root: impl Into<PathBuf>) -> Result<Self, GrowthError> {
        if config.command.is_empty() {
            return Err(GrowthError::Config("pipeline.command is not set".into()));
        }
        config.validate()?;
        Ok(Self {
            command: config.command.clone(),
            stages: config.stages.clone(),
            root: root.into(),
        })
    }

    fn expand(&self, arg: &str, document: &Path, stage: &str) -> String {
        arg.replace("{document}", &document.to_string_lossy())
            .replace("{stage}", stage)
            .replace("{root}", &self.root.to_string_lossy())
    }
}

impl ExtractionPipeline for SubprocessPipeline {
    fn stages(&self) -> Vec<String> {
        self.stages.clone()
    }

    async fn run_stage(&self, document: &Path, stage: &str) -> StageOutcome {
        let Some((program, args)) = self.command.split_first() else {
            return StageOutcome::failed("empty pipeline command");
        };
        let args: Vec<String> = args.iter().map(|a| self.expand(a, document, stage)).collect();
        tracing::debug!("Running {} {:?}", program, args);

        let output = Command::new(program)
            .args(&args)
            .current_dir(&self.root)
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => StageOutcome::ok(
                String::from_utf8_lossy(&out.stdout)
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(String::from)
                    .collect(),
            ),
            Ok(out) => {
                let stderr = String::from_utf8_lossy(&out.stderr);
                let detail = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
                StageOutcome::failed(format!("exited with {}: {}", out.status, detail.trim()))
            }
            Err(e) => StageOutcome::failed(format!("failed to start {}: {}", program, e)),
        }
    }
}

async fn run_document<P: ExtractionPipeline>(
    pipeline: Arc<P>,
    document: String,
    absolute: PathBuf,
    stages: Vec<String>,
    timeout: Duration,
) -> DocumentOutcome {
    let mut results = Vec::with_capacity(stages.len());
    let mut success = true;
    for stage in stages {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(timeout, pipeline.run_stage(&absolute, &stage)).await {
            Ok(outcome) => outcome,
            Err(_) => StageOutcome::failed(format!("timed out after {}s", timeout.as_secs())),
        };
        let failed = !outcome.success;
        results.push(ProcessingResult {
            document: document.clone(),
            stage,
            success: outcome.success,
            duration_ms: started.elapsed().as_millis() as u64,
            outputs: outcome.outputs,
            error: outcome.error,
        });
        if failed {
            success = false;
            break;
        }
    }
    DocumentOutcome {
        document,
        success,
        stages: results,
    }
}

/// Runs selected documents through a pipeline with bounded concurrency
pub struct IncrementalProcessor<P: ExtractionPipeline> {
    pipeline: Arc<P>,
    documents_dir: PathBuf,
    timeout: Duration,
    max_concurrent: usize,
}

impl<P: ExtractionPipeline> IncrementalProcessor<P> {
    /// Create a processor over `documents_dir`
    pub fn new(pipeline: P, config: &PipelineConfig, documents_dir: impl Into<PathBuf>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            documents_dir: documents_dir.into(),
            timeout: config.timeout(),
            max_concurrent: config.max_concurrent.max(1),
        }
    }

    /// Select by mode and process; with `dry_run`, only report the selection
    pub async fn run(
        &self,
        tracker: &mut DocumentTracker,
        mode: ProcessingMode,
        dry_run: bool,
        recorder: Option<&VersionManager>,
    ) -> Result<BatchReport, GrowthError> {
        let selected = tracker.select(mode);
        tracing::info!("Selected {} document(s) with mode {}", selected.len(), mode.as_str());
        if dry_run {
            return Ok(BatchReport {
                mode: Some(mode),
                dry_run,
                selected,
                documents: Vec::new(),
                processed: 0,
                failed: 0,
            });
        }
        tracker.mark_pending(&selected);
        tracker.save()?;
        let mut report = self.process(tracker, selected, recorder).await?;
        report.mode = Some(mode);
        Ok(report)
    }

    /// Retry failed documents; processed ones are never touched
    pub async fn resume(
        &self,
        tracker: &mut DocumentTracker,
        dry_run: bool,
        recorder: Option<&VersionManager>,
    ) -> Result<BatchReport, GrowthError> {
        if dry_run {
            let mut selected = tracker.with_status(crate::DocumentStatus::Failed);
            selected.extend(tracker.pending());
            selected.sort();
            return Ok(BatchReport {
                mode: None,
                dry_run,
                selected,
                documents: Vec::new(),
                processed: 0,
                failed: 0,
            });
        }
        tracker.reset_failed();
        tracker.save()?;
        let selected = tracker.pending();
        tracing::info!("Resuming {} document(s)", selected.len());
        self.process(tracker, selected, recorder).await
    }

    async fn process(
        &self,
        tracker: &mut DocumentTracker,
        selected: Vec<String>,
        recorder: Option<&VersionManager>,
    ) -> Result<BatchReport, GrowthError> {
        let stages = self.pipeline.stages();
        let mut queue = selected.clone().into_iter();
        let mut running: JoinSet<DocumentOutcome> = JoinSet::new();
        let mut report = BatchReport {
            mode: None,
            dry_run: false,
            selected,
            documents: Vec::new(),
            processed: 0,
            failed: 0,
        };

        loop {
            while running.len() < self.max_concurrent {
                let Some(document) = queue.next() else { break };
                let worker = tokio::spawn(run_document(
                    Arc::clone(&self.pipeline),
                    document.clone(),
                    self.documents_dir.join(&document),
                    stages.clone(),
                    self.timeout,
                ));
                // The inner task turns a pipeline panic into a failed document
                running.spawn(async move {
                    match worker.await {
                        Ok(outcome) => outcome,
                        Err(e) => DocumentOutcome::crashed(&document, format!("task failed: {}", e)),
                    }
                });
            }

            let Some(joined) = running.join_next().await else { break };
            let outcome = joined.map_err(|e| GrowthError::Invalid(format!("processing task failed: {}", e)))?;
            self.settle(tracker, &outcome, recorder)?;
            if outcome.success {
                report.processed += 1;
            } else {
                report.failed += 1;
            }
            report.documents.push(outcome);
        }

        tracing::info!("Batch finished: {} processed, {} failed", report.processed, report.failed);
        Ok(report)
    }

    fn settle(
        &self,
        tracker: &mut DocumentTracker,
        outcome: &DocumentOutcome,
        recorder: Option<&VersionManager>,
    ) -> Result<(), GrowthError> {
        if outcome.success {
            tracker.mark_processed(&outcome.document);
        } else {
            let error = outcome.error().unwrap_or("unknown failure").to_string();
            tracing::warn!("Processing {} failed: {}", outcome.document, error);
            tracker.mark_failed(&outcome.document, error);
        }
        tracker.save()?;

        if let Some(manager) = recorder {
            let stages: Vec<&str> = outcome.stages.iter().map(|s| s.stage.as_str()).collect();
            let description = if outcome.success {
                format!("Reprocessed through {}", stages.join(", "))
            } else {
                format!("Reprocessing failed at {}", stages.last().copied().unwrap_or("start"))
            };
            manager.record(
                NewChange::new(ChangeKind::Reprocessed, "document", &outcome.document, description)
                    .impact(Impact::Medium)
                    .reversible(outcome.success),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("new-only".parse::<ProcessingMode>().unwrap(), ProcessingMode::NewOnly);
        assert_eq!("FORCE_ALL".parse::<ProcessingMode>().unwrap(), ProcessingMode::ForceAll);
        assert_eq!("changed".parse::<ProcessingMode>().unwrap(), ProcessingMode::AllChanged);
        assert!("sometimes".parse::<ProcessingMode>().is_err());
    }

    #[test]
    fn test_placeholder_expansion() {
        let config = PipelineConfig {
            command: vec!["extract".into(), "--stage={stage}".into(), "{document}".into()],
            ..Default::default()
        };
        let pipeline = SubprocessPipeline::from_config(&config, "/corpus").unwrap();
        assert_eq!(
            pipeline.expand("--stage={stage}", Path::new("/corpus/documents/a.pdf"), "chunk"),
            "--stage=chunk"
        );
        assert_eq!(
            pipeline.expand("{root}:{document}", Path::new("a.pdf"), "x"),
            "/corpus:a.pdf"
        );
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(matches!(
            SubprocessPipeline::from_config(&PipelineConfig::default(), "."),
            Err(GrowthError::Config(_))
        ));
    }
}
