//! Command implementations.
//!
//! Every command prints its result, ends with a summary line, and returns
//! the graded `Outcome` the process exits with.

pub mod audit;
pub mod changelog;
pub mod documents;
pub mod merge;
pub mod rebalance;
pub mod versions;

use crate::cli::{Command, GrowthCommand};
use crate::config::Config;
use crate::error::{CliError, Result};
use crate::output::Formatter;
use crate::outcome::Outcome;
use scriptorium_audit::CorpusView;
use scriptorium_domain::ChunkStore;
use scriptorium_growth::{NewChange, VersionManager};
use scriptorium_store::{ChunkBackend, KnowledgeStore, StoreLayout};
use std::collections::BTreeMap;
use std::path::Path;

pub use self::audit::execute_audit;
pub use self::changelog::execute_changelog;
pub use self::documents::{execute_add, execute_process};
pub use self::merge::execute_merge;
pub use self::rebalance::execute_rebalance;
pub use self::versions::{
    execute_diff, execute_list, execute_rollback, execute_snapshot, execute_status, execute_verify,
};

/// One corpus and its configuration, opened for a single command
pub struct Corpus {
    /// Loaded configuration
    pub config: Config,
    /// File locations
    pub layout: StoreLayout,
}

impl Corpus {
    /// Resolve the layout under `root`
    pub fn open(root: &Path, config: Config) -> Result<Self> {
        if !root.is_dir() {
            return Err(CliError::InvalidInput(format!(
                "corpus root {} is not a directory",
                root.display()
            )));
        }
        let layout = StoreLayout::from_config(root, &config.store);
        Ok(Self { config, layout })
    }

    /// Knowledge and reasoning logs
    pub fn store(&self) -> Result<KnowledgeStore> {
        Ok(KnowledgeStore::open(self.layout.clone())?)
    }

    /// Configured chunk store, or the no-op adapter
    pub fn chunks(&self) -> Result<ChunkBackend> {
        Ok(ChunkBackend::from_layout(&self.layout)?)
    }

    /// Version manager, counting chunks for snapshot stats when a chunk store is present
    pub fn versions(&self) -> Result<VersionManager> {
        let chunks = self.chunks()?;
        let count = if chunks.is_available() { chunks.list_all()?.len() } else { 0 };
        Ok(VersionManager::open(self.layout.clone())?.with_chunk_count(count))
    }

    /// Everything the analyzers read
    pub fn view(&self, store: &KnowledgeStore) -> Result<CorpusView> {
        let chunks = self.chunks()?;
        let view = CorpusView::load(store, &chunks)?;
        if view.skipped_lines > 0 {
            tracing::warn!("{} malformed log line(s) skipped", view.skipped_lines);
        }
        Ok(view)
    }

    /// Document hashes of the latest snapshot; empty before the first one
    pub fn reference_hashes(&self, versions: &VersionManager) -> Result<BTreeMap<String, String>> {
        Ok(versions.latest()?.map(|s| s.document_hashes).unwrap_or_default())
    }
}

/// Record a changelog entry, logging instead of failing the command
///
/// The mutation has already happened when this runs.
pub(crate) fn record_change(versions: &VersionManager, change: NewChange) {
    if let Err(e) = versions.record(change) {
        tracing::warn!("Could not record changelog entry: {}", e);
    }
}

/// Print a rendered block
pub(crate) fn emit(text: &str) {
    if !text.is_empty() {
        println!("{}", text);
    }
}

/// Print the closing summary line; JSON output stays pure JSON
pub(crate) fn finish(formatter: &Formatter, outcome: Outcome, message: &str) -> Outcome {
    if formatter.is_json() {
        tracing::info!("{}", message);
    } else {
        println!("{}", formatter.summary(outcome, message));
    }
    outcome
}

/// Dispatch one parsed command
pub async fn execute(command: Command, corpus: &Corpus, formatter: &Formatter) -> Result<Outcome> {
    match command {
        Command::Audit(args) => execute_audit(args, corpus, formatter),
        Command::Growth(growth) => match growth {
            GrowthCommand::Status => execute_status(corpus, formatter),
            GrowthCommand::Snapshot(args) => execute_snapshot(args, corpus, formatter),
            GrowthCommand::List(args) => execute_list(args, corpus, formatter),
            GrowthCommand::Verify(args) => execute_verify(args, corpus, formatter),
            GrowthCommand::Rollback(args) => execute_rollback(args, corpus, formatter),
            GrowthCommand::Diff(args) => execute_diff(args, corpus, formatter),
            GrowthCommand::Add(args) => execute_add(args, corpus, formatter),
            GrowthCommand::Process(args) => execute_process(args, corpus, formatter).await,
            GrowthCommand::Rebalance(args) => execute_rebalance(args, corpus, formatter),
            GrowthCommand::Merge(args) => execute_merge(args, corpus, formatter),
            GrowthCommand::Changelog(args) => execute_changelog(args, corpus, formatter),
        },
    }
}
