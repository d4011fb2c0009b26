//! CLI command definitions and argument parsing.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Scriptorium - audit, version and rebalance a source-cited knowledge corpus.
#[derive(Debug, Parser)]
#[command(name = "scriptorium")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Corpus root directory
    #[arg(short, long, global = true, env = "SCRIPTORIUM_ROOT", default_value = ".")]
    pub root: PathBuf,

    /// Output format
    #[arg(short, long, value_enum, global = true)]
    pub format: Option<CliFormat>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log progress to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Output format options.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum CliFormat {
    /// Tables and status lines (default)
    Table,
    /// JSON
    Json,
}

/// Command families.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Provenance and integrity audits (read-only except `fix`)
    Audit(AuditArgs),

    /// Versioning, change tracking, merging and rebalancing
    #[command(subcommand)]
    Growth(GrowthCommand),
}

/// Arguments shared by the audit family.
#[derive(Debug, Args)]
pub struct AuditArgs {
    /// Threshold preset, overriding the configured audit section
    #[arg(long, value_enum, global = true)]
    pub preset: Option<PresetArg>,

    #[command(subcommand)]
    pub command: AuditCommand,
}

/// Audit commands.
#[derive(Debug, Subcommand)]
pub enum AuditCommand {
    /// Trace an RU or KU to its documents, or list what depends on a chunk or document
    Chain(ChainArgs),

    /// Ranked gaps and the health score
    Gaps(GapsArgs),

    /// Page coverage per document and KU coverage by reasoning
    Coverage(CoverageArgs),

    /// Remediation plan built from the gaps
    Report(ReportArgs),

    /// Strip dangling references from the logs
    Fix(FixArgs),

    /// Every analyzer in one report
    Full(FullArgs),
}

/// Arguments for `audit chain`.
#[derive(Debug, Args)]
pub struct ChainArgs {
    /// RU or KU id; with --dependents, a chunk id or document path
    pub id: String,

    /// Trace backwards: everything that cites this chunk or document
    #[arg(long)]
    pub dependents: bool,

    /// Skip recomputing document hashes
    #[arg(long)]
    pub no_hash_check: bool,
}

/// Arguments for `audit gaps`.
#[derive(Debug, Args)]
pub struct GapsArgs {
    /// Only show gaps at or above this severity
    #[arg(long, value_enum)]
    pub min_severity: Option<SeverityArg>,

    /// Only show one category (e.g. missing-reasoning)
    #[arg(long)]
    pub category: Option<String>,
}

/// Arguments for `audit coverage`.
#[derive(Debug, Args)]
pub struct CoverageArgs {
    /// Only list documents below the low-coverage threshold
    #[arg(long)]
    pub low_only: bool,
}

/// Arguments for `audit report`.
#[derive(Debug, Args)]
pub struct ReportArgs {
    /// Also write the rendered report to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for `audit fix`.
#[derive(Debug, Args)]
pub struct FixArgs {
    /// Show the repair plan without writing
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for `audit full`.
#[derive(Debug, Args)]
pub struct FullArgs {
    /// Also write the JSON report to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Growth commands.
#[derive(Debug, Subcommand)]
pub enum GrowthCommand {
    /// Version, snapshots, tracked documents and open conflicts
    Status,

    /// Take a snapshot and advance the version
    Snapshot(SnapshotArgs),

    /// List snapshots, oldest first
    List(ListArgs),

    /// Compare current documents with a snapshot
    Verify(VerifyArgs),

    /// Restore the knowledge and reasoning logs from a snapshot
    Rollback(RollbackArgs),

    /// Compare two snapshots
    Diff(DiffArgs),

    /// Copy documents into the corpus and detect changes
    Add(AddArgs),

    /// Run the extraction pipeline over changed documents
    Process(ProcessArgs),

    /// Density and skew analysis, calibration plans
    Rebalance(RebalanceArgs),

    /// Merge a batch of extracted KUs, or review merge conflicts
    Merge(MergeArgs),

    /// Query and export the changelog
    Changelog(ChangelogArgs),
}

/// Arguments for `growth snapshot`.
#[derive(Debug, Args)]
pub struct SnapshotArgs {
    /// Description
    #[arg(short, long, default_value = "manual snapshot")]
    pub message: String,

    /// Version component to bump
    #[arg(short, long, value_enum, default_value = "patch")]
    pub bump: BumpArg,

    /// Do not back up the knowledge and reasoning logs
    #[arg(long)]
    pub no_backup: bool,
}

/// Arguments for `growth list`.
#[derive(Debug, Args)]
pub struct ListArgs {
    /// Only the most recent N snapshots
    #[arg(short, long)]
    pub limit: Option<usize>,
}

/// Arguments for `growth verify`.
#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Snapshot id, id prefix, version or `latest`
    #[arg(default_value = "latest")]
    pub snapshot: String,
}

/// Arguments for `growth rollback`.
#[derive(Debug, Args)]
pub struct RollbackArgs {
    /// Snapshot id, id prefix, version or `latest`
    pub target: String,

    /// Show what would be restored
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for `growth diff`.
#[derive(Debug, Args)]
pub struct DiffArgs {
    /// Older snapshot
    pub from: String,

    /// Newer snapshot
    #[arg(default_value = "latest")]
    pub to: String,
}

/// Arguments for `growth add`.
#[derive(Debug, Args)]
pub struct AddArgs {
    /// Files to copy into the documents directory
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Subdirectory of the documents directory (e.g. a domain name)
    #[arg(long)]
    pub into: Option<String>,

    /// List the copies without making them
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for `growth process`.
#[derive(Debug, Args)]
pub struct ProcessArgs {
    /// Which documents to process
    #[arg(short, long, value_enum, default_value = "all-changed")]
    pub mode: ModeArg,

    /// Retry failed documents instead of selecting by mode
    #[arg(long)]
    pub resume: bool,

    /// Show the selection without running the pipeline
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for `growth rebalance`.
#[derive(Debug, Args)]
pub struct RebalanceArgs {
    /// Threshold preset, overriding the configured skew section
    #[arg(long, value_enum)]
    pub preset: Option<PresetArg>,

    /// Save the plan generated from the alerts
    #[arg(long)]
    pub save: bool,

    /// Execute a saved plan (id, id prefix or `latest`)
    #[arg(long, value_name = "PLAN")]
    pub execute: Option<String>,

    /// List saved plans
    #[arg(long)]
    pub plans: bool,

    /// Save a manual rule, `action:target[:weight]` (e.g. restore-ku:ku_1f2e...)
    #[arg(long = "rule", value_name = "RULE")]
    pub rules: Vec<String>,

    /// Reason recorded on manual rules
    #[arg(long, default_value = "manual adjustment")]
    pub reason: String,

    /// Compute everything, write nothing
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for `growth merge`.
#[derive(Debug, Args)]
pub struct MergeArgs {
    /// KUs to merge, as a JSON array or JSON Lines
    pub file: Option<PathBuf>,

    /// Merge mode; defaults to the configured one
    #[arg(short, long, value_enum)]
    pub mode: Option<MergeModeArg>,

    /// Show the outcome without writing
    #[arg(long)]
    pub dry_run: bool,

    /// List open conflicts
    #[arg(long)]
    pub conflicts: bool,

    /// With --conflicts, only one kind
    #[arg(long, value_enum)]
    pub kind: Option<ConflictKindArg>,

    /// Resolve the conflict at this index
    #[arg(long, value_name = "INDEX")]
    pub resolve: Option<usize>,

    /// Side kept when resolving
    #[arg(long, value_enum, default_value = "existing")]
    pub keep: KeepArg,
}

/// Arguments for `growth changelog`.
#[derive(Debug, Args)]
pub struct ChangelogArgs {
    /// Only these kinds (e.g. rollback, document-added); repeatable
    #[arg(long = "kind")]
    pub kinds: Vec<String>,

    /// Only this entity type
    #[arg(long)]
    pub entity_type: Option<String>,

    /// Only this entity id
    #[arg(long)]
    pub entity: Option<String>,

    /// Entries at or after this date (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    pub since: Option<String>,

    /// Entries at or before this date (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    pub until: Option<String>,

    /// Only the most recent N entries
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Export instead of printing a table
    #[arg(long, value_enum)]
    pub export: Option<ExportArg>,

    /// Write the export to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Threshold presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PresetArg {
    /// Built-in defaults
    Default,
    /// Report earlier
    Strict,
    /// Report only pronounced problems
    Lenient,
}

/// Severity argument.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum SeverityArg {
    /// Informational
    Info,
    /// Low
    Low,
    /// Medium
    Medium,
    /// High
    High,
    /// Critical
    Critical,
}

/// Version bump argument.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum BumpArg {
    /// x.0.0
    Major,
    /// 0.x.0
    Minor,
    /// 0.0.x
    Patch,
}

/// Processing mode argument.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum ModeArg {
    /// Documents never processed
    NewOnly,
    /// Documents whose content changed
    ModifiedOnly,
    /// New, modified and pending documents
    AllChanged,
    /// Every document still present
    ForceAll,
}

/// Merge mode argument.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum MergeModeArg {
    /// Add unless the id exists
    Append,
    /// Skip id or exact-content matches
    Dedupe,
    /// Overwrite on id match
    Replace,
    /// Also skip near-duplicate claims
    Semantic,
    /// Queue every collision for review
    Conflict,
}

/// Conflict kind argument.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum ConflictKindArg {
    /// Same id or content
    Duplicate,
    /// Near-duplicate claim
    SemanticSimilar,
    /// Same document pages, different claim
    SourceConflict,
}

/// Side kept when resolving a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum KeepArg {
    /// Discard the incoming KU
    Existing,
    /// Replace the stored KUs with the incoming one
    New,
}

/// Changelog export format.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum ExportArg {
    /// Human-readable Markdown
    Markdown,
    /// Machine-readable JSON
    Json,
}

impl From<CliFormat> for crate::config::OutputFormat {
    fn from(format: CliFormat) -> Self {
        match format {
            CliFormat::Table => crate::config::OutputFormat::Table,
            CliFormat::Json => crate::config::OutputFormat::Json,
        }
    }
}

impl From<SeverityArg> for scriptorium_domain::Severity {
    fn from(severity: SeverityArg) -> Self {
        match severity {
            SeverityArg::Info => scriptorium_domain::Severity::Info,
            SeverityArg::Low => scriptorium_domain::Severity::Low,
            SeverityArg::Medium => scriptorium_domain::Severity::Medium,
            SeverityArg::High => scriptorium_domain::Severity::High,
            SeverityArg::Critical => scriptorium_domain::Severity::Critical,
        }
    }
}

impl From<BumpArg> for scriptorium_domain::BumpKind {
    fn from(bump: BumpArg) -> Self {
        match bump {
            BumpArg::Major => scriptorium_domain::BumpKind::Major,
            BumpArg::Minor => scriptorium_domain::BumpKind::Minor,
            BumpArg::Patch => scriptorium_domain::BumpKind::Patch,
        }
    }
}

impl From<ModeArg> for scriptorium_growth::ProcessingMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::NewOnly => scriptorium_growth::ProcessingMode::NewOnly,
            ModeArg::ModifiedOnly => scriptorium_growth::ProcessingMode::ModifiedOnly,
            ModeArg::AllChanged => scriptorium_growth::ProcessingMode::AllChanged,
            ModeArg::ForceAll => scriptorium_growth::ProcessingMode::ForceAll,
        }
    }
}

impl From<MergeModeArg> for scriptorium_growth::MergeMode {
    fn from(mode: MergeModeArg) -> Self {
        match mode {
            MergeModeArg::Append => scriptorium_growth::MergeMode::Append,
            MergeModeArg::Dedupe => scriptorium_growth::MergeMode::Dedupe,
            MergeModeArg::Replace => scriptorium_growth::MergeMode::Replace,
            MergeModeArg::Semantic => scriptorium_growth::MergeMode::Semantic,
            MergeModeArg::Conflict => scriptorium_growth::MergeMode::Conflict,
        }
    }
}

impl From<ConflictKindArg> for scriptorium_growth::ConflictKind {
    fn from(kind: ConflictKindArg) -> Self {
        match kind {
            ConflictKindArg::Duplicate => scriptorium_growth::ConflictKind::Duplicate,
            ConflictKindArg::SemanticSimilar => scriptorium_growth::ConflictKind::SemanticSimilar,
            ConflictKindArg::SourceConflict => scriptorium_growth::ConflictKind::SourceConflict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_chain() {
        let cli = Cli::parse_from(["scriptorium", "--root", "/corpus", "audit", "chain", "ru_1"]);
        assert_eq!(cli.root, PathBuf::from("/corpus"));
        match cli.command {
            Command::Audit(AuditArgs {
                command: AuditCommand::Chain(args),
                ..
            }) => {
                assert_eq!(args.id, "ru_1");
                assert!(!args.dependents);
            }
            _ => panic!("Expected audit chain"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["scriptorium", "growth", "status", "--format", "json", "--no-color"]);
        assert!(matches!(cli.format, Some(CliFormat::Json)));
        assert!(cli.no_color);
        assert!(matches!(cli.command, Command::Growth(GrowthCommand::Status)));
    }

    #[test]
    fn test_preset_after_audit_subcommand() {
        let cli = Cli::parse_from(["scriptorium", "audit", "gaps", "--preset", "strict", "--min-severity", "high"]);
        match cli.command {
            Command::Audit(args) => {
                assert_eq!(args.preset, Some(PresetArg::Strict));
                assert!(matches!(args.command, AuditCommand::Gaps(_)));
            }
            _ => panic!("Expected audit gaps"),
        }
    }

    #[test]
    fn test_process_defaults() {
        let cli = Cli::parse_from(["scriptorium", "growth", "process", "--dry-run"]);
        match cli.command {
            Command::Growth(GrowthCommand::Process(args)) => {
                assert!(matches!(args.mode, ModeArg::AllChanged));
                assert!(args.dry_run);
                assert!(!args.resume);
            }
            _ => panic!("Expected growth process"),
        }
    }

    #[test]
    fn test_merge_resolve() {
        let cli = Cli::parse_from(["scriptorium", "growth", "merge", "--resolve", "2", "--keep", "new"]);
        match cli.command {
            Command::Growth(GrowthCommand::Merge(args)) => {
                assert_eq!(args.resolve, Some(2));
                assert_eq!(args.keep, KeepArg::New);
                assert!(args.file.is_none());
            }
            _ => panic!("Expected growth merge"),
        }
    }

    #[test]
    fn test_enum_conversions() {
        let mode: scriptorium_growth::ProcessingMode = ModeArg::ModifiedOnly.into();
        assert_eq!(mode, scriptorium_growth::ProcessingMode::ModifiedOnly);
        let bump: scriptorium_domain::BumpKind = BumpArg::Minor.into();
        assert_eq!(bump, scriptorium_domain::BumpKind::Minor);
        let kind: scriptorium_growth::ConflictKind = ConflictKindArg::SourceConflict.into();
        assert_eq!(kind, scriptorium_growth::ConflictKind::SourceConflict);
    }
}
