//! Merging newly extracted KUs into the store, and the conflict queue

use crate::changelog::{ChangeKind, Impact, NewChange};
use crate::config::MergeConfig;
use crate::snapshot::{write_json_atomic, VersionManager};
use crate::GrowthError;
use chrono::{DateTime, Utc};
use scriptorium_domain::similarity::{jaccard, jaccard_tokens, tokenize};
use scriptorium_domain::{BackupProvider, KnowledgeUnit};
use scriptorium_store::KnowledgeStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

/// How a batch is reconciled with the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    /// Add anything whose id is not stored yet
    Append,
    /// Skip id matches and exact-claim matches
    Dedupe,
    /// Overwrite id matches, append the rest
    Replace,
    /// Dedupe, and also skip near-duplicate claims
    Semantic,
    /// Queue every collision for review; append only novel KUs
    Conflict,
}

impl MergeMode {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMode::Append => "append",
            MergeMode::Dedupe => "dedupe",
            MergeMode::Replace => "replace",
            MergeMode::Semantic => "semantic",
            MergeMode::Conflict => "conflict",
        }
    }
}

impl FromStr for MergeMode {
    type Err = GrowthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "append" => Ok(MergeMode::Append),
            "dedupe" | "dedup" => Ok(MergeMode::Dedupe),
            "replace" => Ok(MergeMode::Replace),
            "semantic" => Ok(MergeMode::Semantic),
            "conflict" => Ok(MergeMode::Conflict),
            other => Err(GrowthError::Invalid(format!("unknown merge mode '{}'", other))),
        }
    }
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a KU was queued for review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictKind {
    /// Same id or same normalized claim
    Duplicate,
    /// Claim similarity at or above the threshold
    SemanticSimilar,
    /// Different claim citing the same document pages
    SourceConflict,
}

impl ConflictKind {
    /// Kebab-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::Duplicate => "duplicate",
            ConflictKind::SemanticSimilar => "semantic-similar",
            ConflictKind::SourceConflict => "source-conflict",
        }
    }
}

impl FromStr for ConflictKind {
    type Err = GrowthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_lowercase()))
            .map_err(|_| GrowthError::Invalid(format!("unknown conflict kind '{}'", s)))
    }
}

/// How a conflict was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    /// The new KU was discarded
    KeepExisting,
    /// The existing KUs were replaced by the new one
    KeepNew,
}

/// A new KU colliding with one or more stored KUs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConflict {
    /// Conflict id (UUIDv7)
    pub id: String,
    /// Collision kind
    pub kind: ConflictKind,
    /// Incoming KU
    pub new_ku: KnowledgeUnit,
    /// Every stored KU it collides with
    pub existing: Vec<KnowledgeUnit>,
    /// Highest claim similarity against `existing`
    pub similarity: f64,
    /// Set once resolved
    #[serde(default)]
    pub resolution: Option<Resolution>,
    /// When it was detected
    pub detected_at: DateTime<Utc>,
}

/// Result of a merge, real or dry-run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeOutcome {
    /// Mode used
    pub mode: MergeMode,
    /// Whether anything was written
    pub dry_run: bool,
    /// KUs appended
    pub added: usize,
    /// Stored KUs overwritten
    pub updated: usize,
    /// KUs dropped as duplicates
    pub skipped: usize,
    /// Ids appended or overwritten
    pub changed_ids: Vec<String>,
    /// Collisions queued for review
    pub conflicts: Vec<MergeConflict>,
    /// Snapshot taken before a rewrite
    pub backup: Option<String>,
}

enum Decision {
    Add,
    Update,
    Skip,
    Queue(MergeConflict),
}

/// Stored KUs with the lookups a merge consults for every incoming KU
///
/// Tokens and content hashes are computed once per entry.
struct Pool {
    kus: Vec<KnowledgeUnit>,
    tokens: Vec<BTreeSet<String>>,
    hashes: Vec<String>,
    by_id: HashMap<String, usize>,
    by_content: HashMap<String, usize>,
}

impl Pool {
    fn new(kus: Vec<KnowledgeUnit>) -> Self {
        let mut pool = Self {
            kus: Vec::with_capacity(kus.len()),
            tokens: Vec::with_capacity(kus.len()),
            hashes: Vec::with_capacity(kus.len()),
            by_id: HashMap::new(),
            by_content: HashMap::new(),
        };
        for ku in kus {
            pool.push(ku);
        }
        pool
    }

    fn push(&mut self, ku: KnowledgeUnit) {
        let i = self.kus.len();
        let hash = ku.content_hash();
        self.by_id.entry(ku.id.clone()).or_insert(i);
        self.by_content.entry(hash.clone()).or_insert(i);
        self.tokens.push(tokenize(&ku.claim));
        self.hashes.push(hash);
        self.kus.push(ku);
    }

    /// Overwrite the entry holding `ku.id`; false when there is none
    fn replace(&mut self, ku: KnowledgeUnit) -> bool {
        let Some(&i) = self.by_id.get(&ku.id) else {
            return false;
        };
        self.tokens[i] = tokenize(&ku.claim);
        self.kus[i] = ku;
        true
    }
}

/// Reconciles batches with a knowledge store
///
/// # Examples
///
/// ```no_run
/// use scriptorium_growth::{MergeConfig, MergeMode, MergeStrategy, VersionManager};
/// use scriptorium_store::{KnowledgeStore, StoreLayout};
///
/// let layout = StoreLayout::new("corpus");
/// let store = KnowledgeStore::open(layout.clone()).unwrap();
/// let versions = VersionManager::open(layout).unwrap();
/// let strategy = MergeStrategy::new(&store, MergeConfig::default());
/// let preview = strategy.merge(Vec::new(), MergeMode::Semantic, true, &versions).unwrap();
/// println!("{} would be added", preview.added);
/// ```
pub struct MergeStrategy<'a> {
    store: &'a KnowledgeStore,
    config: MergeConfig,
}

impl<'a> MergeStrategy<'a> {
    /// Create a strategy over `store`
    pub fn new(store: &'a KnowledgeStore, config: MergeConfig) -> Self {
        Self { store, config }
    }

    fn similar<'k>(&self, ku: &KnowledgeUnit, pool: &'k Pool) -> (f64, Vec<&'k KnowledgeUnit>) {
        let tokens = tokenize(&ku.claim);
        let mut best = 0.0f64;
        let mut hits = Vec::new();
        for (other, other_tokens) in pool.kus.iter().zip(&pool.tokens) {
            let score = jaccard_tokens(&tokens, other_tokens);
            if score >= self.config.similarity_threshold {
                best = best.max(score);
                hits.push(other);
            }
        }
        (best, hits)
    }

    /// Every stored KU that cites overlapping pages of a shared document
    /// with a different claim
    fn source_collisions<'k>(ku: &KnowledgeUnit, pool: &'k Pool) -> Vec<&'k KnowledgeUnit> {
        let hash = ku.content_hash();
        pool.kus
            .iter()
            .zip(&pool.hashes)
            .filter(|(_, other_hash)| **other_hash != hash)
            .map(|(other, _)| other)
            .filter(|other| {
                ku.sources.iter().any(|mine| {
                    other.sources.iter().any(|theirs| {
                        mine.path == theirs.path
                            && !mine.path.is_empty()
                            && matches!((mine.pages, theirs.pages), (Some(a), Some(b)) if a.overlaps(&b))
                    })
                })
            })
            .collect()
    }

    fn conflict(kind: ConflictKind, ku: &KnowledgeUnit, existing: Vec<&KnowledgeUnit>, similarity: f64) -> MergeConflict {
        MergeConflict {
            id: Uuid::now_v7().to_string(),
            kind,
            new_ku: ku.clone(),
            existing: existing.into_iter().cloned().collect(),
            similarity,
            resolution: None,
            detected_at: Utc::now(),
        }
    }

    fn decide(&self, ku: &KnowledgeUnit, mode: MergeMode, pool: &Pool) -> Decision {
        let id_match = pool.by_id.get(&ku.id).map(|&i| &pool.kus[i]);
        let content_match = pool.by_content.get(&ku.content_hash()).map(|&i| &pool.kus[i]);
        match mode {
            MergeMode::Append => match id_match {
                Some(_) => Decision::Skip,
                None => Decision::Add,
            },
            MergeMode::Replace => match id_match {
                Some(_) => Decision::Update,
                None => Decision::Add,
            },
            MergeMode::Dedupe => match id_match.or(content_match) {
                Some(_) => Decision::Skip,
                None => Decision::Add,
            },
            MergeMode::Semantic => {
                if id_match.or(content_match).is_some() || !self.similar(ku, pool).1.is_empty() {
                    Decision::Skip
                } else {
                    Decision::Add
                }
            }
            MergeMode::Conflict => {
                if let Some(existing) = id_match.or(content_match) {
                    return Decision::Queue(Self::conflict(ConflictKind::Duplicate, ku, vec![existing], 1.0));
                }
                let (score, hits) = self.similar(ku, pool);
                if !hits.is_empty() {
                    return Decision::Queue(Self::conflict(ConflictKind::SemanticSimilar, ku, hits, score));
                }
                let collisions = Self::source_collisions(ku, pool);
                if !collisions.is_empty() {
                    let score = collisions
                        .iter()
                        .map(|other| jaccard(&ku.claim, &other.claim))
                        .fold(0.0, f64::max);
                    return Decision::Queue(Self::conflict(ConflictKind::SourceConflict, ku, collisions, score));
                }
                Decision::Add
            }
        }
    }

    /// Reconcile `batch` with the store
    ///
    /// KU ids are recomputed from content first. A dry run returns exactly
    /// what the real run would do without writing anything. Replace mode
    /// takes a backup through `backup` before rewriting the log.
    pub fn merge<B>(
        &self,
        batch: Vec<KnowledgeUnit>,
        mode: MergeMode,
        dry_run: bool,
        backup: &B,
    ) -> Result<MergeOutcome, GrowthError>
    where
        B: BackupProvider,
        B::Error: fmt::Display,
    {
        self.config.validate()?;
        let mut pool = Pool::new(self.store.load_knowledge()?.records);
        let stored = pool.kus.len();

        let mut outcome = MergeOutcome {
            mode,
            dry_run,
            added: 0,
            updated: 0,
            skipped: 0,
            changed_ids: Vec::new(),
            conflicts: Vec::new(),
            backup: None,
        };

        for mut ku in batch {
            ku.id = ku.recompute_id();
            match self.decide(&ku, mode, &pool) {
                Decision::Skip => {
                    tracing::debug!("Skipping duplicate {}", ku.id);
                    outcome.skipped += 1;
                }
                Decision::Queue(conflict) => {
                    tracing::debug!("Queued {} as {}", ku.id, conflict.kind.as_str());
                    outcome.conflicts.push(conflict);
                }
                Decision::Update => {
                    let id = ku.id.clone();
                    if pool.replace(ku) {
                        outcome.changed_ids.push(id);
                        outcome.updated += 1;
                    }
                }
                Decision::Add => {
                    outcome.changed_ids.push(ku.id.clone());
                    pool.push(ku);
                    outcome.added += 1;
                }
            }
        }

        tracing::info!(
            "Merge ({}{}): {} added, {} updated, {} skipped, {} conflict(s)",
            mode,
            if dry_run { ", dry run" } else { "" },
            outcome.added,
            outcome.updated,
            outcome.skipped,
            outcome.conflicts.len()
        );
        if dry_run {
            return Ok(outcome);
        }

        if outcome.updated > 0 {
            self.store.ensure_rewritable()?;
            let id = backup
                .backup("replace merge")
                .map_err(|e| GrowthError::Backup(e.to_string()))?;
            self.store.rewrite_knowledge(&pool.kus)?;
            outcome.backup = Some(id);
        } else if outcome.added > 0 {
            let fresh = pool.kus.split_off(stored);
            self.store.promote_batch(fresh)?;
        }

        if !outcome.conflicts.is_empty() {
            ConflictStore::new(self.store.layout().conflicts_path()).append(outcome.conflicts.clone())?;
        }
        Ok(outcome)
    }
}

/// Open merge conflicts (`conflicts.json`)
pub struct ConflictStore {
    path: PathBuf,
}

impl ConflictStore {
    /// Conflict queue stored at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every open conflict, oldest first
    pub fn load(&self) -> Result<Vec<MergeConflict>, GrowthError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&fs::read_to_string(&self.path)?)?)
    }

    fn save(&self, conflicts: &[MergeConflict]) -> Result<(), GrowthError> {
        write_json_atomic(&self.path, &conflicts)
    }

    /// Open conflicts with their queue index, optionally of one kind
    pub fn list(&self, kind: Option<ConflictKind>) -> Result<Vec<(usize, MergeConflict)>, GrowthError> {
        Ok(self
            .load()?
            .into_iter()
            .enumerate()
            .filter(|(_, c)| kind.is_none_or(|k| c.kind == k))
            .collect())
    }

    /// Queue more conflicts
    pub fn append(&self, conflicts: Vec<MergeConflict>) -> Result<usize, GrowthError> {
        let mut all = self.load()?;
        all.extend(conflicts);
        self.save(&all)?;
        Ok(all.len())
    }

    /// Settle the conflict at `index` and drop it from the queue
    ///
    /// Keeping the existing KUs just discards the new one. Keeping the new
    /// KU takes a backup, removes every KU in the colliding set, appends
    /// the new one, and points RUs that cited the removed ids at it.
    pub fn resolve(
        &self,
        index: usize,
        keep_existing: bool,
        store: &KnowledgeStore,
        versions: &VersionManager,
    ) -> Result<MergeConflict, GrowthError> {
        let mut all = self.load()?;
        if index >= all.len() {
            return Err(GrowthError::ConflictNotFound(index));
        }
        let mut conflict = all.remove(index);

        if keep_existing {
            conflict.resolution = Some(Resolution::KeepExisting);
        } else {
            store.ensure_rewritable()?;
            versions.backup(&format!("conflict resolution {}", conflict.id))?;
            let replaced: BTreeSet<String> = conflict.existing.iter().map(|k| k.id.clone()).collect();
            let new_id = conflict.new_ku.recompute_id();

            let mut kus: Vec<KnowledgeUnit> = store
                .load_knowledge()?
                .records
                .into_iter()
                .filter(|k| !replaced.contains(&k.id) && k.id != new_id)
                .collect();
            let mut new_ku = conflict.new_ku.clone();
            new_ku.id = new_id.clone();
            kus.push(new_ku);
            store.rewrite_knowledge(&kus)?;

            let remap: BTreeMap<&str, &str> = replaced.iter().map(|old| (old.as_str(), new_id.as_str())).collect();
            let mut touched = 0usize;
            let rus = store
                .load_reasoning()?
                .records
                .into_iter()
                .map(|mut ru| {
                    if ru.knowledge_ids.iter().any(|id| remap.contains_key(id.as_str())) {
                        let mut seen = BTreeSet::new();
                        ru.knowledge_ids = ru
                            .knowledge_ids
                            .iter()
                            .map(|id| remap.get(id.as_str()).map_or_else(|| id.clone(), |n| n.to_string()))
                            .filter(|id| seen.insert(id.clone()))
                            .collect();
                        ru.hash = ru.recompute_hash();
                        touched += 1;
                    }
                    ru
                })
                .collect::<Vec<_>>();
            if touched > 0 {
                store.rewrite_reasoning(&rus)?;
            }
            conflict.resolution = Some(Resolution::KeepNew);
            tracing::info!(
                "Replaced {} KU(s) with {}; remapped {} RU(s)",
                replaced.len(),
                new_id,
                touched
            );
        }

        self.save(&all)?;
        versions.record(
            NewChange::new(
                ChangeKind::Merge,
                "conflict",
                &conflict.id,
                format!(
                    "Resolved {} conflict: {}",
                    conflict.kind.as_str(),
                    if keep_existing { "kept existing" } else { "kept new" }
                ),
            )
            .impact(if keep_existing { Impact::Low } else { Impact::High }),
        )?;
        Ok(conflict)
    }
}
