//! Append-only knowledge and reasoning logs with a byte-offset index

use crate::layout::StoreLayout;
use crate::loader::{read_jsonl, LoadReport, Located};
use crate::StoreError;
use scriptorium_domain::{KnowledgeUnit, ReasoningUnit};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Mutex, RwLock};

/// Counts from a promotion batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PromoteOutcome {
    /// Records written to the log
    pub appended: usize,
    /// Records whose id was already present
    pub skipped: usize,
    /// Ids of the appended records, in order
    pub appended_ids: Vec<String>,
}

/// Result of checking the index against the log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexCheck {
    /// Index entries examined
    pub checked: usize,
    /// Index keys whose line does not recompute to the key
    pub mismatched: Vec<String>,
    /// Ids present in the log but absent from the index
    pub missing: Vec<String>,
}

impl IndexCheck {
    /// Whether the index is fully consistent with the log
    pub fn is_consistent(&self) -> bool {
        self.mismatched.is_empty() && self.missing.is_empty()
    }
}

/// The knowledge store: single mutable source of truth for KUs and RUs
///
/// Appends go through one writer lock, so within a process records are never
/// interleaved. Readers take no lock; they bound each scan by the file length
/// observed when it starts.
///
/// # Examples
///
/// ```no_run
/// use scriptorium_domain::{KnowledgeUnit, Source};
/// use scriptorium_store::{KnowledgeStore, StoreLayout};
///
/// let store = KnowledgeStore::open(StoreLayout::new("corpus")).unwrap();
/// let ku = KnowledgeUnit::new("Claim", vec![Source::new("c1", "a.pdf")], 0.8);
/// assert!(store.promote(ku.clone()).unwrap());
/// assert!(!store.promote(ku).unwrap()); // idempotent
/// ```
pub struct KnowledgeStore {
    layout: StoreLayout,
    index: RwLock<BTreeMap<String, u64>>,
    writer: Mutex<()>,
}

impl KnowledgeStore {
    /// Open the store, loading the index or rebuilding it when absent
    pub fn open(layout: StoreLayout) -> Result<Self, StoreError> {
        fs::create_dir_all(layout.root())?;
        let store = Self {
            layout,
            index: RwLock::new(BTreeMap::new()),
            writer: Mutex::new(()),
        };

        let index_path = store.layout.index_path();
        let loaded = if index_path.exists() {
            match fs::read_to_string(&index_path)
                .map_err(StoreError::from)
                .and_then(|s| serde_json::from_str::<BTreeMap<String, u64>>(&s).map_err(StoreError::from))
            {
                Ok(index) => Some(index),
                Err(e) => {
                    tracing::warn!("Index at {} unreadable ({}), rebuilding", index_path.display(), e);
                    None
                }
            }
        } else {
            None
        };

        match loaded {
            Some(index) => *store.index.write().map_err(|_| StoreError::Poisoned)? = index,
            None => {
                store.rebuild_index()?;
            }
        }
        Ok(store)
    }

    /// The layout this store was opened with
    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Load every KU, skipping malformed lines
    pub fn load_knowledge(&self) -> Result<LoadReport<KnowledgeUnit>, StoreError> {
        Ok(self.scan_knowledge()?.map(|l| l.record))
    }

    /// Load every KU with its byte offset
    pub fn scan_knowledge(&self) -> Result<LoadReport<Located<KnowledgeUnit>>, StoreError> {
        read_jsonl(self.layout.knowledge_log())
    }

    /// Load every RU, skipping malformed lines
    pub fn load_reasoning(&self) -> Result<LoadReport<ReasoningUnit>, StoreError> {
        Ok(read_jsonl(self.layout.reasoning_log())?.map(|l: Located<ReasoningUnit>| l.record))
    }

    /// Whether a KU id is present
    pub fn contains(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.index.read().map_err(|_| StoreError::Poisoned)?.contains_key(id))
    }

    /// Number of indexed KUs
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.index.read().map_err(|_| StoreError::Poisoned)?.len())
    }

    /// Whether the store holds no KUs
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// A copy of the current index
    pub fn index(&self) -> Result<BTreeMap<String, u64>, StoreError> {
        Ok(self.index.read().map_err(|_| StoreError::Poisoned)?.clone())
    }

    /// Fetch one KU by seeking to its indexed offset
    pub fn get(&self, id: &str) -> Result<Option<KnowledgeUnit>, StoreError> {
        let offset = match self.index.read().map_err(|_| StoreError::Poisoned)?.get(id) {
            Some(offset) => *offset,
            None => return Ok(None),
        };
        let ku = read_record_at(self.layout.knowledge_log(), offset)?;
        if ku.id != id {
            return Err(StoreError::InvalidData(format!(
                "Index points {} at offset {} but found {}",
                id, offset, ku.id
            )));
        }
        Ok(Some(ku))
    }

    /// Promote one KU; returns `false` when its id is already present
    pub fn promote(&self, ku: KnowledgeUnit) -> Result<bool, StoreError> {
        Ok(self.promote_batch(vec![ku])?.appended == 1)
    }

    /// Promote a batch of KUs
    ///
    /// Each KU's id is recomputed from its content before the lookup, so the
    /// same extraction result promoted twice appends nothing the second time.
    pub fn promote_batch(&self, kus: Vec<KnowledgeUnit>) -> Result<PromoteOutcome, StoreError> {
        let _guard = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        let mut outcome = PromoteOutcome::default();
        if kus.is_empty() {
            return Ok(outcome);
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.layout.knowledge_log())?;
        let mut offset = file.metadata()?.len();
        let mut index = self.index.write().map_err(|_| StoreError::Poisoned)?;

        for mut ku in kus {
            ku.id = ku.recompute_id();
            if index.contains_key(&ku.id) {
                tracing::debug!("KU {} already present, skipping", ku.id);
                outcome.skipped += 1;
                continue;
            }
            let mut line = serde_json::to_string(&ku)?;
            line.push('\n');
            file.write_all(line.as_bytes())?;
            index.insert(ku.id.clone(), offset);
            offset += line.len() as u64;
            outcome.appended += 1;
            outcome.appended_ids.push(ku.id);
        }
        file.sync_data()?;

        if outcome.appended > 0 {
            write_index(&self.layout.index_path(), &index)?;
            tracing::info!(
                "Promoted {} KU(s), {} already present",
                outcome.appended,
                outcome.skipped
            );
        }
        Ok(outcome)
    }

    /// Append RUs whose id is not yet in the reasoning log
    ///
    /// An empty hash is filled from the content; an empty id is derived from
    /// the hash.
    pub fn append_reasoning(&self, rus: Vec<ReasoningUnit>) -> Result<usize, StoreError> {
        let _guard = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        let mut existing: BTreeSet<String> = self
            .load_reasoning()?
            .records
            .into_iter()
            .map(|ru| ru.id)
            .collect();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.layout.reasoning_log())?;
        let mut appended = 0;
        for mut ru in rus {
            if ru.hash.is_empty() {
                ru.hash = ru.recompute_hash();
            }
            if ru.id.is_empty() {
                ru.id = scriptorium_domain::hashing::prefixed_id("ru", &ru.hash);
            }
            if !existing.insert(ru.id.clone()) {
                continue;
            }
            let mut line = serde_json::to_string(&ru)?;
            line.push('\n');
            file.write_all(line.as_bytes())?;
            appended += 1;
        }
        file.sync_data()?;
        Ok(appended)
    }

    /// Check that both logs parse completely, so a rewrite loses nothing
    ///
    /// Multi-log rewrites call this before taking their backup.
    pub fn ensure_rewritable(&self) -> Result<(), StoreError> {
        ensure_clean::<KnowledgeUnit>(self.layout.knowledge_log())?;
        ensure_clean::<ReasoningUnit>(self.layout.reasoning_log())
    }

    /// Replace the knowledge log wholesale and rebuild the index
    ///
    /// Callers take a backup first; see `BackupProvider`. Fails with
    /// `StoreError::UncleanLog` while the live log holds unparsable lines,
    /// since the replacement could not carry them.
    pub fn rewrite_knowledge(&self, kus: &[KnowledgeUnit]) -> Result<(), StoreError> {
        {
            let _guard = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
            ensure_clean::<KnowledgeUnit>(self.layout.knowledge_log())?;
            write_lines_atomic(self.layout.knowledge_log(), kus)?;
        }
        self.rebuild_index()?;
        tracing::info!("Rewrote knowledge log with {} KU(s)", kus.len());
        Ok(())
    }

    /// Replace the reasoning log wholesale; refuses an unclean log
    pub fn rewrite_reasoning(&self, rus: &[ReasoningUnit]) -> Result<(), StoreError> {
        let _guard = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        ensure_clean::<ReasoningUnit>(self.layout.reasoning_log())?;
        write_lines_atomic(self.layout.reasoning_log(), rus)?;
        tracing::info!("Rewrote reasoning log with {} RU(s)", rus.len());
        Ok(())
    }

    /// Rebuild the index from the log; the first line for an id wins
    pub fn rebuild_index(&self) -> Result<usize, StoreError> {
        let scan = self.scan_knowledge()?;
        let mut rebuilt = BTreeMap::new();
        for located in scan.records {
            rebuilt.entry(located.record.id).or_insert(located.offset);
        }
        write_index(&self.layout.index_path(), &rebuilt)?;
        let count = rebuilt.len();
        *self.index.write().map_err(|_| StoreError::Poisoned)? = rebuilt;
        tracing::debug!("Rebuilt knowledge index with {} entries", count);
        Ok(count)
    }

    /// Check that every index entry points at a line whose recomputed id
    /// equals the key, and that every logged id is indexed
    pub fn verify_index(&self) -> Result<IndexCheck, StoreError> {
        let index = self.index()?;
        let mut check = IndexCheck::default();

        for (id, offset) in &index {
            check.checked += 1;
            match read_record_at(self.layout.knowledge_log(), *offset) {
                Ok(ku) if ku.recompute_id() == *id => {}
                Ok(_) | Err(_) => check.mismatched.push(id.clone()),
            }
        }

        let logged: BTreeSet<String> = self
            .load_knowledge()?
            .records
            .into_iter()
            .map(|ku| ku.id)
            .collect();
        check.missing = logged.into_iter().filter(|id| !index.contains_key(id)).collect();
        Ok(check)
    }
}

fn read_record_at(path: &Path, offset: u64) -> Result<KnowledgeUnit, StoreError> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut line = Vec::new();
    BufReader::new(file).read_until(b'\n', &mut line)?;
    Ok(serde_json::from_slice(line.trim_ascii())?)
}

fn ensure_clean<T: DeserializeOwned>(path: &Path) -> Result<(), StoreError> {
    let scan = read_jsonl::<T>(path)?;
    if scan.is_clean() {
        return Ok(());
    }
    Err(StoreError::UncleanLog {
        path: path.display().to_string(),
        lines: scan.errors.iter().map(|e| e.line).collect(),
    })
}

fn write_index(path: &Path, index: &BTreeMap<String, u64>) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec(index)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn write_lines_atomic<T: Serialize>(path: &Path, records: &[T]) -> Result<(), StoreError> {
    let tmp = path.with_extension("jsonl.tmp");
    {
        let mut file = File::create(&tmp)?;
        for record in records {
            let mut line = serde_json::to_string(record)?;
            line.push('\n');
            file.write_all(line.as_bytes())?;
        }
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
