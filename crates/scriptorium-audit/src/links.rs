//! Broken-reference detection and repair
//!
//! Three reference classes are checked independently: KU -> chunk,
//! KU -> document and RU -> KU.

use crate::view::{normalize_document_path, CorpusView};
use crate::AuditError;
use scriptorium_domain::{BackupProvider, KnowledgeUnit, ReasoningUnit, Severity};
use scriptorium_store::KnowledgeStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Class of reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LinkKind {
    /// KU source pointing at a chunk
    #[serde(rename = "ku->chunk")]
    KuChunk,
    /// KU source pointing at a document
    #[serde(rename = "ku->document")]
    KuDocument,
    /// RU member pointing at a KU
    #[serde(rename = "ru->ku")]
    RuKu,
}

impl LinkKind {
    /// Name used in reports
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkKind::KuChunk => "ku->chunk",
            LinkKind::KuDocument => "ku->document",
            LinkKind::RuKu => "ru->ku",
        }
    }

    /// Severity of a broken reference of this class
    pub fn severity(&self) -> Severity {
        match self {
            LinkKind::KuChunk | LinkKind::RuKu => Severity::Critical,
            LinkKind::KuDocument => Severity::High,
        }
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reference whose target does not exist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokenLink {
    /// Reference class
    pub kind: LinkKind,
    /// Referencing entity
    pub source_id: String,
    /// Missing target
    pub target_id: String,
    /// Severity
    pub severity: Severity,
}

/// Corpus-wide link check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkReport {
    /// References checked, per class
    pub checked: BTreeMap<String, usize>,
    /// Broken references
    pub broken: Vec<BrokenLink>,
    /// `(checked - broken) / checked * 100`, 100 when nothing was checked
    pub integrity_score: f64,
    /// KU -> chunk references were not checked
    pub chunk_checks_skipped: bool,
}

impl LinkReport {
    /// Total references checked
    pub fn total_checked(&self) -> usize {
        self.checked.values().sum()
    }
}

/// Link check for one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityLinks {
    /// The KU or RU checked
    pub entity_id: String,
    /// References checked
    pub checked: usize,
    /// Broken references
    pub broken: Vec<BrokenLink>,
    /// Whether every reference resolved
    pub chain_complete: bool,
}

/// Checks references against existence
pub struct LinkDetector<'a> {
    view: &'a CorpusView,
    ku_ids: BTreeSet<&'a str>,
}

impl<'a> LinkDetector<'a> {
    /// Create a detector over `view`
    pub fn new(view: &'a CorpusView) -> Self {
        Self {
            view,
            ku_ids: view.ku_ids(),
        }
    }

    fn check_ku(&self, ku: &KnowledgeUnit, checked: &mut BTreeMap<String, usize>, broken: &mut Vec<BrokenLink>) {
        for source in &ku.sources {
            if self.view.chunks_available() && !source.chunk_id.is_empty() {
                *checked.entry(LinkKind::KuChunk.to_string()).or_default() += 1;
                if self.view.chunk(&source.chunk_id).is_none() {
                    broken.push(broken_link(LinkKind::KuChunk, &ku.id, &source.chunk_id));
                }
            }
            if !source.path.is_empty() {
                *checked.entry(LinkKind::KuDocument.to_string()).or_default() += 1;
                if !self.view.has_document(&source.path) {
                    broken.push(broken_link(
                        LinkKind::KuDocument,
                        &ku.id,
                        normalize_document_path(&source.path),
                    ));
                }
            }
        }
    }

    fn check_ru(&self, ru: &ReasoningUnit, checked: &mut BTreeMap<String, usize>, broken: &mut Vec<BrokenLink>) {
        for ku_id in &ru.knowledge_ids {
            *checked.entry(LinkKind::RuKu.to_string()).or_default() += 1;
            if !self.ku_ids.contains(ku_id.as_str()) {
                broken.push(broken_link(LinkKind::RuKu, &ru.id, ku_id));
            }
        }
    }

    /// Check every reference in the corpus
    pub fn detect_all(&self) -> LinkReport {
        let mut checked = BTreeMap::new();
        let mut broken = Vec::new();
        for ku in &self.view.kus {
            self.check_ku(ku, &mut checked, &mut broken);
        }
        for ru in &self.view.rus {
            self.check_ru(ru, &mut checked, &mut broken);
        }

        let total: usize = checked.values().sum();
        let report = LinkReport {
            integrity_score: integrity(total, broken.len()),
            checked,
            broken,
            chunk_checks_skipped: !self.view.chunks_available(),
        };
        tracing::debug!(
            "Checked {} reference(s), {} broken",
            report.total_checked(),
            report.broken.len()
        );
        report
    }

    /// Check the references of one KU
    pub fn detect_ku_links(&self, ku_id: &str) -> Result<EntityLinks, AuditError> {
        let ku = self
            .view
            .ku(ku_id)
            .ok_or_else(|| AuditError::NotFound(ku_id.to_string()))?;
        let mut checked = BTreeMap::new();
        let mut broken = Vec::new();
        self.check_ku(ku, &mut checked, &mut broken);
        Ok(entity_links(ku_id, checked, broken))
    }

    /// Check the references of one RU
    pub fn detect_ru_links(&self, ru_id: &str) -> Result<EntityLinks, AuditError> {
        let ru = self
            .view
            .ru(ru_id)
            .ok_or_else(|| AuditError::NotFound(ru_id.to_string()))?;
        let mut checked = BTreeMap::new();
        let mut broken = Vec::new();
        self.check_ru(ru, &mut checked, &mut broken);
        Ok(entity_links(ru_id, checked, broken))
    }
}

fn broken_link(kind: LinkKind, source: &str, target: &str) -> BrokenLink {
    BrokenLink {
        kind,
        source_id: source.to_string(),
        target_id: target.to_string(),
        severity: kind.severity(),
    }
}

fn entity_links(id: &str, checked: BTreeMap<String, usize>, broken: Vec<BrokenLink>) -> EntityLinks {
    EntityLinks {
        entity_id: id.to_string(),
        checked: checked.values().sum(),
        chain_complete: broken.is_empty(),
        broken,
    }
}

fn integrity(checked: usize, broken: usize) -> f64 {
    if checked == 0 {
        100.0
    } else {
        checked.saturating_sub(broken) as f64 / checked as f64 * 100.0
    }
}

/// A KU whose dangling chunk sources were stripped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KuFix {
    /// Id before the repair
    pub old_id: String,
    /// Id recomputed from the remaining sources
    pub new_id: String,
    /// Chunk ids removed
    pub removed_chunks: Vec<String>,
}

/// An RU whose member list was rewritten
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuFix {
    /// RU id
    pub ru_id: String,
    /// Member ids dropped because no KU carries them
    pub removed_ids: Vec<String>,
    /// Member ids rewritten to a repaired KU's new id, as `(old, new)`
    pub remapped_ids: Vec<(String, String)>,
}

/// What a repair changes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairPlan {
    /// KU rewrites
    pub ku_fixes: Vec<KuFix>,
    /// RU rewrites
    pub ru_fixes: Vec<RuFix>,
    /// KUs that would be left without any source; kept unchanged
    pub unrepairable: Vec<String>,
}

impl RepairPlan {
    /// Whether the repair changes nothing
    pub fn is_empty(&self) -> bool {
        self.ku_fixes.is_empty() && self.ru_fixes.is_empty()
    }
}

/// A repair plan together with the rewritten records
#[derive(Debug, Clone)]
pub struct Repair {
    /// Summary of the changes
    pub plan: RepairPlan,
    /// Knowledge log after repair
    pub kus: Vec<KnowledgeUnit>,
    /// Reasoning log after repair
    pub rus: Vec<ReasoningUnit>,
}

/// Compute the repaired logs without touching disk
///
/// Dangling KU -> chunk sources are stripped (only when chunk metadata is
/// available) and the KU id recomputed; RU references follow the new id.
/// RU members that match no KU are then dropped and the RU hash recomputed.
/// Nothing is ever invented to replace a missing target.
pub fn plan_repair(view: &CorpusView) -> Repair {
    let mut plan = RepairPlan::default();
    let mut renamed: BTreeMap<String, String> = BTreeMap::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut kus = Vec::with_capacity(view.kus.len());

    for ku in &view.kus {
        let mut ku = ku.clone();
        if view.chunks_available() {
            let (kept, removed): (Vec<_>, Vec<_>) = ku
                .sources
                .iter()
                .cloned()
                .partition(|s| s.chunk_id.is_empty() || view.chunk(&s.chunk_id).is_some());
            if !removed.is_empty() {
                if kept.is_empty() {
                    tracing::warn!("KU {} has no resolvable source, leaving it unchanged", ku.id);
                    plan.unrepairable.push(ku.id.clone());
                } else {
                    let old_id = ku.id.clone();
                    ku.sources = kept;
                    ku.id = ku.recompute_id();
                    renamed.insert(old_id.clone(), ku.id.clone());
                    plan.ku_fixes.push(KuFix {
                        old_id,
                        new_id: ku.id.clone(),
                        removed_chunks: removed.into_iter().map(|s| s.chunk_id).collect(),
                    });
                }
            }
        }
        if seen.insert(ku.id.clone()) {
            kus.push(ku);
        } else {
            tracing::debug!("Repaired KU {} collapses into an existing KU", ku.id);
        }
    }

    let mut rus = Vec::with_capacity(view.rus.len());
    for ru in &view.rus {
        let mut ru = ru.clone();
        let mut fix = RuFix {
            ru_id: ru.id.clone(),
            removed_ids: Vec::new(),
            remapped_ids: Vec::new(),
        };
        let mut members = Vec::with_capacity(ru.knowledge_ids.len());
        for id in &ru.knowledge_ids {
            let target = match renamed.get(id) {
                Some(new_id) => {
                    fix.remapped_ids.push((id.clone(), new_id.clone()));
                    new_id.clone()
                }
                None => id.clone(),
            };
            if seen.contains(&target) {
                members.push(target);
            } else {
                fix.removed_ids.push(target);
            }
        }
        if !fix.removed_ids.is_empty() || !fix.remapped_ids.is_empty() {
            ru.knowledge_ids = members;
            ru.hash = ru.recompute_hash();
            plan.ru_fixes.push(fix);
        }
        rus.push(ru);
    }

    Repair { plan, kus, rus }
}

/// Write a repair to disk after taking a backup
///
/// Returns the backup id, or `None` when there was nothing to change.
pub fn apply_repair<B>(store: &KnowledgeStore, backup: &B, repair: &Repair) -> Result<Option<String>, AuditError>
where
    B: BackupProvider,
    B::Error: fmt::Display,
{
    if repair.plan.is_empty() {
        return Ok(None);
    }
    store.ensure_rewritable()?;
    let backup_id = backup
        .backup("link repair")
        .map_err(|e| AuditError::Backup(e.to_string()))?;

    if !repair.plan.ku_fixes.is_empty() {
        store.rewrite_knowledge(&repair.kus)?;
    }
    if !repair.plan.ru_fixes.is_empty() {
        store.rewrite_reasoning(&repair.rus)?;
    }
    tracing::info!(
        "Repaired {} KU(s) and {} RU(s), backup {}",
        repair.plan.ku_fixes.len(),
        repair.plan.ru_fixes.len(),
        backup_id
    );
    Ok(Some(backup_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptorium_domain::{ChunkMetadata, Source};

    fn view_with(kus: Vec<KnowledgeUnit>, rus: Vec<ReasoningUnit>, chunks: &[&str]) -> CorpusView {
        CorpusView::from_parts(
            kus,
            rus,
            Some(chunks.iter().map(|c| ChunkMetadata::new(*c, "a.pdf")).collect()),
            ["a.pdf".to_string()],
            "/docs",
        )
    }

    #[test]
    fn test_clean_corpus_scores_100() {
        let ku = KnowledgeUnit::new("x", vec![Source::new("c1", "a.pdf")], 0.5);
        let ru = ReasoningUnit::new("supports", "t", vec![ku.id.clone()], 1.0);
        let view = view_with(vec![ku], vec![ru], &["c1"]);
        let report = LinkDetector::new(&view).detect_all();
        assert!(report.broken.is_empty());
        assert_eq!(report.integrity_score, 100.0);
        assert_eq!(report.total_checked(), 3);
    }

    #[test]
    fn test_dangling_ru_member() {
        let ru = ReasoningUnit::new("supports", "t", vec!["ku_gone".into()], 1.0);
        let view = view_with(vec![], vec![ru.clone()], &[]);
        let links = LinkDetector::new(&view).detect_ru_links(&ru.id).unwrap();
        assert!(!links.chain_complete);
        assert_eq!(links.broken[0].kind, LinkKind::RuKu);
        assert_eq!(links.broken[0].severity, Severity::Critical);
    }

    #[test]
    fn test_skips_chunk_checks_without_store() {
        let ku = KnowledgeUnit::new("x", vec![Source::new("c1", "a.pdf")], 0.5);
        let view = CorpusView::from_parts(vec![ku], vec![], None, ["a.pdf".to_string()], "/docs");
        let report = LinkDetector::new(&view).detect_all();
        assert!(report.chunk_checks_skipped);
        assert!(report.broken.is_empty());
    }

    #[test]
    fn test_repair_strips_and_remaps() {
        let ku = KnowledgeUnit::new(
            "x",
            vec![Source::new("c1", "a.pdf"), Source::new("c_gone", "a.pdf")],
            0.5,
        );
        let old_id = ku.id.clone();
        let ru = ReasoningUnit::new("supports", "t", vec![old_id.clone(), "ku_gone".into()], 1.0);
        let view = view_with(vec![ku], vec![ru], &["c1"]);

        let repair = plan_repair(&view);
        assert_eq!(repair.plan.ku_fixes.len(), 1);
        let new_id = repair.plan.ku_fixes[0].new_id.clone();
        assert_ne!(new_id, old_id);
        assert_eq!(repair.kus[0].id, new_id);
        assert_eq!(repair.rus[0].knowledge_ids, vec![new_id]);
        assert!(repair.rus[0].hash_matches());
        assert_eq!(repair.plan.ru_fixes[0].removed_ids, vec!["ku_gone".to_string()]);
    }

    #[test]
    fn test_zero_source_ku_is_unrepairable() {
        let ku = KnowledgeUnit::new("x", vec![Source::new("c_gone", "a.pdf")], 0.5);
        let view = view_with(vec![ku.clone()], vec![], &[]);
        let repair = plan_repair(&view);
        assert_eq!(repair.plan.unrepairable, vec![ku.id.clone()]);
        assert_eq!(repair.kus[0], ku);
        assert!(repair.plan.is_empty());
    }
}
