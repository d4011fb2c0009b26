//! Merge modes and conflict resolution against a real store

use scriptorium_domain::{KnowledgeUnit, PageRange, ReasoningUnit, Source};
use scriptorium_growth::{
    ConflictKind, ConflictStore, GrowthError, MergeConfig, MergeMode, MergeStrategy, Resolution, VersionManager,
};
use scriptorium_store::{KnowledgeStore, StoreError, StoreLayout};
use std::fs;
use std::io::Write;
use tempfile::tempdir;

fn cite(claim: &str, chunk: &str, pages: (u32, u32)) -> KnowledgeUnit {
    KnowledgeUnit::new(
        claim,
        vec![Source::new(chunk, "physics/a.pdf").with_pages(PageRange::new(pages.0, pages.1))],
        0.7,
    )
}

struct Fixture {
    _dir: tempfile::TempDir,
    layout: StoreLayout,
    store: KnowledgeStore,
    versions: VersionManager,
}

fn fixture() -> Fixture {
    let dir = tempdir().unwrap();
    let layout = StoreLayout::new(dir.path());
    layout.ensure_dirs().unwrap();
    let store = KnowledgeStore::open(layout.clone()).unwrap();
    store
        .promote_batch(vec![
            cite("light travels at a finite speed", "c1", (1, 2)),
            cite("gravity bends the path of light", "c2", (5, 6)),
        ])
        .unwrap();
    let versions = VersionManager::open(layout.clone()).unwrap();
    Fixture {
        _dir: dir,
        layout,
        store,
        versions,
    }
}

#[test]
fn test_dedupe_skips_same_claim_from_another_chunk() {
    let fx = fixture();
    let strategy = MergeStrategy::new(&fx.store, MergeConfig::default());
    let batch = vec![
        cite("Light travels at a  finite speed", "c9", (1, 2)),
        cite("mass curves spacetime", "c3", (8, 8)),
    ];

    let outcome = strategy.merge(batch, MergeMode::Dedupe, false, &fx.versions).unwrap();
    assert_eq!((outcome.added, outcome.skipped), (1, 1));
    assert_eq!(fx.store.len().unwrap(), 3);
    assert!(outcome.backup.is_none());
}

#[test]
fn test_append_refuses_duplicate_ids() {
    let fx = fixture();
    let strategy = MergeStrategy::new(&fx.store, MergeConfig::default());
    let batch = vec![
        cite("light travels at a finite speed", "c1", (1, 2)),
        cite("Light travels at a  finite speed", "c9", (1, 2)),
    ];
    let outcome = strategy.merge(batch, MergeMode::Append, false, &fx.versions).unwrap();
    assert_eq!((outcome.added, outcome.skipped), (1, 1));
}

#[test]
fn test_semantic_skips_near_duplicates() {
    let fx = fixture();
    let config = MergeConfig {
        similarity_threshold: 0.6,
        ..Default::default()
    };
    let strategy = MergeStrategy::new(&fx.store, config);
    let batch = vec![cite("gravity bends the path of starlight", "c7", (20, 21))];
    let outcome = strategy.merge(batch, MergeMode::Semantic, false, &fx.versions).unwrap();
    assert_eq!(outcome.skipped, 1);
    assert_eq!(fx.store.len().unwrap(), 2);
}

#[test]
fn test_replace_backs_up_before_rewriting() {
    let fx = fixture();
    let strategy = MergeStrategy::new(&fx.store, MergeConfig::default());
    let mut revised = cite("light travels at a finite speed", "c1", (1, 2));
    revised.confidence = 0.95;

    let outcome = strategy.merge(vec![revised.clone()], MergeMode::Replace, false, &fx.versions).unwrap();
    assert_eq!(outcome.updated, 1);
    let backup = outcome.backup.expect("replace takes a backup");
    assert!(fx.versions.resolve(&backup).unwrap().backup_path.is_some());
    assert_eq!(fx.store.get(&revised.id).unwrap().unwrap().confidence, 0.95);
    assert!(fx.store.verify_index().unwrap().is_consistent());
}

fn corrupt_line(path: &std::path::Path) {
    let mut log = fs::OpenOptions::new().create(true).append(true).open(path).unwrap();
    log.write_all(b"{\"claim\": \"cut off mid-write\n").unwrap();
}

#[test]
fn test_replace_refuses_to_drop_malformed_lines() {
    let fx = fixture();
    corrupt_line(fx.layout.knowledge_log());
    let before = fs::read(fx.layout.knowledge_log()).unwrap();

    let strategy = MergeStrategy::new(&fx.store, MergeConfig::default());
    let mut revised = cite("light travels at a finite speed", "c1", (1, 2));
    revised.confidence = 0.95;
    let err = strategy
        .merge(vec![revised], MergeMode::Replace, false, &fx.versions)
        .unwrap_err();

    assert!(matches!(err, GrowthError::Store(StoreError::UncleanLog { ref lines, .. }) if lines == &vec![3]));
    assert_eq!(fs::read(fx.layout.knowledge_log()).unwrap(), before);
}

#[test]
fn test_resolve_keep_new_refuses_unclean_reasoning_log() {
    let fx = fixture();
    let strategy = MergeStrategy::new(&fx.store, MergeConfig::default());
    strategy
        .merge(
            vec![cite("gravity bends the path of light", "c2", (5, 6))],
            MergeMode::Conflict,
            false,
            &fx.versions,
        )
        .unwrap();
    corrupt_line(fx.layout.reasoning_log());
    let before = fs::read(fx.layout.knowledge_log()).unwrap();

    let queue = ConflictStore::new(fx.layout.conflicts_path());
    let err = queue.resolve(0, false, &fx.store, &fx.versions).unwrap_err();
    assert!(matches!(err, GrowthError::Store(StoreError::UncleanLog { .. })));
    assert_eq!(fs::read(fx.layout.knowledge_log()).unwrap(), before);
    assert_eq!(queue.load().unwrap().len(), 1);
}

#[test]
fn test_dry_run_matches_real_run_and_writes_nothing() {
    let fx = fixture();
    let strategy = MergeStrategy::new(&fx.store, MergeConfig::default());
    let batch = vec![
        cite("mass curves spacetime", "c3", (8, 8)),
        cite("gravity bends the path of light", "c2", (5, 6)),
    ];
    let before = fs::read(fx.layout.knowledge_log()).unwrap();

    let preview = strategy.merge(batch.clone(), MergeMode::Conflict, true, &fx.versions).unwrap();
    assert_eq!(fs::read(fx.layout.knowledge_log()).unwrap(), before);
    assert!(!fx.layout.conflicts_path().exists());

    let real = strategy.merge(batch, MergeMode::Conflict, false, &fx.versions).unwrap();
    assert_eq!((preview.added, preview.updated, preview.skipped), (real.added, real.updated, real.skipped));
    assert_eq!(preview.conflicts.len(), real.conflicts.len());
}

#[test]
fn test_conflict_mode_queues_n_way_source_collision() {
    let fx = fixture();
    fx.store
        .promote(cite("photons have no rest mass", "c4", (2, 3)))
        .unwrap();
    let strategy = MergeStrategy::new(&fx.store, MergeConfig::default());
    let batch = vec![
        cite("gravity bends the path of light", "c2", (5, 6)),
        cite("the ether does not exist", "c5", (2, 2)),
        cite("neutrinos oscillate between flavours", "c6", (40, 41)),
    ];

    let outcome = strategy.merge(batch, MergeMode::Conflict, false, &fx.versions).unwrap();
    assert_eq!(outcome.added, 1);
    assert_eq!(outcome.skipped, 0);
    assert_eq!(outcome.conflicts.len(), 2);
    assert_eq!(outcome.conflicts[0].kind, ConflictKind::Duplicate);
    let source = &outcome.conflicts[1];
    assert_eq!(source.kind, ConflictKind::SourceConflict);
    assert_eq!(source.existing.len(), 2);

    let queue = ConflictStore::new(fx.layout.conflicts_path());
    assert_eq!(queue.list(Some(ConflictKind::SourceConflict)).unwrap().len(), 1);
    assert_eq!(queue.list(None).unwrap().len(), 2);
}

#[test]
fn test_resolve_keep_new_replaces_set_and_remaps_reasoning() {
    let fx = fixture();
    let old = cite("photons have no rest mass", "c4", (2, 3));
    fx.store.promote(old.clone()).unwrap();
    let first = fx.store.load_knowledge().unwrap().records[0].clone();
    fx.store
        .append_reasoning(vec![ReasoningUnit::new(
            "supports",
            "light",
            vec![first.id.clone(), old.id.clone()],
            0.8,
        )])
        .unwrap();

    let strategy = MergeStrategy::new(&fx.store, MergeConfig::default());
    let incoming = cite("light has no rest mass", "c5", (2, 2));
    strategy
        .merge(vec![incoming.clone()], MergeMode::Conflict, false, &fx.versions)
        .unwrap();

    let queue = ConflictStore::new(fx.layout.conflicts_path());
    let resolved = queue.resolve(0, false, &fx.store, &fx.versions).unwrap();
    assert_eq!(resolved.resolution, Some(Resolution::KeepNew));
    assert!(queue.load().unwrap().is_empty());

    let ids: Vec<String> = fx.store.load_knowledge().unwrap().records.into_iter().map(|k| k.id).collect();
    assert!(ids.contains(&incoming.id));
    assert!(!ids.contains(&old.id));
    assert!(!ids.contains(&first.id));

    let ru = fx.store.load_reasoning().unwrap().records.remove(0);
    assert_eq!(ru.knowledge_ids, vec![incoming.id.clone()]);
    assert!(ru.hash_matches());
}

#[test]
fn test_resolve_keep_existing_only_drops_entry() {
    let fx = fixture();
    let strategy = MergeStrategy::new(&fx.store, MergeConfig::default());
    strategy
        .merge(
            vec![cite("gravity bends the path of light", "c2", (5, 6))],
            MergeMode::Conflict,
            false,
            &fx.versions,
        )
        .unwrap();
    let before = fs::read(fx.layout.knowledge_log()).unwrap();

    let queue = ConflictStore::new(fx.layout.conflicts_path());
    assert!(matches!(
        queue.resolve(5, true, &fx.store, &fx.versions),
        Err(GrowthError::ConflictNotFound(5))
    ));
    queue.resolve(0, true, &fx.store, &fx.versions).unwrap();
    assert!(queue.load().unwrap().is_empty());
    assert_eq!(fs::read(fx.layout.knowledge_log()).unwrap(), before);
}
