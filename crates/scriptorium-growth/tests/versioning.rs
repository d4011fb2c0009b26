//! Snapshot, verify, rollback and diff against real corpora

use scriptorium_domain::{BumpKind, CorpusVersion, KnowledgeUnit, ReasoningUnit, Source};
use scriptorium_growth::{ChangeKind, ChangeQuery, GrowthError, VersionManager};
use scriptorium_store::{KnowledgeStore, StoreLayout};
use std::fs;
use tempfile::tempdir;

fn corpus() -> (tempfile::TempDir, StoreLayout, KnowledgeStore) {
    let dir = tempdir().unwrap();
    let layout = StoreLayout::new(dir.path());
    layout.ensure_dirs().unwrap();
    let store = KnowledgeStore::open(layout.clone()).unwrap();
    (dir, layout, store)
}

fn ku(claim: &str) -> KnowledgeUnit {
    KnowledgeUnit::new(claim, vec![Source::new(format!("chunk-{}", claim), "a.pdf")], 0.6)
}

#[test]
fn test_fresh_snapshot_verifies() {
    let (_dir, layout, store) = corpus();
    fs::write(layout.document_path("a.pdf"), b"alpha").unwrap();
    fs::create_dir_all(layout.documents_dir().join("sub")).unwrap();
    fs::write(layout.document_path("sub/b.pdf"), b"beta").unwrap();
    store.promote(ku("one")).unwrap();

    let versions = VersionManager::open(layout).unwrap().with_chunk_count(7);
    let snap = versions.create_snapshot("initial", BumpKind::Minor, false).unwrap();
    assert_eq!(snap.version, CorpusVersion::new(0, 1, 0));
    assert_eq!(snap.stats.documents, 2);
    assert_eq!(snap.stats.chunks, 7);
    assert_eq!(snap.stats.knowledge_units, 1);
    assert!(snap.document_hashes.contains_key("sub/b.pdf"));

    let check = versions.verify_integrity(&snap).unwrap();
    assert!(check.verified);
    assert!(check.added.is_empty() && check.removed.is_empty() && check.modified.is_empty());
    assert_eq!(versions.current_version().unwrap(), snap.version);
}

#[test]
fn test_verify_reports_each_change_kind() {
    let (_dir, layout, _store) = corpus();
    fs::write(layout.document_path("a.pdf"), b"alpha").unwrap();
    fs::write(layout.document_path("b.pdf"), b"beta").unwrap();
    let versions = VersionManager::open(layout.clone()).unwrap();
    let snap = versions.create_snapshot("before edits", BumpKind::Patch, false).unwrap();

    fs::write(layout.document_path("a.pdf"), b"alpha v2").unwrap();
    fs::remove_file(layout.document_path("b.pdf")).unwrap();
    fs::write(layout.document_path("c.pdf"), b"gamma").unwrap();

    let check = versions.verify_integrity(&snap).unwrap();
    assert!(!check.verified);
    assert_eq!(check.modified, vec!["a.pdf"]);
    assert_eq!(check.removed, vec!["b.pdf"]);
    assert_eq!(check.added, vec!["c.pdf"]);
}

#[test]
fn test_rollback_is_reversible_byte_for_byte() {
    let (_dir, layout, store) = corpus();
    store.promote(ku("one")).unwrap();
    let versions = VersionManager::open(layout.clone()).unwrap();
    let target = versions.create_snapshot("baseline", BumpKind::Minor, true).unwrap();
    let baseline_knowledge = fs::read(layout.knowledge_log()).unwrap();

    store.promote(ku("two")).unwrap();
    store
        .append_reasoning(vec![ReasoningUnit::new("supports", "t", vec![ku("two").id], 0.5)])
        .unwrap();
    let live_knowledge = fs::read(layout.knowledge_log()).unwrap();
    let live_reasoning = fs::read(layout.reasoning_log()).unwrap();

    let outcome = versions.rollback(&target).unwrap();
    assert_eq!(outcome.restored_version, target.version);
    assert_eq!(fs::read(layout.knowledge_log()).unwrap(), baseline_knowledge);
    assert!(!layout.reasoning_log().exists());
    assert_eq!(versions.current_version().unwrap(), target.version);

    let undo = versions.resolve(&outcome.pre_rollback_snapshot).unwrap();
    versions.rollback(&undo).unwrap();
    assert_eq!(fs::read(layout.knowledge_log()).unwrap(), live_knowledge);
    assert_eq!(fs::read(layout.reasoning_log()).unwrap(), live_reasoning);

    let reopened = KnowledgeStore::open(layout).unwrap();
    assert!(reopened.verify_index().unwrap().is_consistent());
    assert_eq!(reopened.len().unwrap(), 2);

    let rollbacks = versions
        .changelog()
        .query(&ChangeQuery {
            kinds: vec![ChangeKind::Rollback],
            ..Default::default()
        })
        .unwrap();
    assert_eq!(rollbacks.len(), 2);
}

#[test]
fn test_snapshot_after_rollback_takes_a_fresh_version() {
    let (_dir, layout, store) = corpus();
    store.promote(ku("one")).unwrap();
    let versions = VersionManager::open(layout).unwrap();
    let first = versions.create_snapshot("first", BumpKind::Minor, true).unwrap();
    let second = versions.create_snapshot("second", BumpKind::Minor, true).unwrap();
    assert_eq!(second.version, CorpusVersion::new(0, 2, 0));

    let outcome = versions.rollback(&first).unwrap();
    assert_eq!(versions.current_version().unwrap(), CorpusVersion::new(0, 1, 0));
    let pre = versions.resolve(&outcome.pre_rollback_snapshot).unwrap();
    assert_eq!(pre.version, CorpusVersion::new(0, 2, 1));

    let next = versions.create_snapshot("after rollback", BumpKind::Minor, true).unwrap();
    assert_eq!(next.version, CorpusVersion::new(0, 3, 0));
    let taken: Vec<CorpusVersion> = versions.list_snapshots().unwrap().iter().map(|s| s.version).collect();
    let mut unique = taken.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), taken.len());
}

#[test]
fn test_rollback_without_backup_fails_closed() {
    let (_dir, layout, store) = corpus();
    store.promote(ku("one")).unwrap();
    let versions = VersionManager::open(layout.clone()).unwrap();
    let target = versions.create_snapshot("no backup", BumpKind::Patch, false).unwrap();
    store.promote(ku("two")).unwrap();
    let before = fs::read(layout.knowledge_log()).unwrap();
    let snapshots_before = versions.list_snapshots().unwrap().len();

    assert!(matches!(versions.rollback(&target), Err(GrowthError::NoBackup(_))));
    assert_eq!(fs::read(layout.knowledge_log()).unwrap(), before);
    assert_eq!(versions.list_snapshots().unwrap().len(), snapshots_before);
}

#[test]
fn test_diff_added_and_removed() {
    let (_dir, layout, _store) = corpus();
    fs::write(layout.document_path("keep.pdf"), b"k").unwrap();
    fs::write(layout.document_path("old.pdf"), b"o").unwrap();
    let versions = VersionManager::open(layout.clone()).unwrap();
    let a = versions.create_snapshot("a", BumpKind::Minor, false).unwrap();

    fs::remove_file(layout.document_path("old.pdf")).unwrap();
    fs::write(layout.document_path("new.pdf"), b"n").unwrap();
    let b = versions.create_snapshot("b", BumpKind::Minor, false).unwrap();

    let forward = versions.diff(&a, &b);
    assert_eq!(forward.added, vec!["new.pdf"]);
    assert_eq!(forward.removed, vec!["old.pdf"]);
    assert!(forward.modified.is_empty());
    assert_eq!(forward.stat_deltas["documents"], 0);

    let backward = versions.diff(&b, &a);
    assert_eq!(forward.added, backward.removed);
    assert_eq!(forward.removed, backward.added);
}

#[test]
fn test_resolve_by_version_prefix_and_latest() {
    let (_dir, layout, _store) = corpus();
    let versions = VersionManager::open(layout).unwrap();
    let first = versions.create_snapshot("one", BumpKind::Major, false).unwrap();
    let second = versions.create_snapshot("two", BumpKind::Minor, false).unwrap();

    assert_eq!(versions.resolve("v1.0.0").unwrap().snapshot_id, first.snapshot_id);
    assert_eq!(versions.resolve("1.1.0").unwrap().snapshot_id, second.snapshot_id);
    assert_eq!(versions.resolve("latest").unwrap().snapshot_id, second.snapshot_id);
    assert_eq!(versions.resolve(&second.snapshot_id).unwrap(), second);
    assert!(matches!(versions.resolve("9.9.9"), Err(GrowthError::SnapshotNotFound(_))));

    let status = versions.status().unwrap();
    assert_eq!(status.current, CorpusVersion::new(1, 1, 0));
    assert_eq!(status.snapshot_count, 2);
}
