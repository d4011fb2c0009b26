//! Integration tests for scriptorium-store
//!
//! These tests exercise the knowledge log, its index, and the tolerant
//! loader against real files.

use proptest::prelude::*;
use scriptorium_domain::{KnowledgeUnit, PageRange, ReasoningUnit, Source};
use scriptorium_store::{KnowledgeStore, StoreError, StoreLayout};
use std::fs;
use std::io::Write;
use tempfile::tempdir;

fn sample(claim: &str, chunk: &str) -> KnowledgeUnit {
    KnowledgeUnit::new(
        claim,
        vec![Source::new(chunk, "physics/a.pdf").with_pages(PageRange::new(3, 5))],
        0.8,
    )
    .with_tags(["domain:physics"])
}

#[test]
fn test_promote_twice_appends_nothing() {
    let dir = tempdir().unwrap();
    let store = KnowledgeStore::open(StoreLayout::new(dir.path())).unwrap();
    let batch = vec![sample("one", "c1"), sample("two", "c2"), sample("three", "c3")];

    let first = store.promote_batch(batch.clone()).unwrap();
    assert_eq!(first.appended, 3);
    let before = fs::read(store.layout().knowledge_log()).unwrap();

    let second = store.promote_batch(batch).unwrap();
    assert_eq!(second.appended, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(fs::read(store.layout().knowledge_log()).unwrap(), before);
}

#[test]
fn test_index_survives_reopen() {
    let dir = tempdir().unwrap();
    let ku = sample("persisted", "c1");
    {
        let store = KnowledgeStore::open(StoreLayout::new(dir.path())).unwrap();
        store.promote(ku.clone()).unwrap();
    }
    let store = KnowledgeStore::open(StoreLayout::new(dir.path())).unwrap();
    let fetched = store.get(&ku.id).unwrap().unwrap();
    assert_eq!(fetched.claim, "persisted");
    assert_eq!(fetched.domain_tag(), Some("physics"));
}

#[test]
fn test_missing_index_is_rebuilt() {
    let dir = tempdir().unwrap();
    let layout = StoreLayout::new(dir.path());
    let ku = sample("rebuilt", "c1");
    {
        let store = KnowledgeStore::open(layout.clone()).unwrap();
        store.promote(ku.clone()).unwrap();
    }
    fs::remove_file(layout.index_path()).unwrap();

    let store = KnowledgeStore::open(layout).unwrap();
    assert!(store.contains(&ku.id).unwrap());
    assert!(store.verify_index().unwrap().is_consistent());
}

#[test]
fn test_malformed_lines_are_skipped() {
    let dir = tempdir().unwrap();
    let layout = StoreLayout::new(dir.path());
    let good = serde_json::to_string(&sample("good", "c1")).unwrap();
    let mut file = fs::File::create(layout.knowledge_log()).unwrap();
    writeln!(file, "{}", good).unwrap();
    writeln!(file, "{{\"claim\": 42").unwrap();
    writeln!(file, "{{\"claim\": \"defaults\", \"pages\": \"7\"}}").unwrap();
    drop(file);

    let store = KnowledgeStore::open(layout).unwrap();
    let report = store.load_knowledge().unwrap();
    assert_eq!(report.records.len(), 2);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].line, 2);
    assert_eq!(report.records[1].confidence, 0.5);
    assert!(report.records[1].tags.is_empty());
}

#[test]
fn test_invalid_utf8_line_is_skipped_not_fatal() {
    let dir = tempdir().unwrap();
    let layout = StoreLayout::new(dir.path());
    let first = sample("first", "c1");
    let second = sample("second", "c2");
    let mut file = fs::File::create(layout.knowledge_log()).unwrap();
    writeln!(file, "{}", serde_json::to_string(&first).unwrap()).unwrap();
    file.write_all(b"\xff\xfe\n").unwrap();
    writeln!(file, "{}", serde_json::to_string(&second).unwrap()).unwrap();
    drop(file);

    let store = KnowledgeStore::open(layout).unwrap();
    let report = store.load_knowledge().unwrap();
    assert_eq!(report.records.len(), 2);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].line, 2);
    assert_eq!(store.get(&second.id).unwrap().unwrap().claim, "second");
    assert!(store.verify_index().unwrap().is_consistent());
}

#[test]
fn test_page_zero_record_is_skipped() {
    let dir = tempdir().unwrap();
    let layout = StoreLayout::new(dir.path());
    let mut file = fs::File::create(layout.knowledge_log()).unwrap();
    writeln!(file, "{}", serde_json::to_string(&sample("fine", "c1")).unwrap()).unwrap();
    writeln!(
        file,
        r#"{{"claim": "bad pages", "sources": [{{"chunk_id": "c2", "path": "a.pdf", "pages": [0, 4294967295]}}]}}"#
    )
    .unwrap();
    drop(file);

    let store = KnowledgeStore::open(layout).unwrap();
    let report = store.load_knowledge().unwrap();
    assert_eq!(report.records.len(), 1);
    assert_eq!(report.errors[0].line, 2);
}

#[test]
fn test_rewrites_refuse_unclean_logs() {
    let dir = tempdir().unwrap();
    let store = KnowledgeStore::open(StoreLayout::new(dir.path())).unwrap();
    store.promote(sample("kept", "c1")).unwrap();
    assert!(store.ensure_rewritable().is_ok());

    fs::write(store.layout().reasoning_log(), b"{\"relation\": \n").unwrap();
    let err = store.ensure_rewritable().unwrap_err();
    assert!(matches!(err, StoreError::UncleanLog { ref lines, .. } if lines == &vec![1]));
    assert!(matches!(store.rewrite_reasoning(&[]), Err(StoreError::UncleanLog { .. })));
    assert_eq!(fs::read(store.layout().reasoning_log()).unwrap(), b"{\"relation\": \n");

    // The knowledge log itself is clean, so its own rewrite still goes through
    store.rewrite_knowledge(&[sample("replacement", "c2")]).unwrap();
    assert_eq!(store.len().unwrap(), 1);
}

#[test]
fn test_unknown_fields_round_trip() {
    let dir = tempdir().unwrap();
    let layout = StoreLayout::new(dir.path());
    fs::write(
        layout.knowledge_log(),
        "{\"id\":\"ku_x\",\"claim\":\"c\",\"sources\":[{\"chunk_id\":\"c1\",\"path\":\"a.pdf\",\"pages\":\"3-5\",\"ocr\":true}],\"pipeline\":\"v2\"}\n",
    )
    .unwrap();
    let store = KnowledgeStore::open(layout.clone()).unwrap();
    let kus = store.load_knowledge().unwrap().records;
    assert_eq!(kus[0].sources[0].pages, Some(PageRange::new(3, 5)));

    store.rewrite_knowledge(&kus).unwrap();
    let text = fs::read_to_string(layout.knowledge_log()).unwrap();
    assert!(text.contains("\"pipeline\":\"v2\""));
    assert!(text.contains("\"ocr\":true"));
    assert!(text.contains("\"pages\":[3,5]"));
}

#[test]
fn test_verify_index_flags_stale_entries() {
    let dir = tempdir().unwrap();
    let layout = StoreLayout::new(dir.path());
    let ku = sample("tampered", "c1");
    {
        let store = KnowledgeStore::open(layout.clone()).unwrap();
        store.promote(ku.clone()).unwrap();
    }
    let text = fs::read_to_string(layout.knowledge_log()).unwrap();
    fs::write(layout.knowledge_log(), text.replace("tampered", "tamperee")).unwrap();

    let store = KnowledgeStore::open(layout).unwrap();
    let check = store.verify_index().unwrap();
    assert_eq!(check.mismatched, vec![ku.id]);
}

#[test]
fn test_append_reasoning_dedupes_by_id() {
    let dir = tempdir().unwrap();
    let store = KnowledgeStore::open(StoreLayout::new(dir.path())).unwrap();
    let ru = ReasoningUnit::new("supports", "heat", vec!["ku_a".into(), "ku_b".into()], 0.7);
    assert_eq!(store.append_reasoning(vec![ru.clone()]).unwrap(), 1);
    assert_eq!(store.append_reasoning(vec![ru]).unwrap(), 0);
    assert_eq!(store.load_reasoning().unwrap().records.len(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_index_points_at_matching_lines(claims in prop::collection::vec("[a-z ]{1,24}", 1..12)) {
        let dir = tempdir().unwrap();
        let store = KnowledgeStore::open(StoreLayout::new(dir.path())).unwrap();
        let kus: Vec<_> = claims.iter().map(|c| sample(c, "c1")).collect();
        store.promote_batch(kus).unwrap();

        let check = store.verify_index().unwrap();
        prop_assert!(check.is_consistent());
        for (id, _) in store.index().unwrap() {
            let ku = store.get(&id).unwrap().unwrap();
            prop_assert_eq!(ku.recompute_id(), id);
        }
    }
}
