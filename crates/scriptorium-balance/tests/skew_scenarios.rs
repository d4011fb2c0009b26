//! Skew detection and calibration over real stores

use scriptorium_audit::CorpusView;
use scriptorium_balance::{
    BalanceError, CalibrationAction, CalibrationConfig, CalibrationRule, Calibrator, DensityAnalyzer, SkewConfig, SkewDetector,
    SkewKind,
};
use scriptorium_domain::{BackupProvider, KnowledgeUnit, PageRange, Severity, Source};
use scriptorium_store::{KnowledgeStore, NullChunkStore, StoreError, StoreLayout};
use std::cell::RefCell;
use std::fs;
use std::io::Write;
use tempfile::tempdir;

struct RecordingBackup {
    reasons: RefCell<Vec<String>>,
}

impl RecordingBackup {
    fn new() -> Self {
        Self {
            reasons: RefCell::new(Vec::new()),
        }
    }
}

impl BackupProvider for RecordingBackup {
    type Error = std::io::Error;

    fn backup(&self, reason: &str) -> Result<String, Self::Error> {
        self.reasons.borrow_mut().push(reason.to_string());
        Ok(format!("snap-{}", self.reasons.borrow().len()))
    }
}

fn kus(domain: &str, count: usize, confidence: f64) -> Vec<KnowledgeUnit> {
    (0..count)
        .map(|i| {
            KnowledgeUnit::new(
                format!("{} claim {}", domain, i),
                vec![Source::new(format!("{}-{}", domain, i), format!("{}/doc.pdf", domain))
                    .with_pages(PageRange::single(i as u32 + 1))],
                confidence,
            )
            .with_tags([format!("domain:{}", domain)])
        })
        .collect()
}

fn skew_for(split: (usize, usize)) -> scriptorium_balance::SkewReport {
    let mut all = kus("physics", split.0, 0.8);
    all.extend(kus("biology", split.1, 0.8));
    let view = CorpusView::from_parts(all, vec![], None, Vec::<String>::new(), "/d");
    let density = DensityAnalyzer::new(&view).analyze();
    SkewDetector::new(SkewConfig::default()).detect(&density)
}

#[test]
fn test_even_split_raises_no_imbalance() {
    let report = skew_for((5, 5));
    assert_eq!(report.imbalance_ratio, 1.0);
    assert!(report.alert(SkewKind::DomainImbalance).is_none());
    assert_eq!(report.gini, 0.0);
}

#[test]
fn test_nine_to_one_is_high_imbalance() {
    let report = skew_for((9, 1));
    assert_eq!(report.imbalance_ratio, 9.0);
    let alert = report.alert(SkewKind::DomainImbalance).unwrap();
    assert_eq!(alert.severity, Severity::High);
    assert_eq!(alert.affected, vec!["biology"]);
    assert_eq!(alert.details["ratio"], 9.0);
    assert!(report.health_score <= 90);
}

fn store_with(kus: Vec<KnowledgeUnit>) -> (tempfile::TempDir, KnowledgeStore) {
    let dir = tempdir().unwrap();
    let layout = StoreLayout::new(dir.path());
    layout.ensure_dirs().unwrap();
    let store = KnowledgeStore::open(layout).unwrap();
    store.promote_batch(kus).unwrap();
    (dir, store)
}

#[test]
fn test_plan_from_alerts_executes_once() {
    let mut all = kus("physics", 9, 0.8);
    all.extend(kus("biology", 1, 0.1));
    let (_dir, store) = store_with(all);

    let view = CorpusView::load(&store, &NullChunkStore).unwrap();
    let density = DensityAnalyzer::new(&view).analyze();
    let skew = SkewDetector::new(SkewConfig::default()).detect(&density);
    assert!(skew.alert(SkewKind::QualityDrift).is_some());

    let calibrator = Calibrator::new(&store, CalibrationConfig::default());
    let plan = calibrator.plan_from_alerts(&skew, &density).unwrap();
    let actions: Vec<_> = plan.rules.iter().map(|r| (r.action, r.target.as_str())).collect();
    assert!(actions.contains(&(CalibrationAction::BoostDomain, "biology")));
    assert!(actions.contains(&(CalibrationAction::SuppressDomain, "physics")));
    assert!(plan.rules.iter().any(|r| r.action == CalibrationAction::ArchiveKu));
    calibrator.save_plan(&plan).unwrap();

    let backup = RecordingBackup::new();
    let preview = calibrator.execute_plan(&plan.id, true, &backup).unwrap();
    assert_eq!(preview.applied.len(), plan.rules.len());
    assert!(backup.reasons.borrow().is_empty());
    assert!(calibrator.state().unwrap().history.is_empty());

    let first = calibrator.execute_plan(&plan.id, false, &backup).unwrap();
    assert_eq!(first.applied.len(), plan.rules.len());
    assert_eq!(first.backup.as_deref(), Some("snap-1"));
    let state = calibrator.state().unwrap();
    assert_eq!(state.domain_weight("biology"), 1.25);
    assert_eq!(state.domain_weight("physics"), 0.75);
    assert!(state.plans[0].is_complete());

    let before = fs::read(store.layout().knowledge_log()).unwrap();
    let second = calibrator.execute_plan("latest", false, &backup).unwrap();
    assert!(second.applied.is_empty());
    assert_eq!(second.already_applied, plan.rules.len());
    assert_eq!(fs::read(store.layout().knowledge_log()).unwrap(), before);
    assert_eq!(backup.reasons.borrow().len(), 1);

    let archived: Vec<_> = store.load_knowledge().unwrap().records.into_iter().filter(|k| k.archived).collect();
    assert_eq!(archived.len(), 1);
    assert!(store.verify_index().unwrap().is_consistent());
}

#[test]
fn test_manual_restore_rule() {
    let mut ku = kus("optics", 1, 0.6).remove(0);
    ku.archived = true;
    let (_dir, store) = store_with(vec![ku.clone()]);
    let calibrator = Calibrator::new(&store, CalibrationConfig::default());

    let plan = calibrator
        .add_manual_plan(vec![
            CalibrationRule::new(CalibrationAction::RestoreKu, &ku.id, 0.0, "wrongly archived"),
            CalibrationRule::new(CalibrationAction::PromoteKu, &ku.id, 0.0, "verified by hand"),
            CalibrationRule::new(CalibrationAction::DemoteKu, "ku_missing", 0.2, "stale"),
        ])
        .unwrap();
    let report = calibrator.execute_plan(&plan.id, false, &RecordingBackup::new()).unwrap();

    assert_eq!(report.applied.len(), 2);
    assert_eq!(report.missing_targets, vec!["ku_missing"]);
    let restored = store.get(&ku.id).unwrap().unwrap();
    assert!(!restored.archived);
    assert!((restored.confidence - 0.7).abs() < 1e-9);
    assert_eq!(calibrator.state().unwrap().history.len(), 2);
}

#[test]
fn test_calibration_keeps_malformed_lines_by_refusing() {
    let ku = kus("optics", 1, 0.6).remove(0);
    let (_dir, store) = store_with(vec![ku.clone()]);
    let mut log = fs::OpenOptions::new().append(true).open(store.layout().knowledge_log()).unwrap();
    log.write_all(b"\xff\xfe not a record\n").unwrap();
    let before = fs::read(store.layout().knowledge_log()).unwrap();

    let calibrator = Calibrator::new(&store, CalibrationConfig::default());
    let plan = calibrator
        .add_manual_plan(vec![CalibrationRule::new(CalibrationAction::ArchiveKu, &ku.id, 0.0, "superseded")])
        .unwrap();
    let backup = RecordingBackup::new();
    let err = calibrator.execute_plan(&plan.id, false, &backup).unwrap_err();

    assert!(matches!(err, BalanceError::Store(StoreError::UncleanLog { ref lines, .. }) if lines == &vec![2]));
    assert!(backup.reasons.borrow().is_empty());
    assert_eq!(fs::read(store.layout().knowledge_log()).unwrap(), before);
    assert!(calibrator.state().unwrap().history.is_empty());
}
