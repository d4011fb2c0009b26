//! Calibration plans: rules derived from skew alerts or written by hand
//!
//! Domain weights and source priorities live only in `calibration.json`.
//! KU rules change confidence or the archived flag in the knowledge log,
//! which is rewritten once per execution after a backup.

use crate::config::CalibrationConfig;
use crate::density::{infer_domain, DensityReport};
use crate::skew::{SkewKind, SkewReport};
use crate::BalanceError;
use chrono::{DateTime, Utc};
use scriptorium_domain::{BackupProvider, KnowledgeUnit};
use scriptorium_store::KnowledgeStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

/// What a rule changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CalibrationAction {
    /// Raise a domain's weight
    BoostDomain,
    /// Lower a domain's weight
    SuppressDomain,
    /// Raise a source's reprocessing priority
    PrioritizeSource,
    /// Lower a source's reprocessing priority
    DeprioritizeSource,
    /// Raise a KU's confidence
    PromoteKu,
    /// Lower a KU's confidence
    DemoteKu,
    /// Mark a KU archived
    ArchiveKu,
    /// Clear a KU's archived flag
    RestoreKu,
}

impl CalibrationAction {
    /// Kebab-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            CalibrationAction::BoostDomain => "boost-domain",
            CalibrationAction::SuppressDomain => "suppress-domain",
            CalibrationAction::PrioritizeSource => "prioritize-source",
            CalibrationAction::DeprioritizeSource => "deprioritize-source",
            CalibrationAction::PromoteKu => "promote-ku",
            CalibrationAction::DemoteKu => "demote-ku",
            CalibrationAction::ArchiveKu => "archive-ku",
            CalibrationAction::RestoreKu => "restore-ku",
        }
    }

    /// Whether the rule rewrites the knowledge log
    pub fn touches_knowledge(&self) -> bool {
        matches!(
            self,
            CalibrationAction::PromoteKu
                | CalibrationAction::DemoteKu
                | CalibrationAction::ArchiveKu
                | CalibrationAction::RestoreKu
        )
    }
}

impl FromStr for CalibrationAction {
    type Err = BalanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_lowercase().replace('_', "-")))
            .map_err(|_| BalanceError::Invalid(format!("unknown calibration action '{}'", s)))
    }
}

impl fmt::Display for CalibrationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One adjustment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRule {
    /// Rule id (UUIDv7)
    pub id: String,
    /// What to change
    pub action: CalibrationAction,
    /// Domain name, document path or KU id
    pub target: String,
    /// Magnitude of the change; unused by archive/restore
    pub weight: f64,
    /// Why the rule exists
    pub reason: String,
    /// Set once executed; an applied rule is never run again
    #[serde(default)]
    pub applied: bool,
    /// When it was executed
    #[serde(default)]
    pub applied_at: Option<DateTime<Utc>>,
}

impl CalibrationRule {
    /// Unapplied rule
    pub fn new(action: CalibrationAction, target: impl Into<String>, weight: f64, reason: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            action,
            target: target.into(),
            weight: weight.abs(),
            reason: reason.into(),
            applied: false,
            applied_at: None,
        }
    }
}

/// A set of rules executed together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPlan {
    /// Plan id (UUIDv7)
    pub id: String,
    /// When it was generated
    pub created_at: DateTime<Utc>,
    /// Where the rules came from (`skew` or `manual`)
    pub origin: String,
    /// Rules in execution order
    pub rules: Vec<CalibrationRule>,
}

impl CalibrationPlan {
    /// New plan
    pub fn new(origin: impl Into<String>, rules: Vec<CalibrationRule>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            created_at: Utc::now(),
            origin: origin.into(),
            rules,
        }
    }

    /// Rules not yet executed
    pub fn pending(&self) -> usize {
        self.rules.iter().filter(|r| !r.applied).count()
    }

    /// Whether every rule has been executed
    pub fn is_complete(&self) -> bool {
        self.pending() == 0
    }
}

/// One executed rule, for the action history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationEvent {
    /// When it ran
    pub timestamp: DateTime<Utc>,
    /// Plan the rule belongs to
    pub plan_id: String,
    /// Rule id
    pub rule_id: String,
    /// Action taken
    pub action: CalibrationAction,
    /// Target
    pub target: String,
    /// Old and new value
    pub detail: String,
}

/// Persisted calibration state (`calibration.json`)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationState {
    /// Retrieval weight per domain; missing means 1.0
    #[serde(default)]
    pub domain_weights: BTreeMap<String, f64>,
    /// Reprocessing priority per source document; missing means 0
    #[serde(default)]
    pub source_priorities: BTreeMap<String, i32>,
    /// Every plan, oldest first
    #[serde(default)]
    pub plans: Vec<CalibrationPlan>,
    /// Executed rules, oldest first
    #[serde(default)]
    pub history: Vec<CalibrationEvent>,
}

impl CalibrationState {
    /// Load from `path`; a missing file is the default state
    pub fn load(path: &Path) -> Result<Self, BalanceError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// Write to `path` through a temp file
    pub fn save(&self, path: &Path) -> Result<(), BalanceError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Weight of a domain
    pub fn domain_weight(&self, domain: &str) -> f64 {
        self.domain_weights.get(domain).copied().unwrap_or(1.0)
    }

    /// Find a plan by id, unique id prefix, or `latest`
    pub fn plan_index(&self, reference: &str) -> Result<usize, BalanceError> {
        if reference.eq_ignore_ascii_case("latest") && !self.plans.is_empty() {
            return Ok(self.plans.len() - 1);
        }
        if let Some(i) = self.plans.iter().position(|p| p.id == reference) {
            return Ok(i);
        }
        let mut matches = self
            .plans
            .iter()
            .enumerate()
            .filter(|(_, p)| p.id.starts_with(reference));
        match (matches.next(), matches.next()) {
            (Some((i, _)), None) => Ok(i),
            _ => Err(BalanceError::PlanNotFound(reference.to_string())),
        }
    }
}

/// Outcome of executing a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Plan executed
    pub plan_id: String,
    /// Whether anything was written
    pub dry_run: bool,
    /// Rules executed this time
    pub applied: Vec<CalibrationEvent>,
    /// Rules skipped because they already ran
    pub already_applied: usize,
    /// Rules whose target no longer exists
    pub missing_targets: Vec<String>,
    /// Snapshot taken before the knowledge log was rewritten
    pub backup: Option<String>,
}

/// Builds and executes calibration plans
///
/// # Examples
///
/// ```no_run
/// use scriptorium_balance::{CalibrationAction, CalibrationConfig, CalibrationRule, Calibrator};
/// use scriptorium_store::{KnowledgeStore, StoreLayout};
///
/// let store = KnowledgeStore::open(StoreLayout::new("corpus")).unwrap();
/// let calibrator = Calibrator::new(&store, CalibrationConfig::default());
/// let rule = CalibrationRule::new(CalibrationAction::BoostDomain, "optics", 0.5, "under-represented");
/// let plan = calibrator.add_manual_plan(vec![rule]).unwrap();
/// println!("plan {} has {} rule(s)", plan.id, plan.rules.len());
/// ```
pub struct Calibrator<'a> {
    store: &'a KnowledgeStore,
    config: CalibrationConfig,
    state_path: PathBuf,
}

impl<'a> Calibrator<'a> {
    /// Calibrator over `store`, keeping state beside its other state files
    pub fn new(store: &'a KnowledgeStore, config: CalibrationConfig) -> Self {
        Self {
            state_path: store.layout().calibration_path(),
            store,
            config,
        }
    }

    /// Current state
    pub fn state(&self) -> Result<CalibrationState, BalanceError> {
        CalibrationState::load(&self.state_path)
    }

    /// Turn alerts into rules; nothing is persisted
    pub fn plan_from_alerts(&self, skew: &SkewReport, density: &DensityReport) -> Result<CalibrationPlan, BalanceError> {
        self.config.validate()?;
        let step = self.config.domain_step;
        let priority = self.config.priority_step as f64;
        let mut rules = Vec::new();

        for alert in &skew.alerts {
            match alert.kind {
                SkewKind::DomainImbalance => {
                    for domain in &alert.affected {
                        rules.push(CalibrationRule::new(
                            CalibrationAction::BoostDomain,
                            domain,
                            step,
                            format!("under-represented domain ({})", alert.message),
                        ));
                    }
                    if let Some(largest) = density.domains.first() {
                        rules.push(CalibrationRule::new(
                            CalibrationAction::SuppressDomain,
                            &largest.domain,
                            step,
                            "dominant domain".to_string(),
                        ));
                    }
                }
                SkewKind::DensityVariance => {
                    for domain in &alert.affected {
                        for source in density.sources_in(domain) {
                            rules.push(CalibrationRule::new(
                                CalibrationAction::PrioritizeSource,
                                &source.path,
                                priority,
                                format!("sparse domain '{}'", domain),
                            ));
                        }
                    }
                }
                SkewKind::CoverageGap => {
                    for path in &alert.affected {
                        rules.push(CalibrationRule::new(
                            CalibrationAction::PrioritizeSource,
                            path,
                            priority,
                            "low page coverage".to_string(),
                        ));
                    }
                }
                SkewKind::QualityDrift => {
                    for ku in self.store.load_knowledge()?.records.iter().filter(|ku| {
                        !ku.archived
                            && ku.confidence < self.config.archive_below
                            && alert.affected.contains(&infer_domain(ku))
                    }) {
                        rules.push(CalibrationRule::new(
                            CalibrationAction::ArchiveKu,
                            &ku.id,
                            0.0,
                            format!("confidence {:.2} in drifting domain", ku.confidence),
                        ));
                    }
                }
            }
        }

        // A source flagged by two tests only needs one priority bump
        let mut seen = std::collections::HashSet::new();
        rules.retain(|r| seen.insert((r.action, r.target.clone())));
        Ok(CalibrationPlan::new("skew", rules))
    }

    /// Persist a plan
    pub fn save_plan(&self, plan: &CalibrationPlan) -> Result<(), BalanceError> {
        let mut state = self.state()?;
        state.plans.push(plan.clone());
        state.save(&self.state_path)?;
        tracing::info!("Saved calibration plan {} with {} rule(s)", plan.id, plan.rules.len());
        Ok(())
    }

    /// Persist a plan of hand-written rules
    pub fn add_manual_plan(&self, rules: Vec<CalibrationRule>) -> Result<CalibrationPlan, BalanceError> {
        let plan = CalibrationPlan::new("manual", rules);
        self.save_plan(&plan)?;
        Ok(plan)
    }

    /// Execute the unapplied rules of a plan
    ///
    /// Running the same plan twice applies nothing the second time. With
    /// `dry_run`, the report is computed and nothing is written.
    pub fn execute_plan<B>(&self, plan_ref: &str, dry_run: bool, backup: &B) -> Result<ExecutionReport, BalanceError>
    where
        B: BackupProvider,
        B::Error: fmt::Display,
    {
        self.config.validate()?;
        let mut state = self.state()?;
        let index = state.plan_index(plan_ref)?;
        let plan_id = state.plans[index].id.clone();

        let mut kus: Vec<KnowledgeUnit> = self.store.load_knowledge()?.records;
        let positions: BTreeMap<String, usize> = kus.iter().enumerate().map(|(i, k)| (k.id.clone(), i)).collect();
        let mut report = ExecutionReport {
            plan_id: plan_id.clone(),
            dry_run,
            applied: Vec::new(),
            already_applied: 0,
            missing_targets: Vec::new(),
            backup: None,
        };
        let mut knowledge_changed = false;
        let now = Utc::now();

        for rule in state.plans[index].rules.iter_mut() {
            if rule.applied {
                report.already_applied += 1;
                continue;
            }
            let detail = match rule.action {
                CalibrationAction::BoostDomain | CalibrationAction::SuppressDomain => {
                    let old = state.domain_weights.get(&rule.target).copied().unwrap_or(1.0);
                    let delta = if rule.action == CalibrationAction::BoostDomain {
                        rule.weight
                    } else {
                        -rule.weight
                    };
                    let new = (old + delta).clamp(self.config.min_weight, self.config.max_weight);
                    state.domain_weights.insert(rule.target.clone(), new);
                    format!("weight {:.2} -> {:.2}", old, new)
                }
                CalibrationAction::PrioritizeSource | CalibrationAction::DeprioritizeSource => {
                    let old = state.source_priorities.get(&rule.target).copied().unwrap_or(0);
                    let step = rule.weight.round() as i32;
                    let new = if rule.action == CalibrationAction::PrioritizeSource {
                        old.saturating_add(step)
                    } else {
                        old.saturating_sub(step)
                    };
                    state.source_priorities.insert(rule.target.clone(), new);
                    format!("priority {} -> {}", old, new)
                }
                action => {
                    let Some(&i) = positions.get(&rule.target) else {
                        tracing::warn!("Calibration target {} no longer exists", rule.target);
                        report.missing_targets.push(rule.target.clone());
                        continue;
                    };
                    let ku = &mut kus[i];
                    knowledge_changed = true;
                    match action {
                        CalibrationAction::PromoteKu | CalibrationAction::DemoteKu => {
                            let old = ku.confidence;
                            let step = if rule.weight > 0.0 { rule.weight } else { self.config.confidence_step };
                            let delta = if action == CalibrationAction::PromoteKu { step } else { -step };
                            ku.confidence = (old + delta).clamp(0.0, 1.0);
                            format!("confidence {:.2} -> {:.2}", old, ku.confidence)
                        }
                        CalibrationAction::ArchiveKu => {
                            ku.archived = true;
                            "archived".to_string()
                        }
                        _ => {
                            ku.archived = false;
                            "restored".to_string()
                        }
                    }
                }
            };
            rule.applied = true;
            rule.applied_at = Some(now);
            tracing::debug!("Applied {} {}: {}", rule.action, rule.target, detail);
            report.applied.push(CalibrationEvent {
                timestamp: now,
                plan_id: plan_id.clone(),
                rule_id: rule.id.clone(),
                action: rule.action,
                target: rule.target.clone(),
                detail,
            });
        }

        if dry_run {
            return Ok(report);
        }
        if knowledge_changed {
            self.store.ensure_rewritable()?;
            let id = backup
                .backup("calibration")
                .map_err(|e| BalanceError::Backup(e.to_string()))?;
            self.store.rewrite_knowledge(&kus)?;
            report.backup = Some(id);
        }
        state.history.extend(report.applied.iter().cloned());
        state.save(&self.state_path)?;
        tracing::info!(
            "Executed plan {}: {} applied, {} already applied",
            plan_id,
            report.applied.len(),
            report.already_applied
        );
        Ok(report)
    }
}
