//! `growth rebalance`: density and skew analysis, calibration plans.

use super::{emit, finish, record_change, Corpus};
use crate::cli::{PresetArg, RebalanceArgs};
use crate::error::{CliError, Result};
use crate::output::{short_id, Formatter};
use crate::outcome::Outcome;
use scriptorium_balance::{
    CalibrationAction, CalibrationConfig, CalibrationPlan, CalibrationRule, Calibrator, DensityAnalyzer, SkewConfig,
    SkewDetector, SkewReport,
};
use scriptorium_growth::{ChangeKind, Impact, NewChange};
use serde_json::json;

fn skew_config(preset: Option<PresetArg>, configured: &SkewConfig) -> SkewConfig {
    match preset {
        None => configured.clone(),
        Some(PresetArg::Default) => SkewConfig::default(),
        Some(PresetArg::Strict) => SkewConfig::strict(),
        Some(PresetArg::Lenient) => SkewConfig::lenient(),
    }
}

/// Parse `action:target[:weight]`
///
/// The weight defaults to the configured step for the action; KU
/// confidence rules leave it at zero so the step is applied at execution.
fn parse_rule(text: &str, reason: &str, config: &CalibrationConfig) -> Result<CalibrationRule> {
    let (action, rest) = text
        .split_once(':')
        .ok_or_else(|| CliError::InvalidInput(format!("rule '{}' is not action:target[:weight]", text)))?;
    let action: CalibrationAction = action.parse()?;

    let (target, weight) = match rest.rsplit_once(':') {
        Some((target, w)) => match w.parse::<f64>() {
            Ok(weight) => (target, Some(weight)),
            Err(_) => (rest, None),
        },
        None => (rest, None),
    };
    if target.is_empty() {
        return Err(CliError::InvalidInput(format!("rule '{}' has no target", text)));
    }
    let weight = weight.unwrap_or(match action {
        CalibrationAction::BoostDomain | CalibrationAction::SuppressDomain => config.domain_step,
        CalibrationAction::PrioritizeSource | CalibrationAction::DeprioritizeSource => config.priority_step as f64,
        _ => 0.0,
    });
    Ok(CalibrationRule::new(action, target, weight, reason))
}

fn plan_table(formatter: &Formatter, plan: &CalibrationPlan) -> String {
    let rows = plan.rules.iter().map(|r| {
        vec![
            r.action.to_string(),
            r.target.clone(),
            format!("{:.2}", r.weight),
            if r.applied { "yes" } else { "no" }.to_string(),
            r.reason.clone(),
        ]
    });
    formatter.table(&["Action", "Target", "Weight", "Applied", "Reason"], rows, "Plan has no rules.")
}

fn skew_text(formatter: &Formatter, skew: &SkewReport) -> String {
    let mut out = formatter.fields(&[
        ("Health", formatter.health(skew.health_score)),
        ("Gini", format!("{:.3}", skew.gini)),
        ("Imbalance", format!("{:.1}:1", skew.imbalance_ratio)),
        ("Density CV", format!("{:.3}", skew.density_cv)),
    ]);
    for skipped in &skew.skipped {
        out.push('\n');
        out.push_str(&formatter.info(skipped));
    }
    for alert in &skew.alerts {
        out.push_str(&format!(
            "\n\n[{}] {}: {}",
            formatter.severity(alert.severity),
            alert.kind.as_str(),
            alert.message
        ));
        for rec in &alert.recommendations {
            out.push_str(&format!("\n  - {}", rec));
        }
    }
    out
}

/// Execute `growth rebalance`.
pub fn execute_rebalance(args: RebalanceArgs, corpus: &Corpus, formatter: &Formatter) -> Result<Outcome> {
    let store = corpus.store()?;
    let calibrator = Calibrator::new(&store, corpus.config.calibration.clone());

    if args.plans {
        let state = calibrator.state()?;
        let text = formatter.render(&state.plans, |f| {
            let rows = state.plans.iter().map(|p| {
                vec![
                    short_id(&p.id, 13),
                    p.created_at.format("%Y-%m-%d %H:%M").to_string(),
                    p.origin.clone(),
                    p.rules.len().to_string(),
                    p.pending().to_string(),
                ]
            });
            f.table(&["Plan", "Created", "Origin", "Rules", "Pending"], rows, "No calibration plans.")
        })?;
        emit(&text);
        let pending = state.plans.iter().filter(|p| !p.is_complete()).count();
        let message = format!("{} plan(s), {} with pending rules", state.plans.len(), pending);
        return Ok(finish(formatter, Outcome::Success, &message));
    }

    if let Some(plan_ref) = &args.execute {
        let versions = corpus.versions()?;
        let report = calibrator.execute_plan(plan_ref, args.dry_run, &versions)?;
        if !report.dry_run && !report.applied.is_empty() {
            record_change(
                &versions,
                NewChange::new(
                    ChangeKind::Calibration,
                    "calibration-plan",
                    &report.plan_id,
                    format!("Applied {} calibration rule(s)", report.applied.len()),
                )
                .impact(if report.backup.is_some() { Impact::High } else { Impact::Medium })
                .reversible(report.backup.is_some()),
            );
        }

        let text = formatter.render(&report, |f| {
            let rows = report
                .applied
                .iter()
                .map(|e| vec![e.action.to_string(), e.target.clone(), e.detail.clone()]);
            let mut out = f.table(&["Action", "Target", "Change"], rows, "Nothing left to apply.");
            for target in &report.missing_targets {
                out.push('\n');
                out.push_str(&f.warning(&format!("target {} no longer exists", target)));
            }
            out
        })?;
        emit(&text);

        let verb = if report.dry_run { "Would apply" } else { "Applied" };
        let message = format!(
            "{} {} rule(s) of plan {}; {} already applied",
            verb,
            report.applied.len(),
            short_id(&report.plan_id, 13),
            report.already_applied
        );
        let outcome = if report.missing_targets.is_empty() { Outcome::Success } else { Outcome::Warnings };
        return Ok(finish(formatter, outcome, &message));
    }

    if !args.rules.is_empty() {
        let rules = args
            .rules
            .iter()
            .map(|text| parse_rule(text, &args.reason, &corpus.config.calibration))
            .collect::<Result<Vec<_>>>()?;
        let plan = if args.dry_run {
            CalibrationPlan::new("manual", rules)
        } else {
            calibrator.add_manual_plan(rules)?
        };
        let text = formatter.render(&plan, |f| plan_table(f, &plan))?;
        emit(&text);
        let message = if args.dry_run {
            format!("Would save a manual plan with {} rule(s)", plan.rules.len())
        } else {
            format!("Saved plan {}; run with --execute {}", plan.id, short_id(&plan.id, 13))
        };
        return Ok(finish(formatter, Outcome::Success, &message));
    }

    let config = skew_config(args.preset, &corpus.config.skew);
    config.validate()?;
    let view = corpus.view(&store)?;
    let density = DensityAnalyzer::new(&view).analyze();
    let skew = SkewDetector::new(config).detect(&density);
    let plan = calibrator.plan_from_alerts(&skew, &density)?;
    let saved = args.save && !args.dry_run && !plan.rules.is_empty();
    if saved {
        calibrator.save_plan(&plan)?;
    }

    let value = json!({ "density": density, "skew": skew, "plan": plan, "saved": saved });
    let text = formatter.render(&value, |f| {
        let domains = density.domains.iter().map(|d| {
            vec![
                d.domain.clone(),
                d.ku_count.to_string(),
                d.source_count.to_string(),
                format!("{:.2}", d.mean_confidence),
                format!("{:.2}", d.density),
            ]
        });
        let mut out = f.table(
            &["Domain", "KUs", "Sources", "Confidence", "Density"],
            domains,
            "No active knowledge units.",
        );
        out.push_str("\n\n");
        out.push_str(&skew_text(f, &skew));
        if !plan.rules.is_empty() {
            out.push_str("\n\nProposed calibration:\n");
            out.push_str(&plan_table(f, &plan));
        }
        out
    })?;
    emit(&text);

    let outcome = Outcome::from_severity(skew.worst_severity());
    let mut message = format!("{} skew alert(s), {} proposed rule(s)", skew.alerts.len(), plan.rules.len());
    if saved {
        message.push_str(&format!("; saved plan {}", short_id(&plan.id, 13)));
    } else if !plan.rules.is_empty() {
        message.push_str("; save with --save");
    }
    Ok(finish(formatter, outcome, &message))
}
