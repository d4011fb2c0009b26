//! Audit family: chain, gaps, coverage, report, fix, full.

use super::{emit, finish, record_change, Corpus};
use crate::cli::{
    AuditArgs, AuditCommand, ChainArgs, CoverageArgs, FixArgs, FullArgs, GapsArgs, PresetArg, ReportArgs,
};
use crate::error::Result;
use crate::output::{short_id, truncate, Formatter};
use crate::outcome::Outcome;
use scriptorium_audit::{
    apply_repair, plan_repair, AuditConfig, Auditor, ChainStatus, CorpusView, CoverageAnalyzer, Gap, GapReport,
    GapReporter, LinkDetector, NodeKind, ProvenanceNode, Tracer,
};
use scriptorium_domain::Severity;
use scriptorium_growth::{ChangeKind, Impact, NewChange};
use serde_json::json;
use std::fs;

/// Execute an audit command.
pub fn execute_audit(args: AuditArgs, corpus: &Corpus, formatter: &Formatter) -> Result<Outcome> {
    let config = match args.preset {
        Some(PresetArg::Strict) => AuditConfig::strict(),
        Some(PresetArg::Lenient) => AuditConfig::lenient(),
        Some(PresetArg::Default) => AuditConfig::default(),
        None => corpus.config.audit.clone(),
    };
    config.validate()?;

    let store = corpus.store()?;
    let view = corpus.view(&store)?;
    let versions = corpus.versions()?;
    let reference = corpus.reference_hashes(&versions)?;

    match args.command {
        AuditCommand::Chain(chain) => execute_chain(chain, &view, &reference, &config, formatter),
        AuditCommand::Gaps(gaps) => {
            let report = GapReporter::new(config).report(&view, &reference);
            execute_gaps(gaps, &report, formatter)
        }
        AuditCommand::Coverage(coverage) => execute_coverage(coverage, &view, &config, formatter),
        AuditCommand::Report(report) => {
            let gaps = GapReporter::new(config).report(&view, &reference);
            execute_report(report, &gaps, formatter)
        }
        AuditCommand::Fix(fix) => execute_fix(fix, &view, &store, &versions, formatter),
        AuditCommand::Full(full) => {
            let report = Auditor::new(config).run(&view, &reference);
            execute_full(full, &report, formatter)
        }
    }
}

fn node_kind(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Ru => "RU",
        NodeKind::Ku => "KU",
        NodeKind::Chunk => "chunk",
        NodeKind::DocumentPage => "pages",
        NodeKind::Document => "document",
    }
}

fn render_tree(formatter: &Formatter, node: &ProvenanceNode, depth: usize, out: &mut Vec<String>) {
    let mark = if node.verified {
        formatter.success("")
    } else {
        formatter.error("")
    };
    let mut line = format!(
        "{}{} {} {} {}",
        "  ".repeat(depth),
        mark.trim_end(),
        node_kind(node.kind),
        node.id,
        truncate(&node.label, 60)
    );
    if let Some(detail) = &node.detail {
        line.push_str(&format!(" ({})", detail));
    }
    out.push(line);
    for child in &node.children {
        render_tree(formatter, child, depth + 1, out);
    }
}

fn execute_chain(
    args: ChainArgs,
    view: &CorpusView,
    reference: &std::collections::BTreeMap<String, String>,
    config: &AuditConfig,
    formatter: &Formatter,
) -> Result<Outcome> {
    let tracer = Tracer::new(view, reference)
        .with_hash_verification(config.verify_document_hashes && !args.no_hash_check);

    if args.dependents {
        let dependents = if view.chunk(&args.id).is_some() {
            tracer.trace_back_chunk(&args.id)
        } else {
            tracer.trace_back_document(&args.id)
        };
        let text = formatter.render(&dependents, |f| {
            let rows = dependents
                .knowledge_ids
                .iter()
                .map(|id| vec!["KU".to_string(), id.clone()])
                .chain(dependents.reasoning_ids.iter().map(|id| vec!["RU".to_string(), id.clone()]));
            f.table(&["Kind", "Id"], rows, "Nothing depends on it.")
        })?;
        emit(&text);
        let message = format!(
            "{} KU(s) and {} RU(s) depend on {}",
            dependents.knowledge_ids.len(),
            dependents.reasoning_ids.len(),
            dependents.origin
        );
        return Ok(finish(formatter, Outcome::Success, &message));
    }

    let chain = tracer.trace(&args.id)?;
    let detector = LinkDetector::new(view);
    let links = if view.ru(&args.id).is_some() {
        detector.detect_ru_links(&args.id)?
    } else {
        detector.detect_ku_links(&args.id)?
    };

    let text = formatter.render(&json!({ "chain": chain, "links": links }), |f| {
        let mut lines = Vec::new();
        render_tree(f, &chain.root, 0, &mut lines);
        for issue in &chain.issues {
            lines.push(f.warning(issue));
        }
        if !links.broken.is_empty() {
            lines.push(String::new());
            lines.push(f.table(
                &["Link", "From", "To", "Severity"],
                links.broken.iter().map(|b| {
                    vec![
                        b.kind.as_str().to_string(),
                        b.source_id.clone(),
                        b.target_id.clone(),
                        f.severity(b.severity),
                    ]
                }),
                "",
            ));
        }
        lines.join("\n")
    })?;
    emit(&text);

    let outcome = match chain.status {
        ChainStatus::Complete if links.chain_complete => Outcome::Success,
        ChainStatus::Complete | ChainStatus::Partial => Outcome::Errors,
        ChainStatus::Broken => Outcome::Critical,
    };
    let message = format!(
        "Chain {}: {} node(s), {} unverified, {} broken link(s)",
        chain.status.as_str(),
        chain.total_nodes,
        chain.unverified_nodes,
        links.broken.len()
    );
    Ok(finish(formatter, outcome, &message))
}

fn gap_rows<'a>(formatter: &'a Formatter, gaps: impl IntoIterator<Item = &'a Gap> + 'a) -> impl Iterator<Item = Vec<String>> + 'a {
    gaps.into_iter().map(move |g| {
        vec![
            formatter.severity(g.severity),
            g.category.as_str().to_string(),
            truncate(&g.title, 60),
            g.entity_ids.len().to_string(),
            truncate(&g.remediation, 50),
        ]
    })
}

fn execute_gaps(args: GapsArgs, report: &GapReport, formatter: &Formatter) -> Result<Outcome> {
    let min: Severity = args.min_severity.map(Into::into).unwrap_or(Severity::Info);
    let shown: Vec<&Gap> = report
        .gaps
        .iter()
        .filter(|g| g.severity >= min)
        .filter(|g| args.category.as_deref().is_none_or(|c| g.category.as_str() == c))
        .collect();

    let text = formatter.render(&json!({ "health_score": report.health_score, "by_severity": report.by_severity, "gaps": shown }), |f| {
        let table = f.table(
            &["Severity", "Category", "Gap", "Entities", "Remediation"],
            gap_rows(f, shown.iter().copied()),
            "No gaps found.",
        );
        format!("{}\n{}", table, f.fields(&[("Health", f.health(report.health_score))]))
    })?;
    emit(&text);

    let outcome = Outcome::from_severity(shown.iter().map(|g| g.severity).max());
    let message = format!(
        "{} gap(s) shown of {}, health {}",
        shown.len(),
        report.gaps.len(),
        report.health_score
    );
    Ok(finish(formatter, outcome, &message))
}

fn execute_coverage(args: CoverageArgs, view: &CorpusView, config: &AuditConfig, formatter: &Formatter) -> Result<Outcome> {
    let report = CoverageAnalyzer::new(view, config).analyze();
    let text = formatter.render(&report, |f| {
        let rows = report
            .documents
            .iter()
            .filter(|d| !args.low_only || report.low_coverage.contains(&d.path))
            .map(|d| {
                vec![
                    d.path.clone(),
                    d.ku_count.to_string(),
                    d.covered_pages.to_string(),
                    d.total_pages.map(|t| t.to_string()).unwrap_or_else(|| "-".into()),
                    d.coverage_pct.map(|p| format!("{:.1}%", p)).unwrap_or_else(|| "-".into()),
                ]
            });
        let table = f.table(&["Document", "KUs", "Pages cited", "Pages", "Coverage"], rows, "No documents.");
        let fields = f.fields(&[
            ("Mean page coverage", format!("{:.1}%", report.mean_page_coverage_pct)),
            (
                "KUs in reasoning",
                format!("{} of {} ({:.1}%)", report.kus_in_reasoning, report.total_kus, report.ku_coverage_pct),
            ),
        ]);
        format!("{}\n{}", table, fields)
    })?;
    emit(&text);

    let outcome = if report.low_coverage.is_empty() {
        Outcome::Success
    } else {
        Outcome::Warnings
    };
    let message = format!(
        "{} document(s), {} below coverage threshold",
        report.documents.len(),
        report.low_coverage.len()
    );
    Ok(finish(formatter, outcome, &message))
}

fn remediation_markdown(report: &GapReport) -> String {
    let mut out = format!("# Remediation plan\n\nHealth score: {}/100\n\n", report.health_score);
    if report.remediation_plan.is_empty() {
        out.push_str("Nothing to remediate.\n");
        return out;
    }
    for step in &report.remediation_plan {
        out.push_str(&format!(
            "{}. [{}] {} ({} gap(s), {})\n",
            step.priority,
            step.severity,
            step.action,
            step.gap_count,
            step.category.as_str()
        ));
        if let Some(command) = &step.command {
            out.push_str(&format!("   `{}`\n", command));
        }
    }
    out
}

fn execute_report(args: ReportArgs, report: &GapReport, formatter: &Formatter) -> Result<Outcome> {
    let text = formatter.render(report, |_| remediation_markdown(report))?;
    emit(&text);
    if let Some(path) = &args.output {
        fs::write(path, format!("{}\n", text))?;
        tracing::info!("Report written to {}", path.display());
    }
    let outcome = Outcome::from_severity(report.worst_severity());
    let message = format!(
        "{} remediation step(s), health {}",
        report.remediation_plan.len(),
        report.health_score
    );
    Ok(finish(formatter, outcome, &message))
}

fn execute_fix(
    args: FixArgs,
    view: &CorpusView,
    store: &scriptorium_store::KnowledgeStore,
    versions: &scriptorium_growth::VersionManager,
    formatter: &Formatter,
) -> Result<Outcome> {
    let repair = plan_repair(view);
    let plan = &repair.plan;

    let backup = if args.dry_run || plan.is_empty() {
        None
    } else {
        let backup = apply_repair(store, versions, &repair)?;
        record_change(
            versions,
            NewChange::new(
                ChangeKind::Repair,
                "corpus",
                backup.clone().unwrap_or_default(),
                format!(
                    "stripped dangling references from {} KU(s) and {} RU(s)",
                    plan.ku_fixes.len(),
                    plan.ru_fixes.len()
                ),
            )
            .impact(Impact::Medium),
        );
        backup
    };

    let text = formatter.render(&json!({ "dry_run": args.dry_run, "plan": plan, "backup": backup }), |f| {
        let rows = plan
            .ku_fixes
            .iter()
            .map(|fix| {
                vec![
                    "KU".to_string(),
                    short_id(&fix.old_id, 20),
                    format!("drop chunk(s) {}; new id {}", fix.removed_chunks.join(", "), short_id(&fix.new_id, 20)),
                ]
            })
            .chain(plan.ru_fixes.iter().map(|fix| {
                let mut change = Vec::new();
                if !fix.removed_ids.is_empty() {
                    change.push(format!("drop {}", fix.removed_ids.join(", ")));
                }
                if !fix.remapped_ids.is_empty() {
                    change.push(format!("remap {} id(s)", fix.remapped_ids.len()));
                }
                vec!["RU".to_string(), short_id(&fix.ru_id, 20), change.join("; ")]
            }));
        let mut lines = vec![f.table(&["Kind", "Entity", "Change"], rows, "No dangling references.")];
        for id in &plan.unrepairable {
            lines.push(f.warning(&format!("{} has no valid source left; kept for review", id)));
        }
        if let Some(id) = &backup {
            lines.push(f.info(&format!("Backup snapshot {}", id)));
        }
        lines.join("\n")
    })?;
    emit(&text);

    let outcome = if !plan.unrepairable.is_empty() {
        Outcome::Errors
    } else {
        Outcome::Success
    };
    let verb = if args.dry_run { "Would repair" } else { "Repaired" };
    let message = format!(
        "{} {} KU(s) and {} RU(s), {} unrepairable",
        verb,
        plan.ku_fixes.len(),
        plan.ru_fixes.len(),
        plan.unrepairable.len()
    );
    Ok(finish(formatter, outcome, &message))
}

fn execute_full(args: FullArgs, report: &scriptorium_audit::FullAuditReport, formatter: &Formatter) -> Result<Outcome> {
    if let Some(path) = &args.output {
        fs::write(path, serde_json::to_string_pretty(report)?)?;
        tracing::info!("Full report written to {}", path.display());
    }

    let findings = &report.findings;
    let text = formatter.render(report, |f| {
        let orphans = findings.orphans.orphans.len();
        let fields = f.fields(&[
            ("Health", f.health(report.health_score())),
            ("Skipped log lines", report.skipped_lines.to_string()),
            (
                "Link integrity",
                format!(
                    "{:.1}% ({} broken of {} checked{})",
                    findings.links.integrity_score,
                    findings.links.broken.len(),
                    findings.links.total_checked(),
                    if findings.links.chunk_checks_skipped { ", chunk checks skipped" } else { "" }
                ),
            ),
            (
                "Orphans",
                format!(
                    "{} ({} cluster(s), main cluster {})",
                    orphans, findings.orphans.cluster_count, findings.orphans.main_cluster_size
                ),
            ),
            (
                "Citations",
                if findings.citations.skipped {
                    "skipped (no chunk store)".to_string()
                } else {
                    format!(
                        "accuracy {:.1}%, completeness {:.1}%, {} issue(s)",
                        findings.citations.accuracy_score,
                        findings.citations.completeness_score,
                        findings.citations.issues.len()
                    )
                },
            ),
            (
                "Coverage",
                format!(
                    "pages {:.1}%, KUs in reasoning {:.1}%",
                    findings.coverage.mean_page_coverage_pct, findings.coverage.ku_coverage_pct
                ),
            ),
            ("Changed documents", findings.document_mismatches.len().to_string()),
        ]);
        let table = f.table(
            &["Severity", "Category", "Gap", "Entities", "Remediation"],
            gap_rows(f, &report.gaps.gaps),
            "No gaps found.",
        );
        format!("{}\n\n{}", fields, table)
    })?;
    emit(&text);

    let outcome = Outcome::from_severity(report.worst_severity());
    let message = format!(
        "Audit complete: {} gap(s), health {}",
        report.gaps.gaps.len(),
        report.health_score()
    );
    Ok(finish(formatter, outcome, &message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptorium_domain::{KnowledgeUnit, ReasoningUnit, Source};

    #[test]
    fn test_remediation_markdown_orders_steps() {
        let ku = KnowledgeUnit::new("a", vec![Source::new("c", "a.pdf")], 0.5);
        let view = CorpusView::from_parts(vec![ku], vec![], None, ["a.pdf".to_string()], "/d");
        let report = GapReporter::new(AuditConfig::default()).report(&view, &Default::default());
        let text = remediation_markdown(&report);
        assert!(text.starts_with("# Remediation plan"));
        assert!(text.contains("1. ["));
    }

    #[test]
    fn test_empty_plan_markdown() {
        let report = GapReport::new(Vec::new());
        assert!(remediation_markdown(&report).contains("Nothing to remediate."));
    }

    #[test]
    fn test_tree_rendering() {
        let ku = KnowledgeUnit::new("claim", vec![Source::new("c1", "a.pdf")], 0.5);
        let ru = ReasoningUnit::new("supports", "topic", vec![ku.id.clone()], 1.0);
        let view = CorpusView::from_parts(vec![ku], vec![ru.clone()], None, ["a.pdf".to_string()], "/d");
        let reference = Default::default();
        let chain = Tracer::new(&view, &reference)
            .with_hash_verification(false)
            .trace(&ru.id)
            .unwrap();
        let formatter = Formatter::new(crate::config::OutputFormat::Table, false);
        let mut lines = Vec::new();
        render_tree(&formatter, &chain.root, 0, &mut lines);
        assert!(lines[0].contains("RU"));
        assert!(lines[1].starts_with("  "));
    }
}
