//! Unreferenced and disconnected entity detection

use crate::config::AuditConfig;
use crate::graph::{CorpusGraph, ReverseIndex};
use crate::view::CorpusView;
use scriptorium_domain::Severity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What kind of entity is orphaned
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrphanKind {
    /// Chunk no KU cites
    Chunk,
    /// KU no RU names
    Ku,
    /// Source document no KU cites
    Pdf,
    /// KU component disconnected from the main component
    IsolatedCluster,
}

impl OrphanKind {
    /// Name used in reports
    pub fn as_str(&self) -> &'static str {
        match self {
            OrphanKind::Chunk => "chunk",
            OrphanKind::Ku => "ku",
            OrphanKind::Pdf => "pdf",
            OrphanKind::IsolatedCluster => "isolated-cluster",
        }
    }
}

/// One orphaned entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanEntity {
    /// Entity kind
    pub kind: OrphanKind,
    /// Entity id (cluster entities use `cluster-<n>`)
    pub id: String,
    /// Severity
    pub severity: Severity,
    /// Member KU ids, for clusters
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<String>,
    /// Suggested follow-up
    pub recommendation: String,
}

/// Orphan scan results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrphanReport {
    /// Chunks listed by the chunk store
    pub total_chunks: usize,
    /// Chunks cited by at least one KU
    pub referenced_chunks: usize,
    /// KUs in the log
    pub total_kus: usize,
    /// Documents on disk
    pub total_documents: usize,
    /// Size of the largest KU component
    pub main_cluster_size: usize,
    /// Number of KU components
    pub cluster_count: usize,
    /// Every orphan found
    pub orphans: Vec<OrphanEntity>,
    /// Chunk scan skipped for want of a chunk store
    pub chunk_scan_skipped: bool,
}

impl OrphanReport {
    /// Orphans of one kind
    pub fn of_kind(&self, kind: OrphanKind) -> impl Iterator<Item = &OrphanEntity> {
        self.orphans.iter().filter(move |o| o.kind == kind)
    }

    /// Number of orphans of one kind
    pub fn count(&self, kind: OrphanKind) -> usize {
        self.of_kind(kind).count()
    }
}

/// Finds entities nothing refers to, and disconnected KU clusters
pub struct OrphanIdentifier<'a> {
    view: &'a CorpusView,
    isolated_ratio: f64,
}

impl<'a> OrphanIdentifier<'a> {
    /// Create an identifier over `view`
    pub fn new(view: &'a CorpusView, config: &AuditConfig) -> Self {
        Self {
            view,
            isolated_ratio: config.isolated_cluster_ratio,
        }
    }

    /// Run every orphan scan
    pub fn identify(&self) -> OrphanReport {
        let reverse = ReverseIndex::from_view(self.view);
        let mut report = OrphanReport {
            total_kus: self.view.kus.len(),
            total_documents: self.view.documents.len(),
            chunk_scan_skipped: !self.view.chunks_available(),
            ..Default::default()
        };

        if let Some(chunks) = &self.view.chunks {
            report.total_chunks = chunks.len();
            for chunk_id in chunks.keys() {
                if reverse.chunk_to_kus.contains_key(chunk_id) {
                    report.referenced_chunks += 1;
                } else {
                    report.orphans.push(OrphanEntity {
                        kind: OrphanKind::Chunk,
                        id: chunk_id.clone(),
                        severity: Severity::Low,
                        members: Vec::new(),
                        recommendation: "Extract knowledge from this chunk or drop it from the chunk store".into(),
                    });
                }
            }
        }

        for ku in &self.view.kus {
            if !reverse.ku_to_rus.contains_key(&ku.id) {
                report.orphans.push(OrphanEntity {
                    kind: OrphanKind::Ku,
                    id: ku.id.clone(),
                    severity: Severity::Medium,
                    members: Vec::new(),
                    recommendation: "Run reasoning over this KU's topic".into(),
                });
            }
        }

        for path in &self.view.documents {
            if !reverse.document_to_kus.contains_key(path) {
                report.orphans.push(OrphanEntity {
                    kind: OrphanKind::Pdf,
                    id: path.clone(),
                    severity: Severity::Medium,
                    members: Vec::new(),
                    recommendation: "Process this document through the extraction pipeline".into(),
                });
            }
        }

        self.find_isolated_clusters(&mut report);
        tracing::debug!("Found {} orphan(s)", report.orphans.len());
        report
    }

    /// Components of the RU co-membership graph smaller than the
    /// configured fraction of the main component
    fn find_isolated_clusters(&self, report: &mut OrphanReport) {
        let graph = CorpusGraph::from_view(self.view);
        let known: BTreeSet<&str> = self.view.ku_ids();
        let components: Vec<Vec<String>> = graph
            .components()
            .into_iter()
            .map(|c| c.into_iter().filter(|id| known.contains(id.as_str())).collect::<Vec<_>>())
            .filter(|c| !c.is_empty())
            .collect();

        report.cluster_count = components.len();
        let Some(main) = components.first() else {
            return;
        };
        report.main_cluster_size = main.len();
        let limit = main.len() as f64 * self.isolated_ratio;

        for (n, members) in components.iter().enumerate().skip(1) {
            if (members.len() as f64) < limit {
                report.orphans.push(OrphanEntity {
                    kind: OrphanKind::IsolatedCluster,
                    id: format!("cluster-{}", n),
                    severity: Severity::Medium,
                    members: members.clone(),
                    recommendation: format!(
                        "Relate these {} KU(s) to the main body of {} KU(s)",
                        members.len(),
                        main.len()
                    ),
                });
            }
        }
    }
}
