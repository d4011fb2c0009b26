//! Reasoning Unit module - relations built over KUs

use crate::hashing::{hash_fields, prefixed_id};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A Reasoning Unit: a labelled relation over an ordered set of KUs
///
/// RUs are produced by an external reasoning step and are only ever read
/// here, except for link repair which strips ids that no longer resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningUnit {
    /// Identifier (`ru_<hex>` when generated locally)
    #[serde(default)]
    pub id: String,

    /// Relation label (e.g. "supports", "contradicts", "synthesizes")
    #[serde(default)]
    pub relation: String,

    /// Topic the relation belongs to
    #[serde(default)]
    pub topic: String,

    /// Member KU ids, in order
    #[serde(default)]
    pub knowledge_ids: Vec<String>,

    /// Score assigned by the reasoning step
    #[serde(default)]
    pub score: f64,

    /// Content hash over relation, topic and members
    #[serde(default)]
    pub hash: String,

    /// Unknown fields, preserved on rewrite but otherwise ignored
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ReasoningUnit {
    /// Create an RU, deriving hash and id from its content
    pub fn new(
        relation: impl Into<String>,
        topic: impl Into<String>,
        knowledge_ids: Vec<String>,
        score: f64,
    ) -> Self {
        let relation = relation.into();
        let topic = topic.into();
        let hash = Self::compute_hash(&relation, &topic, &knowledge_ids);
        Self {
            id: prefixed_id("ru", &hash),
            relation,
            topic,
            knowledge_ids,
            score,
            hash,
            extra: BTreeMap::new(),
        }
    }

    /// Content hash; member order does not matter
    pub fn compute_hash(relation: &str, topic: &str, knowledge_ids: &[String]) -> String {
        let mut ids: Vec<&str> = knowledge_ids.iter().map(String::as_str).collect();
        ids.sort_unstable();
        hash_fields([relation, topic].into_iter().chain(ids))
    }

    /// Recompute the content hash from current fields
    pub fn recompute_hash(&self) -> String {
        Self::compute_hash(&self.relation, &self.topic, &self.knowledge_ids)
    }

    /// Whether the stored hash matches the content (empty hashes are not checked)
    pub fn hash_matches(&self) -> bool {
        self.hash.is_empty() || self.hash == self.recompute_hash()
    }

    /// Whether this RU references the given KU
    pub fn references(&self, ku_id: &str) -> bool {
        self.knowledge_ids.iter().any(|id| id == ku_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_member_order_independent() {
        let a = ReasoningUnit::new("supports", "t", vec!["ku_a".into(), "ku_b".into()], 0.7);
        let b = ReasoningUnit::new("supports", "t", vec!["ku_b".into(), "ku_a".into()], 0.2);
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.id, b.id);
        assert!(a.hash_matches());
    }

    #[test]
    fn test_hash_detects_member_change() {
        let mut ru = ReasoningUnit::new("supports", "t", vec!["ku_a".into(), "ku_b".into()], 0.7);
        ru.knowledge_ids.pop();
        assert!(!ru.hash_matches());
        assert!(ru.references("ku_a"));
        assert!(!ru.references("ku_b"));
    }

    #[test]
    fn test_tolerant_parse() {
        let json = r#"{"id":"ru_1","knowledge_ids":["ku_a"],"origin":"batch-7"}"#;
        let ru: ReasoningUnit = serde_json::from_str(json).unwrap();
        assert_eq!(ru.score, 0.0);
        assert!(ru.hash.is_empty());
        assert!(ru.hash_matches());
        assert!(ru.extra.contains_key("origin"));
    }
}
