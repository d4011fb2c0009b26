//! Arena graph over the KU reference structure
//!
//! Entities live in an indexed pool; adjacency is a list of indices per
//! node and traversal state is a bitset, so no node ever owns another.

use crate::view::CorpusView;
use std::collections::{BTreeMap, VecDeque};

/// Fixed-size bitset used as the visited set
#[derive(Debug, Clone)]
pub struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    /// A bitset able to hold `len` bits, all clear
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
        }
    }

    /// Set bit `i`; returns `true` if it was previously clear
    pub fn insert(&mut self, i: usize) -> bool {
        let (word, bit) = (i / 64, 1u64 << (i % 64));
        let fresh = self.words[word] & bit == 0;
        self.words[word] |= bit;
        fresh
    }

    /// Whether bit `i` is set
    pub fn contains(&self, i: usize) -> bool {
        self.words[i / 64] & (1u64 << (i % 64)) != 0
    }
}

/// Undirected graph whose nodes are KU ids, connected when two KUs are
/// members of the same RU
#[derive(Debug, Clone, Default)]
pub struct CorpusGraph {
    ids: Vec<String>,
    slots: BTreeMap<String, usize>,
    adjacency: Vec<Vec<usize>>,
}

impl CorpusGraph {
    /// Build the co-membership graph from every RU in the view
    ///
    /// Only KUs named by at least one RU become nodes. Members of one RU are
    /// linked as a star around its first member, which yields the same
    /// components as a full clique with far fewer edges.
    pub fn from_view(view: &CorpusView) -> Self {
        let mut graph = Self::default();
        for ru in &view.rus {
            let members: Vec<usize> = ru.knowledge_ids.iter().map(|id| graph.slot(id)).collect();
            if let Some((&hub, rest)) = members.split_first() {
                for &other in rest {
                    if other != hub {
                        graph.adjacency[hub].push(other);
                        graph.adjacency[other].push(hub);
                    }
                }
            }
        }
        graph
    }

    fn slot(&mut self, id: &str) -> usize {
        if let Some(&i) = self.slots.get(id) {
            return i;
        }
        let i = self.ids.len();
        self.ids.push(id.to_string());
        self.slots.insert(id.to_string(), i);
        self.adjacency.push(Vec::new());
        i
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Whether a KU id is a node
    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    /// Connected components, largest first, each listing its member ids
    /// in sorted order
    pub fn components(&self) -> Vec<Vec<String>> {
        let mut visited = BitSet::new(self.len());
        let mut components = Vec::new();

        for start in 0..self.len() {
            if !visited.insert(start) {
                continue;
            }
            let mut members = vec![start];
            let mut queue = VecDeque::from([start]);
            while let Some(node) = queue.pop_front() {
                for &next in &self.adjacency[node] {
                    if visited.insert(next) {
                        members.push(next);
                        queue.push_back(next);
                    }
                }
            }
            let mut ids: Vec<String> = members.into_iter().map(|i| self.ids[i].clone()).collect();
            ids.sort();
            components.push(ids);
        }

        components.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        components
    }
}

/// Reverse references: which KUs cite a chunk or document, which RUs name a KU
#[derive(Debug, Clone, Default)]
pub struct ReverseIndex {
    /// chunk id -> KU ids citing it
    pub chunk_to_kus: BTreeMap<String, Vec<String>>,
    /// normalized document path -> KU ids citing it
    pub document_to_kus: BTreeMap<String, Vec<String>>,
    /// KU id -> RU ids naming it
    pub ku_to_rus: BTreeMap<String, Vec<String>>,
}

impl ReverseIndex {
    /// Build every reverse mapping in one pass over the view
    pub fn from_view(view: &CorpusView) -> Self {
        let mut index = Self::default();
        for ku in &view.kus {
            for chunk in ku.chunk_ids() {
                push_unique(index.chunk_to_kus.entry(chunk.to_string()).or_default(), &ku.id);
            }
            for path in ku.document_paths() {
                let key = crate::view::normalize_document_path(path).to_string();
                push_unique(index.document_to_kus.entry(key).or_default(), &ku.id);
            }
        }
        for ru in &view.rus {
            for ku_id in &ru.knowledge_ids {
                push_unique(index.ku_to_rus.entry(ku_id.clone()).or_default(), &ru.id);
            }
        }
        index
    }
}

fn push_unique(list: &mut Vec<String>, id: &str) {
    if !list.iter().any(|x| x == id) {
        list.push(id.to_string());
    }
}
