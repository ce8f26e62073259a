//! Genome representation for strategy evolution
//!
//! A genome is a directed acyclic graph of [`FactorNode`]s. Each node is a
//! typed, parameterised unit of strategy logic (a momentum signal, a risk
//! filter, an entry trigger, ...). Edges are implied by `depends_on`: a node
//! consumes the output of every node it depends on.
//!
//! Entry and exit nodes are the outputs of a strategy and act as the roots
//! of the graph. Every other node has to feed (transitively) into one of
//! them, otherwise it is an orphan and the genome is rejected.
//!
//! Nodes and parameters are kept in ordered maps so that a seeded run walks
//! them in the same order every time.
use crate::engines::generation::logic::LogicExpr;
use crate::types::{FactorCategory, ParamValue, Parameter, Tier};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GenomeId(pub u64);

impl GenomeId {
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        GenomeId(rng.gen())
    }

    /// Deterministic child id, independent of the order in which offspring
    /// are produced.
    pub fn derive(parent: GenomeId, seed: u64, tier: Tier) -> Self {
        let salt = (tier.index() as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        GenomeId(splitmix64(parent.0 ^ seed.rotate_left(17) ^ salt))
    }
}

impl fmt::Display for GenomeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

pub(crate) fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorNode {
    pub id: NodeId,
    pub category: FactorCategory,
    /// Registry template the node was built from (e.g. `rsi`)
    pub template: String,
    pub parameters: BTreeMap<String, Parameter>,
    pub logic: LogicExpr,
    pub depends_on: BTreeSet<NodeId>,
}

impl FactorNode {
    pub fn new(id: NodeId, category: FactorCategory, template: &str, logic: LogicExpr) -> Self {
        Self {
            id,
            category,
            template: template.to_string(),
            parameters: BTreeMap::new(),
            logic,
            depends_on: BTreeSet::new(),
        }
    }

    pub fn with_parameter(mut self, name: &str, parameter: Parameter) -> Self {
        self.parameters.insert(name.to_string(), parameter);
        self
    }

    pub fn with_dependency(mut self, id: NodeId) -> Self {
        self.depends_on.insert(id);
        self
    }

    /// Names of parameters holding integer or float values.
    pub fn numeric_parameters(&self) -> Vec<&str> {
        self.parameters
            .iter()
            .filter(|(_, p)| p.value.is_numeric())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn param_f64(&self, name: &str) -> Option<f64> {
        self.parameters.get(name).and_then(|p| p.value.as_f64())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genome {
    pub id: GenomeId,
    pub generation: usize,
    pub nodes: BTreeMap<NodeId, FactorNode>,
    pub lineage: Vec<GenomeId>,
    pub creation_tier: Option<Tier>,
}

impl Genome {
    pub fn new(id: GenomeId, generation: usize) -> Self {
        Self {
            id,
            generation,
            nodes: BTreeMap::new(),
            lineage: Vec::new(),
            creation_tier: None,
        }
    }

    pub fn insert(&mut self, node: FactorNode) {
        self.nodes.insert(node.id, node);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn next_node_id(&self) -> NodeId {
        self.nodes
            .keys()
            .next_back()
            .map(|id| NodeId(id.0 + 1))
            .unwrap_or(NodeId(0))
    }

    pub fn category_counts(&self) -> BTreeMap<FactorCategory, usize> {
        let mut counts = BTreeMap::new();
        for node in self.nodes.values() {
            *counts.entry(node.category).or_insert(0) += 1;
        }
        counts
    }

    pub fn count_category(&self, category: FactorCategory) -> usize {
        self.nodes.values().filter(|n| n.category == category).count()
    }

    /// Nodes that list `id` among their dependencies.
    pub fn dependents_of(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.depends_on.contains(&id))
            .map(|n| n.id)
            .collect()
    }

    pub fn output_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| n.category.is_output())
            .map(|n| n.id)
            .collect()
    }

    /// Kahn's algorithm over the edges that point at existing nodes.
    /// Dependencies come before their dependents. On a cycle, returns the
    /// nodes that could not be ordered.
    pub fn topological_order(&self) -> Result<Vec<NodeId>, Vec<NodeId>> {
        let mut in_degree: BTreeMap<NodeId, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();

        for node in self.nodes.values() {
            let present: Vec<NodeId> = node
                .depends_on
                .iter()
                .copied()
                .filter(|d| self.nodes.contains_key(d))
                .collect();
            in_degree.insert(node.id, present.len());
            for dep in present {
                dependents.entry(dep).or_default().push(node.id);
            }
        }

        let mut queue: VecDeque<NodeId> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = queue.pop_front() {
            order.push(id);
            if let Some(children) = dependents.get(&id) {
                for child in children {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(*child);
                        }
                    }
                }
            }
        }

        if order.len() == self.nodes.len() {
            Ok(order)
        } else {
            let sorted: BTreeSet<NodeId> = order.into_iter().collect();
            Err(self.nodes.keys().filter(|id| !sorted.contains(*id)).copied().collect())
        }
    }

    pub fn is_acyclic(&self) -> bool {
        self.topological_order().is_ok()
    }

    /// `(node, missing dependency)` pairs.
    pub fn dangling_dependencies(&self) -> Vec<(NodeId, NodeId)> {
        self.nodes
            .values()
            .flat_map(|n| {
                n.depends_on
                    .iter()
                    .filter(|d| !self.nodes.contains_key(*d))
                    .map(move |d| (n.id, *d))
            })
            .collect()
    }

    pub fn missing_required(&self) -> Vec<FactorCategory> {
        FactorCategory::REQUIRED
            .iter()
            .copied()
            .filter(|c| self.count_category(*c) == 0)
            .collect()
    }

    /// Nodes that no output node reaches through `depends_on`.
    pub fn unreachable_nodes(&self) -> Vec<NodeId> {
        let mut seen: BTreeSet<NodeId> = BTreeSet::new();
        let mut queue: VecDeque<NodeId> = self.output_nodes().into_iter().collect();
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(&id) {
                for dep in &node.depends_on {
                    if self.nodes.contains_key(dep) && !seen.contains(dep) {
                        queue.push_back(*dep);
                    }
                }
            }
        }
        self.nodes.keys().filter(|id| !seen.contains(*id)).copied().collect()
    }

    /// Drop orphaned nodes and any dependency edges pointing at them.
    pub fn prune_unreachable(&mut self) -> Vec<NodeId> {
        let orphans = self.unreachable_nodes();
        for id in &orphans {
            self.nodes.remove(id);
        }
        for node in self.nodes.values_mut() {
            for id in &orphans {
                node.depends_on.remove(id);
            }
        }
        orphans
    }

    /// Acyclic, closed, covers the required categories and has no orphans.
    pub fn is_structurally_sound(&self) -> bool {
        self.is_acyclic()
            && self.dangling_dependencies().is_empty()
            && self.missing_required().is_empty()
            && self.unreachable_nodes().is_empty()
    }

    /// Copy of this genome as a fresh offspring of `tier`.
    pub fn derive_child(&self, seed: u64, tier: Tier) -> Genome {
        let mut child = self.clone();
        child.id = GenomeId::derive(self.id, seed, tier);
        child.generation = self.generation + 1;
        child.lineage = vec![self.id];
        child.creation_tier = Some(tier);
        child
    }

    /// The parent itself, marked as an unmutated placeholder.
    pub fn as_noop(&self) -> Genome {
        let mut copy = self.clone();
        copy.creation_tier = None;
        copy
    }

    /// Content signature ignoring id, lineage and generation.
    pub fn canonical_string(&self) -> String {
        serde_json::to_string(&self.nodes).unwrap_or_default()
    }

    pub fn numeric_param(&self, node: NodeId, name: &str) -> Option<f64> {
        self.nodes.get(&node).and_then(|n| n.param_f64(name))
    }

    pub fn param_value(&self, node: NodeId, name: &str) -> Option<&ParamValue> {
        self.nodes
            .get(&node)
            .and_then(|n| n.parameters.get(name))
            .map(|p| &p.value)
    }
}
