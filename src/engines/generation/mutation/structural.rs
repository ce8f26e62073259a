use super::{Mutation, Mutator};
use crate::config::StructuralConfig;
use crate::engines::generation::genome::{Genome, NodeId};
use crate::functions::registry::FactorRegistry;
use crate::types::{FactorCategory, Tier};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuralOp {
    AddNode,
    RemoveNode,
    ReplaceNode,
}

/// Tier 2: add, remove or replace one factor node
pub struct StructuralMutator {
    config: StructuralConfig,
    registry: Arc<FactorRegistry>,
}

impl StructuralMutator {
    pub fn new(config: StructuralConfig, registry: Arc<FactorRegistry>) -> Self {
        Self { config, registry }
    }

    fn pick_op<R: Rng>(&self, genome: &Genome, rng: &mut R) -> Option<StructuralOp> {
        let add_weight = if genome.len() >= self.config.max_nodes {
            0.0
        } else {
            self.config.add_weight
        };
        let ops = [
            (StructuralOp::AddNode, add_weight),
            (StructuralOp::RemoveNode, self.config.remove_weight),
            (StructuralOp::ReplaceNode, self.config.replace_weight),
        ];
        let dist = WeightedIndex::new(ops.iter().map(|(_, w)| w.max(0.0))).ok()?;
        Some(ops[dist.sample(rng)].0)
    }

    /// Apply a single operator to `child` in place. `false` means the
    /// operator had no legal target.
    pub fn apply_op<R: Rng>(&self, op: StructuralOp, child: &mut Genome, rng: &mut R) -> bool {
        match op {
            StructuralOp::AddNode => self.add_node(child, rng),
            StructuralOp::RemoveNode => self.remove_node(child, rng),
            StructuralOp::ReplaceNode => self.replace_node(child, rng),
        }
    }

    /// Insert a node of the least represented category, either as a new leaf
    /// below an existing node or spliced into an existing edge.
    fn add_node<R: Rng>(&self, genome: &mut Genome, rng: &mut R) -> bool {
        let counts = genome.category_counts();
        let categories = self.registry.categories();
        let Some(fewest) = categories
            .iter()
            .map(|c| counts.get(c).copied().unwrap_or(0))
            .min()
        else {
            return false;
        };
        let under: Vec<FactorCategory> = categories
            .into_iter()
            .filter(|c| counts.get(c).copied().unwrap_or(0) == fewest)
            .collect();
        let Some(category) = under.choose(rng).copied() else {
            return false;
        };

        let new_id = genome.next_node_id();
        let Some(mut node) = self.registry.random_node(category, new_id, rng) else {
            return false;
        };

        let edges: Vec<(NodeId, NodeId)> = genome
            .nodes
            .values()
            .flat_map(|n| n.depends_on.iter().map(move |d| (n.id, *d)))
            .collect();

        if !edges.is_empty() && rng.gen_bool(0.5) {
            let (consumer, producer) = edges[rng.gen_range(0..edges.len())];
            if let Some(consumer_node) = genome.nodes.get_mut(&consumer) {
                consumer_node.depends_on.remove(&producer);
                consumer_node.depends_on.insert(new_id);
            }
            node.depends_on.insert(producer);
        } else if !category.is_output() {
            let hosts: Vec<NodeId> = genome.nodes.keys().copied().collect();
            let Some(host) = hosts.choose(rng).copied() else {
                return false;
            };
            if let Some(host_node) = genome.nodes.get_mut(&host) {
                host_node.depends_on.insert(new_id);
            }
        }

        log::debug!("add_node: {} {} ({})", category, new_id, node.template);
        genome.insert(node);
        true
    }

    /// Remove a node that is not the last of a required category. Its
    /// dependents inherit its dependencies; anything left unreachable is dropped.
    fn remove_node<R: Rng>(&self, genome: &mut Genome, rng: &mut R) -> bool {
        let candidates: Vec<NodeId> = genome
            .nodes
            .values()
            .filter(|n| !(n.category.is_required() && genome.count_category(n.category) == 1))
            .map(|n| n.id)
            .collect();
        let Some(target) = candidates.choose(rng).copied() else {
            return false;
        };
        let Some(removed) = genome.nodes.remove(&target) else {
            return false;
        };

        for node in genome.nodes.values_mut() {
            if node.depends_on.remove(&target) {
                let own_id = node.id;
                node.depends_on
                    .extend(removed.depends_on.iter().copied().filter(|d| *d != own_id));
            }
        }
        let dropped = genome.prune_unreachable();
        log::debug!("remove_node: {} (dropped {} orphan(s))", target, dropped.len());
        true
    }

    /// Swap a node for a different template of the same category, keeping
    /// its id and edges.
    fn replace_node<R: Rng>(&self, genome: &mut Genome, rng: &mut R) -> bool {
        let candidates: Vec<NodeId> = genome
            .nodes
            .values()
            .filter(|n| !self.registry.templates(n.category).is_empty())
            .map(|n| n.id)
            .collect();
        let Some(target) = candidates.choose(rng).copied() else {
            return false;
        };
        let Some(old) = genome.nodes.get(&target).cloned() else {
            return false;
        };

        let templates = self.registry.templates(old.category);
        let alternatives: Vec<_> = templates.iter().filter(|t| t.alias() != old.template).collect();
        let template = match alternatives.choose(rng) {
            Some(t) => (*t).clone(),
            None => match templates.choose(rng) {
                Some(t) => t.clone(),
                None => return false,
            },
        };

        let mut replacement = self.registry.instantiate(template.as_ref(), target, rng);
        replacement.depends_on = old.depends_on.clone();
        if replacement == old {
            return false;
        }
        log::debug!("replace_node: {} {} -> {}", target, old.template, replacement.template);
        genome.insert(replacement);
        true
    }
}

impl Mutator for StructuralMutator {
    fn tier(&self) -> Tier {
        Tier::Structural
    }

    fn apply(&self, genome: &Genome, seed: u64) -> Mutation {
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..self.config.max_attempts.max(1) {
            let Some(op) = self.pick_op(genome, &mut rng) else {
                break;
            };
            let mut child = genome.derive_child(seed, Tier::Structural);
            if !self.apply_op(op, &mut child, &mut rng) {
                continue;
            }
            if child.nodes != genome.nodes && child.is_structurally_sound() {
                return Mutation {
                    genome: child,
                    clamp_events: Vec::new(),
                };
            }
        }
        Mutation::noop(genome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::generation::genome::GenomeId;

    fn minimal(registry: &FactorRegistry) -> Genome {
        let mut g = Genome::new(GenomeId(5), 0);
        let entry = registry.get("breakout_entry").unwrap();
        let exit = registry.get("time_exit").unwrap();
        g.insert(registry.instantiate_default(entry.as_ref(), NodeId(0)));
        g.insert(registry.instantiate_default(exit.as_ref(), NodeId(1)));
        g
    }

    #[test]
    fn test_remove_never_drops_last_required_node() {
        let registry = Arc::new(FactorRegistry::new());
        let mutator = StructuralMutator::new(StructuralConfig::default(), registry.clone());
        let genome = minimal(&registry);
        let mut rng = StdRng::seed_from_u64(0);
        let mut child = genome.clone();
        assert!(!mutator.apply_op(StructuralOp::RemoveNode, &mut child, &mut rng));
        assert_eq!(child, genome);
    }

    #[test]
    fn test_add_fills_underrepresented_category() {
        let registry = Arc::new(FactorRegistry::new());
        let mutator = StructuralMutator::new(StructuralConfig::default(), registry.clone());
        let mut genome = minimal(&registry);
        let mut rng = StdRng::seed_from_u64(4);
        assert!(mutator.apply_op(StructuralOp::AddNode, &mut genome, &mut rng));
        let added = genome.nodes.get(&NodeId(2)).unwrap();
        assert!(!added.category.is_required());
        assert!(genome.is_structurally_sound());
    }

    #[test]
    fn test_remove_rewires_dependents() {
        let registry = Arc::new(FactorRegistry::new());
        let mutator = StructuralMutator::new(StructuralConfig::default(), registry.clone());
        let mut genome = minimal(&registry);
        // entry(0) -> quality(3) -> momentum(2)
        let rsi = registry.get("rsi").unwrap();
        let adx = registry.get("adx_trend").unwrap();
        genome.insert(registry.instantiate_default(rsi.as_ref(), NodeId(2)));
        genome.insert(registry.instantiate_default(adx.as_ref(), NodeId(3)).with_dependency(NodeId(2)));
        genome.nodes.get_mut(&NodeId(0)).unwrap().depends_on.insert(NodeId(3));
        assert!(genome.is_structurally_sound());

        for seed in 0..32 {
            let mut child = genome.clone();
            let mut rng = StdRng::seed_from_u64(seed);
            assert!(mutator.apply_op(StructuralOp::RemoveNode, &mut child, &mut rng));
            assert!(child.is_structurally_sound());
            if !child.nodes.contains_key(&NodeId(3)) && child.nodes.contains_key(&NodeId(2)) {
                assert!(child.nodes[&NodeId(0)].depends_on.contains(&NodeId(2)));
            }
        }
    }

    #[test]
    fn test_replace_keeps_category_and_edges() {
        let registry = Arc::new(FactorRegistry::new());
        let mutator = StructuralMutator::new(StructuralConfig::default(), registry.clone());
        let genome = minimal(&registry);
        let mut rng = StdRng::seed_from_u64(8);
        let mut child = genome.clone();
        assert!(mutator.apply_op(StructuralOp::ReplaceNode, &mut child, &mut rng));
        for (id, node) in &child.nodes {
            let before = &genome.nodes[id];
            assert_eq!(node.category, before.category);
            assert_eq!(node.depends_on, before.depends_on);
        }
        assert_ne!(child.nodes, genome.nodes);
    }

    #[test]
    fn test_apply_produces_sound_offspring() {
        let registry = Arc::new(FactorRegistry::new());
        let mutator = StructuralMutator::new(StructuralConfig::default(), registry.clone());
        let mut rng = StdRng::seed_from_u64(21);
        for seed in 0..100u64 {
            let parent = registry.seed_genome(GenomeId::random(&mut rng), &mut rng).unwrap();
            let mutation = mutator.apply(&parent, seed);
            assert!(mutation.genome.is_structurally_sound());
            if !mutation.is_noop() {
                assert_eq!(mutation.genome.lineage, vec![parent.id]);
            }
        }
    }
}
