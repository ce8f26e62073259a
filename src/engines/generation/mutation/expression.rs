use super::{Mutation, Mutator};
use crate::config::ExpressionConfig;
use crate::engines::generation::genome::{FactorNode, Genome, NodeId};
use crate::engines::generation::logic::{Connective, RewriteRule};
use crate::functions::registry::FactorRegistry;
use crate::types::Tier;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::sync::Arc;

/// Tier 3: rewrite the logic expression of one node
pub struct ExpressionMutator {
    config: ExpressionConfig,
    registry: Arc<FactorRegistry>,
}

impl ExpressionMutator {
    pub fn new(config: ExpressionConfig, registry: Arc<FactorRegistry>) -> Self {
        Self { config, registry }
    }

    /// Every rule that could apply to `node`'s current expression.
    pub fn candidate_rules<R: Rng>(&self, node: &FactorNode, rng: &mut R) -> Vec<RewriteRule> {
        let logic = &node.logic;
        let mut rules = Vec::new();

        if let Ok(normal) = Normal::new(0.0, self.config.nudge_std_dev.max(f64::MIN_POSITIVE)) {
            for clause in logic.nudgeable_clauses() {
                rules.push(RewriteRule::NudgeThreshold {
                    clause,
                    factor: normal.sample(rng),
                });
            }
        }
        for clause in 0..logic.comparison_count() {
            rules.push(RewriteRule::FlipComparator { clause });
        }
        if logic.is_composite() && logic.clause_count() >= 2 {
            for index in 0..logic.clause_count() {
                rules.push(RewriteRule::RemoveClause { index });
            }
            rules.push(RewriteRule::SwapConnective);
        }
        let room = logic.comparison_count() < self.config.max_clauses;
        if room && self.config.max_clauses >= 2 {
            if let Some(clause) = self.registry.random_clause(node, rng) {
                let connective = if rng.gen_bool(0.5) {
                    Connective::And
                } else {
                    Connective::Or
                };
                rules.push(RewriteRule::AddClause { clause, connective });
            }
        }
        rules
    }
}

impl Mutator for ExpressionMutator {
    fn tier(&self) -> Tier {
        Tier::Expression
    }

    fn apply(&self, genome: &Genome, seed: u64) -> Mutation {
        let mut rng = StdRng::seed_from_u64(seed);
        let node_ids: Vec<NodeId> = genome.nodes.keys().copied().collect();

        for _ in 0..self.config.max_attempts.max(1) {
            let Some(node_id) = node_ids.choose(&mut rng).copied() else {
                break;
            };
            let Some(node) = genome.nodes.get(&node_id) else {
                continue;
            };
            let rules = self.candidate_rules(node, &mut rng);
            let Some(rule) = rules.choose(&mut rng) else {
                continue;
            };
            let Some(rewritten) = node.logic.rewrite(rule) else {
                continue;
            };
            // Nested composites count every comparison; existing excess may shrink but never grow.
            let cap = self.config.max_clauses.max(node.logic.comparison_count());
            if rewritten == node.logic || rewritten.comparison_count() > cap {
                continue;
            }

            log::debug!("{} on {}: {} -> {}", rule_name(rule), node_id, node.logic, rewritten);
            let mut child = genome.derive_child(seed, Tier::Expression);
            if let Some(target) = child.nodes.get_mut(&node_id) {
                target.logic = rewritten;
            }
            return Mutation {
                genome: child,
                clamp_events: Vec::new(),
            };
        }
        Mutation::noop(genome)
    }
}

fn rule_name(rule: &RewriteRule) -> &'static str {
    match rule {
        RewriteRule::NudgeThreshold { .. } => "nudge_threshold",
        RewriteRule::FlipComparator { .. } => "flip_comparator",
        RewriteRule::AddClause { .. } => "add_clause",
        RewriteRule::RemoveClause { .. } => "remove_clause",
        RewriteRule::SwapConnective => "swap_connective",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::generation::genome::GenomeId;
    use crate::engines::generation::logic::{Comparator, LogicExpr};

    fn single_clause_genome(registry: &FactorRegistry) -> Genome {
        let mut g = Genome::new(GenomeId(3), 0);
        let entry = registry.get("breakout_entry").unwrap();
        let exit = registry.get("time_exit").unwrap();
        g.insert(registry.instantiate_default(entry.as_ref(), NodeId(0)));
        g.insert(registry.instantiate_default(exit.as_ref(), NodeId(1)));
        g
    }

    #[test]
    fn test_single_clause_offers_no_removal() {
        let registry = Arc::new(FactorRegistry::new());
        let mutator = ExpressionMutator::new(ExpressionConfig::default(), registry);
        let node = FactorNode::new(
            NodeId(0),
            crate::types::FactorCategory::Momentum,
            "rsi",
            LogicExpr::input_vs_const("rsi", Comparator::Lt, 30.0),
        );
        let mut rng = StdRng::seed_from_u64(2);
        let rules = mutator.candidate_rules(&node, &mut rng);
        assert!(!rules.is_empty());
        assert!(rules
            .iter()
            .all(|r| !matches!(r, RewriteRule::RemoveClause { .. } | RewriteRule::SwapConnective)));
    }

    #[test]
    fn test_clause_limit_blocks_add() {
        let registry = Arc::new(FactorRegistry::new());
        let mutator = ExpressionMutator::new(
            ExpressionConfig {
                max_clauses: 2,
                ..ExpressionConfig::default()
            },
            registry,
        );
        let node = FactorNode::new(
            NodeId(0),
            crate::types::FactorCategory::Momentum,
            "rsi",
            LogicExpr::Composite {
                connective: Connective::And,
                clauses: vec![
                    LogicExpr::input_vs_const("rsi", Comparator::Lt, 30.0),
                    LogicExpr::input_vs_const("rsi", Comparator::Gt, 10.0),
                ],
            },
        );
        let mut rng = StdRng::seed_from_u64(2);
        let rules = mutator.candidate_rules(&node, &mut rng);
        assert!(rules.iter().all(|r| !matches!(r, RewriteRule::AddClause { .. })));
        assert!(rules.iter().any(|r| matches!(r, RewriteRule::SwapConnective)));
    }

    #[test]
    fn test_nested_comparisons_count_toward_limit() {
        let registry = Arc::new(FactorRegistry::new());
        let mutator = ExpressionMutator::new(
            ExpressionConfig {
                max_clauses: 3,
                ..ExpressionConfig::default()
            },
            registry,
        );
        let nested = LogicExpr::Composite {
            connective: Connective::Or,
            clauses: vec![
                LogicExpr::Composite {
                    connective: Connective::And,
                    clauses: vec![
                        LogicExpr::input_vs_const("rsi", Comparator::Lt, 30.0),
                        LogicExpr::input_vs_const("rsi", Comparator::Gt, 10.0),
                    ],
                },
                LogicExpr::input_vs_const("rsi", Comparator::Le, 50.0),
            ],
        };
        assert_eq!(nested.clause_count(), 2);
        let node = FactorNode::new(NodeId(0), crate::types::FactorCategory::Momentum, "rsi", nested);
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let rules = mutator.candidate_rules(&node, &mut rng);
            assert!(rules.iter().all(|r| !matches!(r, RewriteRule::AddClause { .. })));
        }
    }

    #[test]
    fn test_apply_changes_exactly_one_expression() {
        let registry = Arc::new(FactorRegistry::new());
        let mutator = ExpressionMutator::new(ExpressionConfig::default(), registry.clone());
        let parent = single_clause_genome(&registry);
        for seed in 0..50u64 {
            let mutation = mutator.apply(&parent, seed);
            assert!(!mutation.is_noop());
            let child = &mutation.genome;
            assert_eq!(child.creation_tier, Some(Tier::Expression));
            let changed = child
                .nodes
                .iter()
                .filter(|(id, n)| n.logic != parent.nodes[*id].logic)
                .count();
            assert_eq!(changed, 1);
            assert!(child.is_structurally_sound());
            for (id, node) in &child.nodes {
                assert_eq!(node.parameters, parent.nodes[id].parameters);
            }
        }
    }

    #[test]
    fn test_same_seed_same_rewrite() {
        let registry = Arc::new(FactorRegistry::new());
        let mutator = ExpressionMutator::new(ExpressionConfig::default(), registry.clone());
        let parent = single_clause_genome(&registry);
        assert_eq!(mutator.apply(&parent, 13).genome, mutator.apply(&parent, 13).genome);
    }
}
