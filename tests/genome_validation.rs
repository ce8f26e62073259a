use factorforge::engines::generation::validator::ValidationStage;
use factorforge::engines::generation::{FactorNode, Genome, GenomeId, GenomeValidator, NodeId, Violation};
use factorforge::functions::registry::FactorRegistry;
use factorforge::types::{FactorCategory, Parameter};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

/// rsi -> threshold_entry, drawdown_guard -> time_exit
fn strategy(registry: &FactorRegistry) -> Genome {
    let node = |alias: &str, id: u32| {
        let template = registry.get(alias).unwrap();
        registry.instantiate_default(template.as_ref(), NodeId(id))
    };
    let mut genome = Genome::new(GenomeId(100), 0);
    genome.insert(node("rsi", 0));
    genome.insert(node("threshold_entry", 1).with_dependency(NodeId(0)));
    genome.insert(node("drawdown_guard", 2));
    genome.insert(node("time_exit", 3).with_dependency(NodeId(2)));
    genome
}

fn validator() -> (Arc<FactorRegistry>, GenomeValidator) {
    let registry = Arc::new(FactorRegistry::new());
    let validator = GenomeValidator::default().with_registry(Arc::clone(&registry));
    (registry, validator)
}

#[test]
fn test_well_formed_strategy_accepted() {
    let (registry, validator) = validator();
    let result = validator.validate(&strategy(&registry));
    assert!(result.ok(), "unexpected violations: {:?}", result.violations);
    assert!(result.into_result().is_ok());
}

#[test]
fn test_cycle_rejected_at_first_stage() {
    let (registry, validator) = validator();
    let mut genome = strategy(&registry);
    genome.nodes.get_mut(&NodeId(0)).unwrap().depends_on.insert(NodeId(1));

    let result = validator.validate(&genome);
    assert_eq!(result.failed_stage(), Some(ValidationStage::Acyclicity));
    assert!(matches!(&result.violations[0], Violation::Cycle { nodes } if nodes.len() == 2));
}

#[test]
fn test_dangling_dependency_rejected() {
    let (registry, validator) = validator();
    let mut genome = strategy(&registry);
    genome.nodes.get_mut(&NodeId(3)).unwrap().depends_on.insert(NodeId(42));

    let result = validator.validate(&genome);
    assert_eq!(
        result.violations,
        vec![Violation::DanglingDependency {
            node: NodeId(3),
            missing: NodeId(42)
        }]
    );
}

#[test]
fn test_missing_entry_and_orphan_reported_together() {
    let (registry, validator) = validator();
    let mut genome = strategy(&registry);
    genome.nodes.remove(&NodeId(1));

    let result = validator.validate(&genome);
    assert_eq!(result.failed_stage(), Some(ValidationStage::Coverage));
    assert!(result.violations.contains(&Violation::MissingCategory(FactorCategory::Entry)));
    assert!(result.violations.contains(&Violation::Orphan(NodeId(0))));
}

#[test]
fn test_parameter_outside_domain_rejected_not_clamped() {
    let (registry, validator) = validator();
    let mut genome = strategy(&registry);
    genome
        .nodes
        .get_mut(&NodeId(0))
        .unwrap()
        .parameters
        .insert("period".to_string(), Parameter::int(4, 5, 50));

    let result = validator.validate(&genome);
    assert_eq!(result.failed_stage(), Some(ValidationStage::Parameters));
    assert_eq!(genome.numeric_param(NodeId(0), "period"), Some(4.0));
}

#[test]
fn test_unknown_template_rejected_with_registry() {
    let (registry, validator) = validator();
    let mut genome = strategy(&registry);
    let rogue = FactorNode::new(
        NodeId(4),
        FactorCategory::Momentum,
        "not_registered",
        genome.nodes[&NodeId(0)].logic.clone(),
    );
    genome.insert(rogue);
    genome.nodes.get_mut(&NodeId(1)).unwrap().depends_on.insert(NodeId(4));

    let result = validator.validate(&genome);
    assert!(matches!(result.violations.as_slice(), [Violation::Template { node, .. }] if *node == NodeId(4)));

    // Without a registry only the generic checks run.
    assert!(GenomeValidator::default().validate(&genome).ok());
}

#[test]
fn test_population_diversity_of_clones_is_zero() {
    let (registry, validator) = validator();
    let a = strategy(&registry);
    let b = a.clone();
    let summary = validator.population_diversity(&[&a, &b, &a]);
    assert_eq!(summary.pairs, 3);
    assert_eq!(summary.mean, 0.0);
}

proptest! {
    #[test]
    fn prop_diversity_symmetric_and_bounded(seed_a in any::<u64>(), seed_b in any::<u64>()) {
        let (registry, validator) = validator();
        let a = registry.seed_genome(GenomeId(1), &mut StdRng::seed_from_u64(seed_a)).unwrap();
        let b = registry.seed_genome(GenomeId(2), &mut StdRng::seed_from_u64(seed_b)).unwrap();

        let ab = validator.diversity(&a, &b);
        let ba = validator.diversity(&b, &a);
        prop_assert!((0.0..=1.0).contains(&ab));
        prop_assert!((ab - ba).abs() < 1e-12);
        prop_assert_eq!(validator.diversity(&a, &a), 0.0);
    }

    #[test]
    fn prop_seeded_genomes_pass_validation(seed in any::<u64>()) {
        let (registry, validator) = validator();
        let genome = registry.seed_genome(GenomeId(seed), &mut StdRng::seed_from_u64(seed)).unwrap();
        prop_assert!(validator.validate(&genome).ok());
    }
}
