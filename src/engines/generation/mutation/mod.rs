//! Tiered mutation operators.
//!
//! Every mutator is a pure function of `(genome, seed)`: the input genome is
//! never touched and the same seed always yields the same offspring. When a
//! tier cannot produce a sound result within its attempt budget it hands back
//! the parent unchanged with `creation_tier = None`.

pub mod expression;
pub mod parametric;
pub mod structural;

pub use expression::ExpressionMutator;
pub use parametric::ParametricMutator;
pub use structural::{StructuralMutator, StructuralOp};

use crate::config::MutationConfig;
use crate::engines::generation::genome::{Genome, NodeId};
use crate::functions::registry::FactorRegistry;
use crate::types::Tier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A Tier 1 sample that had to be clamped into its parameter's domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClampEvent {
    pub node: NodeId,
    pub parameter: String,
    pub sampled: f64,
    pub clamped: f64,
}

/// Result of applying a mutator
#[derive(Debug, Clone)]
pub struct Mutation {
    pub genome: Genome,
    pub clamp_events: Vec<ClampEvent>,
}

impl Mutation {
    pub fn noop(parent: &Genome) -> Self {
        Self {
            genome: parent.as_noop(),
            clamp_events: Vec::new(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.genome.creation_tier.is_none()
    }
}

pub trait Mutator: Send + Sync {
    fn tier(&self) -> Tier;

    fn apply(&self, genome: &Genome, seed: u64) -> Mutation;
}

/// The mutators available to a run, keyed by tier
#[derive(Clone)]
pub struct MutatorSet {
    mutators: BTreeMap<Tier, Arc<dyn Mutator>>,
}

impl MutatorSet {
    pub fn empty() -> Self {
        Self {
            mutators: BTreeMap::new(),
        }
    }

    /// Tiers 1-3 built from configuration.
    pub fn standard(config: &MutationConfig, registry: Arc<FactorRegistry>) -> Self {
        let mut set = Self::empty();
        set.insert(Arc::new(ParametricMutator::new(config.parametric.clone())));
        set.insert(Arc::new(StructuralMutator::new(config.structural.clone(), registry.clone())));
        set.insert(Arc::new(ExpressionMutator::new(config.expression.clone(), registry)));
        set
    }

    pub fn insert(&mut self, mutator: Arc<dyn Mutator>) {
        self.mutators.insert(mutator.tier(), mutator);
    }

    pub fn with(mut self, mutator: Arc<dyn Mutator>) -> Self {
        self.insert(mutator);
        self
    }

    pub fn get(&self, tier: Tier) -> Option<&Arc<dyn Mutator>> {
        self.mutators.get(&tier)
    }

    pub fn tiers(&self) -> Vec<Tier> {
        self.mutators.keys().copied().collect()
    }

    pub fn contains(&self, tier: Tier) -> bool {
        self.mutators.contains_key(&tier)
    }
}
