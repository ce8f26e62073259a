use super::genome::{Genome, GenomeId};
use super::mutation::{Mutation, Mutator};
use crate::functions::registry::FactorRegistry;
use crate::types::Tier;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;

/// What a structure generator gets to look at when filling a slot
pub struct ProposalContext<'a> {
    pub parent: &'a Genome,
    pub generation: usize,
    pub seed: u64,
}

/// External offspring source competing with Tiers 1-3 for slots.
pub trait StructureGenerator: Send + Sync {
    fn propose(&self, context: &ProposalContext<'_>) -> Option<Genome>;
}

/// Runs a [`StructureGenerator`] as the fourth tier. Proposals are stamped
/// with a derived id and the parent's lineage; unsound proposals fall back
/// to the parent like any other failed mutation.
pub struct GeneratorMutator {
    generator: Arc<dyn StructureGenerator>,
}

impl GeneratorMutator {
    pub fn new(generator: Arc<dyn StructureGenerator>) -> Self {
        Self { generator }
    }
}

impl Mutator for GeneratorMutator {
    fn tier(&self) -> Tier {
        Tier::Generator
    }

    fn apply(&self, genome: &Genome, seed: u64) -> Mutation {
        let context = ProposalContext {
            parent: genome,
            generation: genome.generation,
            seed,
        };
        let Some(mut proposal) = self.generator.propose(&context) else {
            return Mutation::noop(genome);
        };
        if proposal.nodes == genome.nodes || !proposal.is_structurally_sound() {
            log::debug!("generator proposal for {} discarded", genome.id);
            return Mutation::noop(genome);
        }

        proposal.id = GenomeId::derive(genome.id, seed, Tier::Generator);
        proposal.generation = genome.generation + 1;
        proposal.lineage = vec![genome.id];
        proposal.creation_tier = Some(Tier::Generator);
        Mutation {
            genome: proposal,
            clamp_events: Vec::new(),
        }
    }
}

/// Random-restart generator: proposes a freshly seeded genome from the registry.
pub struct RegistryGenerator {
    registry: Arc<FactorRegistry>,
}

impl RegistryGenerator {
    pub fn new(registry: Arc<FactorRegistry>) -> Self {
        Self { registry }
    }
}

impl StructureGenerator for RegistryGenerator {
    fn propose(&self, context: &ProposalContext<'_>) -> Option<Genome> {
        let mut rng = StdRng::seed_from_u64(context.seed);
        let id = GenomeId::random(&mut rng);
        self.registry.seed_genome(id, &mut rng).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl StructureGenerator for Echo {
        fn propose(&self, context: &ProposalContext<'_>) -> Option<Genome> {
            Some(context.parent.clone())
        }
    }

    #[test]
    fn test_proposal_is_stamped_as_offspring() {
        let registry = Arc::new(FactorRegistry::new());
        let mut rng = StdRng::seed_from_u64(1);
        let parent = registry.seed_genome(GenomeId(42), &mut rng).unwrap();
        let mutator = GeneratorMutator::new(Arc::new(RegistryGenerator::new(registry)));

        let mutation = mutator.apply(&parent, 99);
        assert_eq!(mutation.genome.creation_tier, Some(Tier::Generator));
        assert_eq!(mutation.genome.lineage, vec![GenomeId(42)]);
        assert_eq!(mutation.genome.generation, 1);
        assert!(mutation.genome.is_structurally_sound());
    }

    #[test]
    fn test_unchanged_proposal_is_noop() {
        let registry = FactorRegistry::new();
        let mut rng = StdRng::seed_from_u64(1);
        let parent = registry.seed_genome(GenomeId(7), &mut rng).unwrap();
        let mutation = GeneratorMutator::new(Arc::new(Echo)).apply(&parent, 3);
        assert!(mutation.is_noop());
        assert_eq!(mutation.genome, parent.as_noop());
    }
}
