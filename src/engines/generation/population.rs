//! Generational population management.
//!
//! One generation walks `Evaluate → Rank → SelectParents → Mutate → Validate
//! → Merge → Commit`. Parent choice, tier choice and per-slot seeds are drawn
//! sequentially from the run RNG; offspring are then produced in parallel and
//! merged back in slot order, so a seeded run is reproducible regardless of
//! thread count.

use super::genome::{splitmix64, Genome, GenomeId};
use super::mutation::MutatorSet;
use super::operators::{rank_population, tournament_selection};
use super::tier_selector::{OutcomeRecord, TierSelector};
use super::validator::GenomeValidator;
use crate::config::EvolutionConfig;
use crate::engines::evaluation::{CancellationToken, Evaluation, EvaluationScheduler, Fitness};
use crate::error::{FactorforgeError, Result};
use crate::functions::registry::FactorRegistry;
use crate::types::Tier;
use rand::rngs::StdRng;
use rand::Rng;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Idle,
    Evaluate,
    Rank,
    SelectParents,
    Mutate,
    Validate,
    Merge,
    Commit,
}

/// One accepted genome in the run's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageEntry {
    pub id: GenomeId,
    pub parents: Vec<GenomeId>,
    pub tier: Option<Tier>,
    pub generation: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EvaluationStats {
    pub evaluated: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, Default)]
pub struct BreedStats {
    pub tier_usage: [usize; 4],
    pub rejections: usize,
    pub noops: usize,
    pub clamp_events: usize,
}

struct SlotPlan {
    parent: usize,
    tier: Option<Tier>,
    seed: u64,
}

struct SlotResult {
    genome: Genome,
    tier: Option<Tier>,
    rejected: Vec<GenomeId>,
    clamp_events: usize,
}

struct PendingOutcome {
    tier: Tier,
    before: GenomeId,
    after: GenomeId,
    parent_fitness: f64,
    generation: usize,
}

pub struct PopulationManager {
    config: EvolutionConfig,
    mutators: MutatorSet,
    selector: TierSelector,
    validator: GenomeValidator,
    scheduler: EvaluationScheduler,
    pool: Arc<ThreadPool>,
    rng: StdRng,
    population: Vec<Genome>,
    ranked: Vec<(Genome, Fitness)>,
    cache: HashMap<GenomeId, Evaluation>,
    pending: Vec<PendingOutcome>,
    lineage: Vec<LineageEntry>,
    phase: Arc<RwLock<Phase>>,
    generation: usize,
}

impl PopulationManager {
    pub fn new(
        config: EvolutionConfig,
        mutators: MutatorSet,
        selector: TierSelector,
        validator: GenomeValidator,
        scheduler: EvaluationScheduler,
        pool: Arc<ThreadPool>,
        rng: StdRng,
    ) -> Self {
        Self {
            config,
            mutators,
            selector,
            validator,
            scheduler,
            pool,
            rng,
            population: Vec::new(),
            ranked: Vec::new(),
            cache: HashMap::new(),
            pending: Vec::new(),
            lineage: Vec::new(),
            phase: Arc::new(RwLock::new(Phase::Idle)),
            generation: 0,
        }
    }

    /// Fill the population with random genomes from the registry.
    pub fn initialize(&mut self, registry: &FactorRegistry) -> Result<()> {
        let mut population = Vec::with_capacity(self.config.population_size);
        for _ in 0..self.config.population_size {
            let id = GenomeId::random(&mut self.rng);
            let genome = registry.seed_genome(id, &mut self.rng)?;
            self.validator.validate(&genome).into_result()?;
            population.push(genome);
        }
        self.seed_population(population)
    }

    /// Start from a caller-supplied population.
    pub fn seed_population(&mut self, population: Vec<Genome>) -> Result<()> {
        if population.len() != self.config.population_size {
            return Err(FactorforgeError::Configuration(format!(
                "initial population has {} genomes, expected {}",
                population.len(),
                self.config.population_size
            )));
        }
        self.lineage.extend(population.iter().map(|g| LineageEntry {
            id: g.id,
            parents: g.lineage.clone(),
            tier: g.creation_tier,
            generation: self.generation,
        }));
        self.population = population;
        self.ranked.clear();
        Ok(())
    }

    pub fn phase(&self) -> Phase {
        *self.phase.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Shared view of the current phase for observers on other threads.
    pub fn phase_handle(&self) -> Arc<RwLock<Phase>> {
        Arc::clone(&self.phase)
    }

    fn set_phase(&self, phase: Phase) {
        *self.phase.write().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn population(&self) -> &[Genome] {
        &self.population
    }

    /// Members sorted best-first; valid after [`Self::evaluate`].
    pub fn ranked(&self) -> &[(Genome, Fitness)] {
        &self.ranked
    }

    pub fn best(&self) -> Option<&(Genome, Fitness)> {
        self.ranked.first()
    }

    pub fn cached(&self, id: GenomeId) -> Option<&Evaluation> {
        self.cache.get(&id)
    }

    /// Replace the cached score of a live genome and re-rank. Returns `false`
    /// when the genome is not in the population.
    pub fn rescore(&mut self, id: GenomeId, evaluation: Evaluation) -> bool {
        if !self.population.iter().any(|g| g.id == id) {
            return false;
        }
        let fitness = evaluation.fitness;
        self.cache.insert(id, evaluation);
        if !self.ranked.is_empty() {
            for (genome, score) in self.ranked.iter_mut() {
                if genome.id == id {
                    *score = fitness;
                }
            }
            rank_population(&mut self.ranked);
        }
        true
    }

    pub fn lineage(&self) -> &[LineageEntry] {
        &self.lineage
    }

    /// Walk parent links back to the seed genomes, nearest ancestor first.
    pub fn ancestry(&self, id: GenomeId) -> Vec<GenomeId> {
        let index: HashMap<GenomeId, &LineageEntry> = self.lineage.iter().map(|e| (e.id, e)).collect();
        let mut seen = HashSet::new();
        let mut ancestors = Vec::new();
        let mut frontier: Vec<GenomeId> = index.get(&id).map(|e| e.parents.clone()).unwrap_or_default();
        while !frontier.is_empty() {
            let mut next = Vec::new();
            for parent in frontier {
                if !seen.insert(parent) {
                    continue;
                }
                ancestors.push(parent);
                if let Some(entry) = index.get(&parent) {
                    next.extend(entry.parents.iter().copied());
                }
            }
            frontier = next;
        }
        ancestors
    }

    pub fn selector(&self) -> &TierSelector {
        &self.selector
    }

    pub fn selector_mut(&mut self) -> &mut TierSelector {
        &mut self.selector
    }

    pub fn validator(&self) -> &GenomeValidator {
        &self.validator
    }

    pub fn scheduler(&self) -> &EvaluationScheduler {
        &self.scheduler
    }

    /// Evaluate every genome without a cached score, then rank. `None` when
    /// cancelled; the population is left unranked in that case.
    pub fn evaluate(&mut self, cancel: &CancellationToken) -> Option<EvaluationStats> {
        self.set_phase(Phase::Evaluate);
        let mut seen = HashSet::new();
        let todo: Vec<Genome> = self
            .population
            .iter()
            .filter(|g| !self.cache.contains_key(&g.id) && seen.insert(g.id))
            .cloned()
            .collect();

        let results = self.scheduler.evaluate_batch(&todo, cancel)?;
        let mut stats = EvaluationStats {
            evaluated: todo.len(),
            failures: 0,
        };
        for (genome, evaluation) in todo.iter().zip(results) {
            if evaluation.is_failure() {
                stats.failures += 1;
            }
            self.cache.insert(genome.id, evaluation);
        }
        self.resolve_pending();

        self.set_phase(Phase::Rank);
        let mut ranked: Vec<(Genome, Fitness)> = self
            .population
            .iter()
            .map(|g| {
                let fitness = self.cache.get(&g.id).map(|e| e.fitness).unwrap_or(Fitness::WORST);
                (g.clone(), fitness)
            })
            .collect();
        rank_population(&mut ranked);
        self.ranked = ranked;
        Some(stats)
    }

    fn resolve_pending(&mut self) {
        let mut still_pending = Vec::new();
        for outcome in self.pending.drain(..) {
            match self.cache.get(&outcome.after) {
                Some(evaluation) => self.selector.record(OutcomeRecord {
                    tier: outcome.tier,
                    before: outcome.before,
                    after: outcome.after,
                    accepted: true,
                    fitness_delta: Some(evaluation.fitness.primary - outcome.parent_fitness),
                    generation: outcome.generation,
                }),
                None => still_pending.push(outcome),
            }
        }
        self.pending = still_pending;
    }

    /// Produce and commit the next generation from the ranked population.
    pub fn breed(&mut self) -> Result<BreedStats> {
        let n = self.config.population_size;
        if self.ranked.len() != n {
            return Err(FactorforgeError::InvariantViolation(format!(
                "breeding from {} ranked genomes, expected {}",
                self.ranked.len(),
                n
            )));
        }
        let elite_count = self.config.elite_count.min(n);

        self.set_phase(Phase::SelectParents);
        let mut plans = Vec::with_capacity(n - elite_count);
        for _ in elite_count..n {
            let parent = tournament_selection(&self.ranked, self.config.tournament_size, &mut self.rng)
                .ok_or_else(|| FactorforgeError::InvariantViolation("tournament over an empty population".into()))?;
            let tier = self.selector.sample(&mut self.rng).filter(|t| self.mutators.contains(*t));
            let seed = self.rng.gen::<u64>();
            plans.push(SlotPlan { parent, tier, seed });
        }

        self.set_phase(Phase::Mutate);
        let results: Vec<SlotResult> = {
            let this = &*self;
            this.pool
                .install(|| plans.par_iter().map(|plan| this.produce(plan)).collect())
        };

        self.set_phase(Phase::Validate);
        let mut stats = BreedStats::default();
        let generation = self.generation;
        for (plan, result) in plans.iter().zip(&results) {
            let parent_id = self.ranked[plan.parent].0.id;
            if let Some(tier) = plan.tier {
                for rejected in &result.rejected {
                    self.selector.record(OutcomeRecord {
                        tier,
                        before: parent_id,
                        after: *rejected,
                        accepted: false,
                        fitness_delta: None,
                        generation,
                    });
                }
            }
            stats.rejections += result.rejected.len();
            stats.clamp_events += result.clamp_events;
            match result.tier {
                Some(tier) => stats.tier_usage[tier.index()] += 1,
                None => stats.noops += 1,
            }
        }

        self.set_phase(Phase::Merge);
        let mut next: Vec<Genome> = self.ranked[..elite_count].iter().map(|(g, _)| g.clone()).collect();
        for (plan, result) in plans.iter().zip(results) {
            let (parent, parent_fitness) = &self.ranked[plan.parent];
            if let Some(tier) = result.tier {
                self.pending.push(PendingOutcome {
                    tier,
                    before: parent.id,
                    after: result.genome.id,
                    parent_fitness: parent_fitness.primary,
                    generation,
                });
                self.lineage.push(LineageEntry {
                    id: result.genome.id,
                    parents: vec![parent.id],
                    tier: Some(tier),
                    generation: generation + 1,
                });
            }
            next.push(result.genome);
        }

        if next.len() != n {
            log::error!("population size drifted to {} (expected {})", next.len(), n);
            return Err(FactorforgeError::InvariantViolation(format!(
                "next population has {} genomes, expected {}",
                next.len(),
                n
            )));
        }

        self.set_phase(Phase::Commit);
        let live: HashSet<GenomeId> = next.iter().map(|g| g.id).collect();
        self.cache.retain(|id, _| live.contains(id));
        self.population = next;
        self.ranked.clear();
        self.generation += 1;
        self.set_phase(Phase::Idle);
        Ok(stats)
    }

    /// Mutate and validate one slot, retrying with fresh seeds.
    fn produce(&self, plan: &SlotPlan) -> SlotResult {
        let parent = &self.ranked[plan.parent].0;
        let placeholder = |rejected: Vec<GenomeId>| SlotResult {
            genome: parent.as_noop(),
            tier: None,
            rejected,
            clamp_events: 0,
        };
        let Some(mutator) = plan.tier.and_then(|t| self.mutators.get(t)) else {
            return placeholder(Vec::new());
        };

        let mut rejected = Vec::new();
        for attempt in 0..=self.config.max_retries as u64 {
            let seed = if attempt == 0 {
                plan.seed
            } else {
                splitmix64(plan.seed ^ attempt)
            };
            let mutation = mutator.apply(parent, seed);
            if mutation.is_noop() {
                continue;
            }
            let verdict = self.validator.validate(&mutation.genome);
            if verdict.ok() {
                return SlotResult {
                    tier: mutation.genome.creation_tier,
                    clamp_events: mutation.clamp_events.len(),
                    genome: mutation.genome,
                    rejected,
                };
            }
            log::debug!(
                "offspring {} of {} rejected at {:?}: {}",
                mutation.genome.id,
                parent.id,
                verdict.failed_stage(),
                verdict
                    .violations
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join("; ")
            );
            rejected.push(mutation.genome.id);
        }
        placeholder(rejected)
    }
}
