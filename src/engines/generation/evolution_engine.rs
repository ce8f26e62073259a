use crate::config::AppConfig;
use crate::engines::evaluation::{CancellationToken, EvalError, EvaluationScheduler, Evaluator};
use crate::engines::generation::{
    champion::{Champion, ChampionHandle, ChampionTracker},
    generator::{GeneratorMutator, StructureGenerator},
    genome::Genome,
    mutation::MutatorSet,
    population::{BreedStats, LineageEntry, Phase, PopulationManager},
    progress::{ProgressCallback, RunReport},
    tier_selector::{OutcomeRecord, TierSelector},
    validator::GenomeValidator,
};
use crate::error::{FactorforgeError, Result};
use crate::functions::registry::FactorRegistry;
use crate::types::{FactorCategory, Tier};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub status: RunStatus,
    /// Generations whose champion decision was made
    pub generations_completed: usize,
    pub champion: Option<Arc<Champion>>,
    pub champion_history: Vec<Arc<Champion>>,
    pub final_population: Vec<Genome>,
    pub outcomes: Vec<OutcomeRecord>,
    pub lineage: Vec<LineageEntry>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Queue of external rollback requests, drained at generation boundaries
#[derive(Debug, Clone, Default)]
pub struct RollbackHandle {
    requests: Arc<Mutex<Vec<String>>>,
}

impl RollbackHandle {
    pub fn request(&self, reason: &str) {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(reason.to_string());
    }

    fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.requests.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

pub struct EvolutionEngine {
    config: AppConfig,
    registry: Arc<FactorRegistry>,
    manager: PopulationManager,
    tracker: ChampionTracker,
    cancel: CancellationToken,
    rollback: RollbackHandle,
}

impl EvolutionEngine {
    /// Engine over the built-in factor registry with Tiers 1-3.
    pub fn new(config: AppConfig, evaluator: Arc<dyn Evaluator>) -> Result<Self> {
        Self::with_components(config, evaluator, Arc::new(FactorRegistry::new()), None)
    }

    pub fn with_components(
        config: AppConfig,
        evaluator: Arc<dyn Evaluator>,
        registry: Arc<FactorRegistry>,
        generator: Option<Arc<dyn StructureGenerator>>,
    ) -> Result<Self> {
        config.validate()?;
        if registry.templates(FactorCategory::Entry).is_empty()
            || registry.templates(FactorCategory::Exit).is_empty()
        {
            return Err(FactorforgeError::Configuration(
                "factor registry needs entry and exit templates".to_string(),
            ));
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(config.evaluation.threads.unwrap_or(0))
            .thread_name(|i| format!("factorforge-{}", i))
            .build()
            .map_err(|e| FactorforgeError::Configuration(format!("Failed to build thread pool: {}", e)))?;
        let pool = Arc::new(pool);

        let mut mutators = MutatorSet::standard(&config.mutation, Arc::clone(&registry));
        match generator {
            Some(generator) => mutators.insert(Arc::new(GeneratorMutator::new(generator))),
            None if config.selection.generator_share > 0.0 => {
                log::warn!("generator_share is set but no structure generator was supplied; tier disabled");
            }
            None => {}
        }

        let selector = TierSelector::new(config.selection.clone(), &mutators.tiers());
        let validator = GenomeValidator::new(config.evolution.diversity_category_weight)
            .with_registry(Arc::clone(&registry));
        let scheduler = EvaluationScheduler::new(evaluator, &config.evaluation, Arc::clone(&pool));
        let rng = match config.evolution.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let manager = PopulationManager::new(
            config.evolution.clone(),
            mutators,
            selector,
            validator,
            scheduler,
            pool,
            rng,
        );
        let tracker = ChampionTracker::new(config.champion.clone());

        Ok(Self {
            config,
            registry,
            manager,
            tracker,
            cancel: CancellationToken::new(),
            rollback: RollbackHandle::default(),
        })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn rollback_handle(&self) -> RollbackHandle {
        self.rollback.clone()
    }

    pub fn champion_handle(&self) -> ChampionHandle {
        self.tracker.handle()
    }

    pub fn phase_handle(&self) -> Arc<RwLock<Phase>> {
        self.manager.phase_handle()
    }

    pub fn manager(&self) -> &PopulationManager {
        &self.manager
    }

    pub fn tracker(&self) -> &ChampionTracker {
        &self.tracker
    }

    /// Replace the random initial population.
    pub fn seed_population(&mut self, population: Vec<Genome>) -> Result<()> {
        for genome in &population {
            self.manager.validator().validate(genome).into_result()?;
        }
        self.manager.seed_population(population)
    }

    /// Run all configured generations. Only configuration and invariant
    /// errors are returned; cancellation ends the run with
    /// [`RunStatus::Cancelled`].
    pub fn run<C: ProgressCallback>(&mut self, mut callback: C) -> Result<RunSummary> {
        let started_at = Utc::now();
        if self.manager.population().is_empty() {
            self.manager.initialize(&self.registry)?;
        }

        let generations = self.config.evolution.generations;
        log::info!(
            "Starting evolution: {} generations, population {}, elites {}",
            generations,
            self.config.evolution.population_size,
            self.config.evolution.elite_count
        );

        let mut completed = 0;
        for generation in self.manager.generation()..generations {
            if self.cancel.is_cancelled() {
                return Ok(self.summary(RunStatus::Cancelled, completed, started_at));
            }
            callback.on_generation_start(generation);

            let Some(eval_stats) = self.manager.evaluate(&self.cancel) else {
                log::info!("Run cancelled during generation {}", generation);
                return Ok(self.summary(RunStatus::Cancelled, completed, started_at));
            };
            callback.on_genome_evaluated(eval_stats.evaluated, eval_stats.evaluated);

            let rolled_back = self.process_rollbacks(generation);
            if self.cancel.is_cancelled() {
                return Ok(self.summary(RunStatus::Cancelled, completed, started_at));
            }

            let best = self.manager.best().cloned();
            let best_fitness = best.as_ref().map(|(_, f)| f.primary).unwrap_or(f64::NEG_INFINITY);
            // A rollback generation keeps the restored champion.
            let promoted = if rolled_back {
                false
            } else {
                let candidate = self
                    .manager
                    .ranked()
                    .iter()
                    .find(|(g, _)| !self.tracker.is_retired(g.id))
                    .cloned();
                match candidate {
                    Some((genome, fitness)) => {
                        let metrics = self.manager.cached(genome.id).and_then(|e| e.metrics.clone());
                        self.tracker.consider(&genome, fitness, metrics, generation).promoted()
                    }
                    None => false,
                }
            };
            if let Err(e) = self.tracker.verify() {
                log::error!("{}", e);
                return Err(e);
            }
            completed += 1;

            let stale = self.tracker.is_stale(generation);
            let diversity = {
                let refs: Vec<&Genome> = self.manager.population().iter().collect();
                self.manager.validator().population_diversity(&refs)
            };

            // The final generation is evaluated and judged but not bred.
            let breed_stats = if generation + 1 < generations {
                self.manager.selector_mut().refresh(stale);
                self.manager.breed()?
            } else {
                BreedStats::default()
            };

            let champion = self.tracker.current();
            let report = RunReport {
                generation,
                best_fitness,
                best_genome: best.as_ref().map(|(g, _)| g.id),
                diversity,
                tier_usage: Tier::ALL
                    .iter()
                    .map(|t| (t.name().to_string(), breed_stats.tier_usage[t.index()]))
                    .collect(),
                tier_distribution: Tier::ALL
                    .iter()
                    .map(|t| (t.name().to_string(), self.manager.selector().share(*t)))
                    .collect::<BTreeMap<_, _>>(),
                champion_promoted: promoted,
                champion_rolled_back: rolled_back,
                champion_fitness: champion.as_ref().map(|c| c.fitness.primary),
                champion_id: champion.as_ref().map(|c| c.genome.id),
                stale,
                rejections: breed_stats.rejections,
                noop_offspring: breed_stats.noops,
                clamp_events: breed_stats.clamp_events,
                evaluation_failures: eval_stats.failures,
                timestamp: Utc::now(),
            };
            callback.on_generation_complete(&report);
        }

        log::info!(
            "Evolution complete: {} generations, {} promotions",
            completed,
            self.tracker.promotions()
        );
        Ok(self.summary(RunStatus::Completed, completed, started_at))
    }

    /// External requests first, then the periodic re-validation.
    fn process_rollbacks(&mut self, generation: usize) -> bool {
        let mut rolled_back = false;
        for reason in self.rollback.drain() {
            rolled_back |= self.tracker.rollback(generation, &reason).rolled_back();
        }

        let Some(every) = self.config.champion.revalidate_every else {
            return rolled_back;
        };
        if generation == 0 || generation % every != 0 {
            return rolled_back;
        }
        let Some(champion) = self.tracker.current() else {
            return rolled_back;
        };

        let fresh = self.manager.scheduler().evaluate(&champion.genome, &self.cancel);
        if matches!(fresh.error, Some(EvalError::Cancelled)) {
            return rolled_back;
        }
        let reason = match &fresh.error {
            Some(e) => Some(format!("re-validation failed: {}", e)),
            None => {
                let recorded = champion.fitness.primary;
                let floor = recorded - recorded.abs() * self.config.champion.regression_tolerance;
                if fresh.fitness.primary < floor {
                    Some(format!(
                        "re-validation regressed from {:.4} to {:.4}",
                        recorded, fresh.fitness.primary
                    ))
                } else {
                    None
                }
            }
        };
        if let Some(reason) = reason {
            // The stale cached score would otherwise keep ranking the genome.
            self.manager.rescore(champion.genome.id, fresh);
            rolled_back |= self.tracker.rollback(generation, &reason).rolled_back();
        }
        rolled_back
    }

    fn summary(&self, status: RunStatus, completed: usize, started_at: DateTime<Utc>) -> RunSummary {
        RunSummary {
            status,
            generations_completed: completed,
            champion: self.tracker.current(),
            champion_history: self.tracker.history().to_vec(),
            final_population: self.manager.population().to_vec(),
            outcomes: self.manager.selector().outcomes(),
            lineage: self.manager.lineage().to_vec(),
            started_at,
            finished_at: Utc::now(),
        }
    }
}
