//! Champion tracking with anti-churn promotion and rollback.
//!
//! Every promotion or rollback appends a new immutable [`Champion`] record;
//! nothing in the history is ever rewritten. Readers hold `Arc<Champion>`
//! snapshots taken from a [`ChampionHandle`], which only the tracker writes.
//! A genome that a rollback moved away from is retired: it can neither be
//! promoted again nor be restored by a later rollback.

use crate::config::ChampionConfig;
use crate::engines::evaluation::{Fitness, FitnessMetrics};
use crate::engines::generation::genome::{Genome, GenomeId};
use crate::error::{FactorforgeError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

pub type ChampionHandle = Arc<RwLock<Option<Arc<Champion>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChampionState {
    NoChampion,
    Probation,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChampionOrigin {
    Promotion,
    /// Restored from the history record at this index
    Rollback { restored: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Champion {
    /// Index of this record in the tracker history
    pub record: usize,
    pub genome: Genome,
    pub fitness: Fitness,
    pub metrics: Option<FitnessMetrics>,
    pub generation_promoted: usize,
    pub promotions: usize,
    pub last_update: usize,
    pub origin: ChampionOrigin,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PromotionDecision {
    Promoted,
    /// Candidate fell short of both gates
    BelowThreshold { relative_bar: f64, absolute_bar: f64 },
    AlreadyChampion,
    NonFinite,
    /// Candidate was rolled away from earlier in the run
    Retired,
}

impl PromotionDecision {
    pub fn promoted(&self) -> bool {
        matches!(self, PromotionDecision::Promoted)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RollbackOutcome {
    RolledBack { restored: usize, genome: GenomeId },
    NoEligibleRecord,
}

impl RollbackOutcome {
    pub fn rolled_back(&self) -> bool {
        matches!(self, RollbackOutcome::RolledBack { .. })
    }
}

pub struct ChampionTracker {
    config: ChampionConfig,
    history: Vec<Arc<Champion>>,
    current: ChampionHandle,
    state: ChampionState,
    /// Generation of the last promotion or rollback
    last_change: Option<usize>,
    promotions: usize,
    retired: HashSet<GenomeId>,
}

impl ChampionTracker {
    pub fn new(config: ChampionConfig) -> Self {
        Self {
            config,
            history: Vec::new(),
            current: Arc::new(RwLock::new(None)),
            state: ChampionState::NoChampion,
            last_change: None,
            promotions: 0,
            retired: HashSet::new(),
        }
    }

    /// Shared read handle on the current champion.
    pub fn handle(&self) -> ChampionHandle {
        Arc::clone(&self.current)
    }

    pub fn current(&self) -> Option<Arc<Champion>> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn state(&self) -> ChampionState {
        self.state
    }

    pub fn history(&self) -> &[Arc<Champion>] {
        &self.history
    }

    pub fn promotions(&self) -> usize {
        self.promotions
    }

    pub fn is_retired(&self, id: GenomeId) -> bool {
        self.retired.contains(&id)
    }

    fn in_probation(&self, generation: usize) -> bool {
        self.last_change
            .map(|g| generation.saturating_sub(g) <= self.config.probation_generations)
            .unwrap_or(false)
    }

    /// Move from `Probation` to `Stable` once the window has passed.
    pub fn advance(&mut self, generation: usize) {
        if self.state == ChampionState::Probation && !self.in_probation(generation) {
            log::debug!("Champion stable at generation {}", generation);
            self.state = ChampionState::Stable;
        }
    }

    /// Relative improvement a candidate needs at `generation`.
    pub fn required_relative(&self, generation: usize) -> f64 {
        if self.in_probation(generation) {
            self.config.probation_relative
        } else {
            self.config.required_relative
        }
    }

    /// Offer the generation's best genome for promotion.
    pub fn consider(
        &mut self,
        candidate: &Genome,
        fitness: Fitness,
        metrics: Option<FitnessMetrics>,
        generation: usize,
    ) -> PromotionDecision {
        self.advance(generation);
        if !fitness.primary.is_finite() {
            return PromotionDecision::NonFinite;
        }
        if self.retired.contains(&candidate.id) {
            return PromotionDecision::Retired;
        }

        if let Some(champion) = self.current() {
            if champion.genome.id == candidate.id {
                return PromotionDecision::AlreadyChampion;
            }
            let c = champion.fitness.primary;
            let relative_bar = c + c.abs() * self.required_relative(generation);
            let absolute_bar = c + self.config.required_absolute;
            if fitness.primary < relative_bar && fitness.primary < absolute_bar {
                return PromotionDecision::BelowThreshold {
                    relative_bar,
                    absolute_bar,
                };
            }
        }

        self.promotions += 1;
        let previous = self.current().map(|c| c.fitness.primary);
        self.push(Champion {
            record: self.history.len(),
            genome: candidate.clone(),
            fitness,
            metrics,
            generation_promoted: generation,
            promotions: self.promotions,
            last_update: generation,
            origin: ChampionOrigin::Promotion,
            captured_at: Utc::now(),
        });
        log::info!(
            "Champion promoted at generation {}: {} ({:.4}, previous {:?})",
            generation,
            candidate.id,
            fitness.primary,
            previous
        );
        self.last_change = Some(generation);
        self.state = ChampionState::Probation;
        PromotionDecision::Promoted
    }

    /// No promotion or rollback for `staleness_interval` generations.
    pub fn is_stale(&self, generation: usize) -> bool {
        generation.saturating_sub(self.last_change.unwrap_or(0)) >= self.config.staleness_interval
    }

    /// Retire the current genome and restore the most recent record holding a
    /// genome that is not retired and whose primary fitness clears the
    /// rollback floor.
    pub fn rollback(&mut self, generation: usize, reason: &str) -> RollbackOutcome {
        let Some(current) = self.current() else {
            return RollbackOutcome::NoEligibleRecord;
        };
        let floor = self.config.rollback_floor.unwrap_or(f64::NEG_INFINITY);
        let target = self
            .history
            .iter()
            .rev()
            .find(|r| {
                r.genome.id != current.genome.id
                    && !self.retired.contains(&r.genome.id)
                    && r.fitness.primary.is_finite()
                    && r.fitness.primary >= floor
            })
            .cloned();

        let Some(target) = target else {
            log::warn!("Rollback requested ({}) but no eligible champion record", reason);
            return RollbackOutcome::NoEligibleRecord;
        };

        self.retired.insert(current.genome.id);
        self.push(Champion {
            record: self.history.len(),
            genome: target.genome.clone(),
            fitness: target.fitness,
            metrics: target.metrics.clone(),
            generation_promoted: target.generation_promoted,
            promotions: self.promotions,
            last_update: generation,
            origin: ChampionOrigin::Rollback { restored: target.record },
            captured_at: Utc::now(),
        });
        log::warn!(
            "Champion rolled back at generation {} ({}): {} -> {} (record {})",
            generation,
            reason,
            current.genome.id,
            target.genome.id,
            target.record
        );
        self.last_change = Some(generation);
        self.state = ChampionState::Probation;
        RollbackOutcome::RolledBack {
            restored: target.record,
            genome: target.genome.id,
        }
    }

    /// The published champion must be the newest history record.
    pub fn verify(&self) -> Result<()> {
        let current = self.current();
        match (current, self.history.last()) {
            (None, None) if self.state == ChampionState::NoChampion => Ok(()),
            (Some(c), Some(last)) if Arc::ptr_eq(&c, last) && self.state != ChampionState::NoChampion => {
                if c.record + 1 != self.history.len() {
                    return Err(FactorforgeError::InvariantViolation(format!(
                        "champion record index {} does not match history length {}",
                        c.record,
                        self.history.len()
                    )));
                }
                Ok(())
            }
            _ => Err(FactorforgeError::InvariantViolation(format!(
                "champion pointer out of sync with history ({} records, state {:?})",
                self.history.len(),
                self.state
            ))),
        }
    }

    fn push(&mut self, champion: Champion) {
        let champion = Arc::new(champion);
        self.history.push(Arc::clone(&champion));
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(champion);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn genome(id: u64) -> Genome {
        Genome::new(GenomeId(id), 0)
    }

    fn tracker() -> ChampionTracker {
        ChampionTracker::new(ChampionConfig {
            required_relative: 0.05,
            probation_relative: 0.10,
            required_absolute: 0.02,
            probation_generations: 2,
            staleness_interval: 3,
            ..ChampionConfig::default()
        })
    }

    #[test]
    fn test_first_finite_candidate_is_promoted() {
        let mut t = tracker();
        assert_eq!(t.state(), ChampionState::NoChampion);
        assert_eq!(t.consider(&genome(1), Fitness::new(f64::NEG_INFINITY, 0.0), None, 0), PromotionDecision::NonFinite);
        assert!(t.consider(&genome(1), Fitness::new(-3.0, 0.0), None, 0).promoted());
        assert_eq!(t.state(), ChampionState::Probation);
        t.verify().unwrap();
    }

    #[test]
    fn test_probation_raises_relative_bar() {
        let mut t = tracker();
        t.consider(&genome(1), Fitness::new(10.0, 0.0), None, 0);
        // probation: needs 11.0 or 10.02
        assert!(!t.consider(&genome(2), Fitness::new(10.01, 0.0), None, 1).promoted());
        assert!((t.required_relative(1) - 0.10).abs() < 1e-12);
        assert!((t.required_relative(3) - 0.05).abs() < 1e-12);
        t.advance(3);
        assert_eq!(t.state(), ChampionState::Stable);
    }

    #[test]
    fn test_relative_gate_handles_negative_champion() {
        let mut t = tracker();
        t.consider(&genome(1), Fitness::new(-1.0, 0.0), None, 0);
        // c + |c| * 0.05 = -0.95 after probation
        assert!(!t.consider(&genome(2), Fitness::new(-0.99, 0.0), None, 5).promoted());
        assert!(t.consider(&genome(3), Fitness::new(-0.95, 0.0), None, 5).promoted());
    }

    #[test]
    fn test_same_genome_not_repromoted() {
        let mut t = tracker();
        t.consider(&genome(1), Fitness::new(1.0, 0.0), None, 0);
        assert_eq!(t.consider(&genome(1), Fitness::new(5.0, 0.0), None, 9), PromotionDecision::AlreadyChampion);
        assert_eq!(t.history().len(), 1);
    }

    #[test]
    fn test_staleness_is_advisory() {
        let mut t = tracker();
        assert!(!t.is_stale(2));
        assert!(t.is_stale(3));
        t.consider(&genome(1), Fitness::new(1.0, 0.0), None, 4);
        assert!(!t.is_stale(6));
        assert!(t.is_stale(7));
        assert!(t.current().is_some());
    }

    #[test]
    fn test_rollback_respects_floor_and_keeps_history() {
        let mut t = ChampionTracker::new(ChampionConfig {
            rollback_floor: Some(1.5),
            ..ChampionConfig::default()
        });
        t.consider(&genome(1), Fitness::new(1.0, 0.0), None, 0);
        t.consider(&genome(2), Fitness::new(2.0, 0.0), None, 10);
        t.consider(&genome(3), Fitness::new(3.0, 0.0), None, 20);

        let outcome = t.rollback(21, "regression");
        assert_eq!(
            outcome,
            RollbackOutcome::RolledBack {
                restored: 1,
                genome: GenomeId(2)
            }
        );
        assert_eq!(t.history().len(), 4);
        assert_eq!(t.current().unwrap().genome.id, GenomeId(2));
        assert_eq!(t.current().unwrap().origin, ChampionOrigin::Rollback { restored: 1 });
        assert_eq!(t.state(), ChampionState::Probation);
        t.verify().unwrap();

        // genome 1 is below the floor and genome 3 is retired
        assert_eq!(t.rollback(22, "regression"), RollbackOutcome::NoEligibleRecord);
        assert_eq!(t.current().unwrap().genome.id, GenomeId(2));
    }

    #[test]
    fn test_repeated_rollback_walks_back_past_retired_genomes() {
        let mut t = tracker();
        t.consider(&genome(1), Fitness::new(1.0, 0.0), None, 0);
        t.consider(&genome(2), Fitness::new(2.0, 0.0), None, 10);
        t.consider(&genome(3), Fitness::new(3.0, 0.0), None, 20);

        assert!(t.rollback(21, "first").rolled_back());
        let second = t.rollback(22, "second");
        assert_eq!(
            second,
            RollbackOutcome::RolledBack {
                restored: 0,
                genome: GenomeId(1)
            }
        );
        assert!(t.is_retired(GenomeId(2)) && t.is_retired(GenomeId(3)));
        assert_eq!(t.rollback(23, "third"), RollbackOutcome::NoEligibleRecord);
        assert_eq!(t.current().unwrap().genome.id, GenomeId(1));
        t.verify().unwrap();
    }

    #[test]
    fn test_retired_genome_never_repromoted() {
        let mut t = tracker();
        t.consider(&genome(1), Fitness::new(1.0, 0.0), None, 0);
        t.consider(&genome(2), Fitness::new(2.0, 0.0), None, 10);
        t.rollback(11, "regression");

        assert_eq!(t.consider(&genome(2), Fitness::new(50.0, 0.0), None, 30), PromotionDecision::Retired);
        assert_eq!(t.current().unwrap().genome.id, GenomeId(1));
        assert!(t.consider(&genome(4), Fitness::new(2.0, 0.0), None, 30).promoted());
    }

    #[test]
    fn test_rollback_without_candidates_is_not_fatal() {
        let mut t = tracker();
        assert_eq!(t.rollback(0, "manual"), RollbackOutcome::NoEligibleRecord);
        t.consider(&genome(1), Fitness::new(1.0, 0.0), None, 0);
        assert_eq!(t.rollback(1, "manual"), RollbackOutcome::NoEligibleRecord);
        assert_eq!(t.current().unwrap().genome.id, GenomeId(1));
    }

    #[test]
    fn test_handle_sees_replacement() {
        let mut t = tracker();
        let handle = t.handle();
        assert!(handle.read().unwrap().is_none());
        t.consider(&genome(1), Fitness::new(1.0, 0.0), None, 0);
        let snapshot = handle.read().unwrap().clone().unwrap();
        t.consider(&genome(2), Fitness::new(10.0, 0.0), None, 10);
        assert_eq!(snapshot.genome.id, GenomeId(1));
        assert_eq!(handle.read().unwrap().as_ref().unwrap().genome.id, GenomeId(2));
    }
}
