//! Adaptive tier selection.
//!
//! The selector owns the append-only outcome log, bounded by
//! `outcome_log_capacity` with the oldest records evicted first. Once per generation
//! [`TierSelector::refresh`] folds new outcomes into per-tier rolling windows,
//! blends the configured targets with the observed success rates and projects
//! the result into each tier's band. Offspring slots then sample the frozen
//! distribution through a shared reference.

use super::genome::GenomeId;
use crate::config::{BlendPolicyConfig, TierSelectionConfig};
use crate::types::Tier;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

pub type TierShares = [f64; 4];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub tier: Tier,
    pub before: GenomeId,
    pub after: GenomeId,
    pub accepted: bool,
    /// `child - parent` primary fitness; `None` for rejected offspring
    pub fitness_delta: Option<f64>,
    pub generation: usize,
}

/// Combines target shares with the empirical success distribution.
pub trait BlendPolicy: Send + Sync {
    fn blend(&mut self, targets: &TierShares, empirical: &TierShares) -> TierShares;
}

pub struct FixedBlend;

impl BlendPolicy for FixedBlend {
    fn blend(&mut self, targets: &TierShares, _empirical: &TierShares) -> TierShares {
        *targets
    }
}

pub struct LinearBlend {
    pub alpha: f64,
}

impl BlendPolicy for LinearBlend {
    fn blend(&mut self, targets: &TierShares, empirical: &TierShares) -> TierShares {
        mix(targets, empirical, self.alpha)
    }
}

pub struct EmaBlend {
    pub alpha: f64,
    pub decay: f64,
    smoothed: Option<TierShares>,
}

impl EmaBlend {
    pub fn new(alpha: f64, decay: f64) -> Self {
        Self {
            alpha,
            decay,
            smoothed: None,
        }
    }
}

impl BlendPolicy for EmaBlend {
    fn blend(&mut self, targets: &TierShares, empirical: &TierShares) -> TierShares {
        let smoothed = match self.smoothed {
            Some(prev) => {
                let mut next = [0.0; 4];
                for i in 0..4 {
                    next[i] = self.decay * prev[i] + (1.0 - self.decay) * empirical[i];
                }
                next
            }
            None => *empirical,
        };
        self.smoothed = Some(smoothed);
        mix(targets, &smoothed, self.alpha)
    }
}

fn mix(targets: &TierShares, empirical: &TierShares, alpha: f64) -> TierShares {
    let mut out = [0.0; 4];
    for i in 0..4 {
        out[i] = (1.0 - alpha) * targets[i] + alpha * empirical[i];
    }
    out
}

pub fn blend_policy_from_config(config: &BlendPolicyConfig) -> Box<dyn BlendPolicy> {
    match config {
        BlendPolicyConfig::Fixed => Box::new(FixedBlend),
        BlendPolicyConfig::Linear { alpha } => Box::new(LinearBlend { alpha: *alpha }),
        BlendPolicyConfig::Ema { alpha, decay } => Box::new(EmaBlend::new(*alpha, *decay)),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TierStats {
    pub samples: usize,
    pub acceptance: f64,
    pub mean_positive_delta: f64,
}

impl TierStats {
    pub fn success_rate(&self) -> f64 {
        self.acceptance * self.mean_positive_delta
    }
}

#[derive(Debug, Default)]
struct OutcomeLog {
    records: VecDeque<OutcomeRecord>,
    /// Records ever appended, including evicted ones
    appended: usize,
}

pub struct TierSelector {
    config: TierSelectionConfig,
    enabled: [bool; 4],
    windows: [VecDeque<(bool, Option<f64>)>; 4],
    policy: Box<dyn BlendPolicy>,
    distribution: TierShares,
    log: Mutex<OutcomeLog>,
    /// Value of `appended` at the last refresh
    consumed: usize,
    boosted: bool,
}

impl TierSelector {
    /// `available` lists the tiers that have a mutator; tiers with a zero
    /// target are never sampled.
    pub fn new(config: TierSelectionConfig, available: &[Tier]) -> Self {
        let targets = config.targets();
        let enabled = Tier::ALL.map(|t| available.contains(&t) && targets[t.index()] > 0.0);
        let policy = blend_policy_from_config(&config.blend);
        let mut selector = Self {
            config,
            enabled,
            windows: Default::default(),
            policy,
            distribution: [0.0; 4],
            log: Mutex::new(OutcomeLog::default()),
            consumed: 0,
            boosted: false,
        };
        selector.distribution = selector.project(&selector.effective_targets());
        selector
    }

    pub fn with_policy(mut self, policy: Box<dyn BlendPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn is_enabled(&self, tier: Tier) -> bool {
        self.enabled[tier.index()]
    }

    pub fn distribution(&self) -> TierShares {
        self.distribution
    }

    pub fn share(&self, tier: Tier) -> f64 {
        self.distribution[tier.index()]
    }

    pub fn is_boosted(&self) -> bool {
        self.boosted
    }

    /// Append an outcome, evicting the oldest record when the log is full.
    /// Safe to call from worker threads.
    pub fn record(&self, outcome: OutcomeRecord) {
        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.records.push_back(outcome);
        log.appended += 1;
        while log.records.len() > self.config.outcome_log_capacity {
            log.records.pop_front();
        }
    }

    /// Retained outcomes, oldest first.
    pub fn outcomes(&self) -> Vec<OutcomeRecord> {
        let log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        log.records.iter().cloned().collect()
    }

    pub fn outcome_count(&self) -> usize {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).records.len()
    }

    pub fn outcomes_recorded(&self) -> usize {
        self.log.lock().unwrap_or_else(PoisonError::into_inner).appended
    }

    pub fn stats(&self, tier: Tier) -> TierStats {
        let window = &self.windows[tier.index()];
        if window.is_empty() {
            return TierStats::default();
        }
        let accepted = window.iter().filter(|(a, _)| *a).count();
        let deltas: Vec<f64> = window
            .iter()
            .filter(|(a, _)| *a)
            .filter_map(|(_, d)| *d)
            .filter(|d| d.is_finite())
            .map(|d| d.max(0.0))
            .collect();
        let mean_positive_delta = if deltas.is_empty() {
            0.0
        } else {
            deltas.iter().sum::<f64>() / deltas.len() as f64
        };
        TierStats {
            samples: window.len(),
            acceptance: accepted as f64 / window.len() as f64,
            mean_positive_delta,
        }
    }

    /// Recompute the sampling distribution for the next generation.
    pub fn refresh(&mut self, stale: bool) {
        self.absorb_new_outcomes();
        self.boosted = stale && self.config.exploration_boost > 0.0;

        let targets = self.effective_targets();
        let empirical = self.empirical(&targets);
        let blended = self.policy.blend(&targets, &empirical);
        self.distribution = self.project_around(&blended, &targets);
        log::debug!(
            "tier distribution {:?} (targets {:?}, boosted: {})",
            self.distribution,
            targets,
            self.boosted
        );
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> Option<Tier> {
        let dist = WeightedIndex::new(self.distribution.iter().map(|p| p.max(0.0))).ok()?;
        Some(Tier::ALL[dist.sample(rng)])
    }

    fn absorb_new_outcomes(&mut self) {
        let log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        // Records evicted before this refresh never reach the windows.
        let unseen = (log.appended - self.consumed).min(log.records.len());
        for record in log.records.iter().skip(log.records.len() - unseen) {
            let window = &mut self.windows[record.tier.index()];
            window.push_back((record.accepted, record.fitness_delta));
            while window.len() > self.config.window {
                window.pop_front();
            }
        }
        self.consumed = log.appended;
    }

    /// Success rates normalised over enabled tiers. Without any signal the
    /// targets themselves are returned.
    fn empirical(&self, targets: &TierShares) -> TierShares {
        let mut rates = [0.0; 4];
        for tier in Tier::ALL {
            if self.enabled[tier.index()] {
                rates[tier.index()] = self.stats(tier).success_rate();
            }
        }
        let total: f64 = rates.iter().sum();
        if total <= 0.0 || !total.is_finite() {
            return *targets;
        }
        rates.map(|r| r / total)
    }

    /// Configured targets restricted to enabled tiers, with the exploration
    /// boost applied while stale.
    pub fn effective_targets(&self) -> TierShares {
        let mut targets = self.config.targets();
        for (i, enabled) in self.enabled.iter().enumerate() {
            if !enabled {
                targets[i] = 0.0;
            }
        }

        if self.boosted {
            let p = Tier::Parametric.index();
            let receivers: Vec<usize> = [Tier::Structural, Tier::Expression]
                .iter()
                .map(|t| t.index())
                .filter(|i| self.enabled[*i])
                .collect();
            let moved = self.config.exploration_boost.min(targets[p]);
            if !receivers.is_empty() && moved > 0.0 {
                let weight: f64 = receivers.iter().map(|i| targets[*i]).sum();
                targets[p] -= moved;
                for i in &receivers {
                    let portion = if weight > 0.0 {
                        targets[*i] / weight
                    } else {
                        1.0 / receivers.len() as f64
                    };
                    targets[*i] += moved * portion;
                }
            }
        }

        let total: f64 = targets.iter().sum();
        if total > 0.0 {
            targets.map(|t| t / total)
        } else {
            targets
        }
    }

    fn project(&self, shares: &TierShares) -> TierShares {
        self.project_around(shares, shares)
    }

    /// Project `shares` into `[target - band, target + band] ∩ [min_share, 1]`
    /// per enabled tier, keeping the total at one.
    fn project_around(&self, shares: &TierShares, targets: &TierShares) -> TierShares {
        let mut lo = [0.0; 4];
        let mut hi = [0.0; 4];
        for i in 0..4 {
            if self.enabled[i] {
                lo[i] = (targets[i] - self.config.share_band).max(self.config.min_share).min(1.0);
                hi[i] = (targets[i] + self.config.share_band).min(1.0).max(lo[i]);
            }
        }
        project_into_bands(shares, &lo, &hi)
    }
}

/// Euclidean projection of `shares` onto `{p : lo <= p <= hi, sum(p) = 1}`:
/// every entry is shifted by the same amount and clipped to its band, with the
/// shift found by bisection.
pub fn project_into_bands(shares: &TierShares, lo: &TierShares, hi: &TierShares) -> TierShares {
    let shares = shares.map(|s| if s.is_finite() { s } else { 0.0 });
    let at = |tau: f64| -> TierShares {
        let mut out = [0.0; 4];
        for i in 0..4 {
            out[i] = (shares[i] + tau).max(lo[i]).min(hi[i]);
        }
        out
    };

    let span = shares.iter().fold(0.0_f64, |m, s| m.max(s.abs())) + 2.0;
    let (mut low, mut high) = (-span, span);
    for _ in 0..100 {
        let mid = 0.5 * (low + high);
        if at(mid).iter().sum::<f64>() < 1.0 {
            low = mid;
        } else {
            high = mid;
        }
    }
    let out = at(0.5 * (low + high));

    // Infeasible bands: fall back to plain normalisation.
    let total: f64 = out.iter().sum();
    if total > 0.0 && (total - 1.0).abs() > 1e-6 {
        out.map(|p| p / total)
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const STANDARD: [Tier; 3] = [Tier::Parametric, Tier::Structural, Tier::Expression];

    fn outcome(tier: Tier, accepted: bool, delta: Option<f64>) -> OutcomeRecord {
        OutcomeRecord {
            tier,
            before: GenomeId(1),
            after: GenomeId(2),
            accepted,
            fitness_delta: delta,
            generation: 0,
        }
    }

    #[test]
    fn test_initial_distribution_matches_targets() {
        let selector = TierSelector::new(TierSelectionConfig::default(), &STANDARD);
        let d = selector.distribution();
        assert!((d[0] - 0.3).abs() < 1e-9);
        assert!((d[1] - 0.5).abs() < 1e-9);
        assert!((d[2] - 0.2).abs() < 1e-9);
        assert_eq!(d[3], 0.0);
    }

    #[test]
    fn test_generator_disabled_without_mutator() {
        let config = TierSelectionConfig {
            parametric_share: 0.3,
            structural_share: 0.4,
            expression_share: 0.2,
            generator_share: 0.1,
            ..Default::default()
        };
        let selector = TierSelector::new(config, &STANDARD);
        assert!(!selector.is_enabled(Tier::Generator));
        assert_eq!(selector.share(Tier::Generator), 0.0);
        assert!((selector.distribution().iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_success_pulls_share_but_band_holds() {
        let config = TierSelectionConfig {
            blend: BlendPolicyConfig::Linear { alpha: 1.0 },
            ..Default::default()
        };
        let mut selector = TierSelector::new(config, &STANDARD);
        for _ in 0..20 {
            selector.record(outcome(Tier::Expression, true, Some(1.0)));
            selector.record(outcome(Tier::Structural, false, None));
            selector.record(outcome(Tier::Parametric, false, None));
        }
        selector.refresh(false);
        let d = selector.distribution();
        assert!((d[2] - 0.35).abs() < 1e-9, "expression capped at target + band, got {}", d[2]);
        assert!(d[0] >= 0.15 - 1e-9 && d[1] >= 0.35 - 1e-9);
        assert!((d.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_forgets_old_outcomes() {
        let config = TierSelectionConfig {
            window: 5,
            ..Default::default()
        };
        let mut selector = TierSelector::new(config, &STANDARD);
        for _ in 0..5 {
            selector.record(outcome(Tier::Parametric, true, Some(2.0)));
        }
        for _ in 0..5 {
            selector.record(outcome(Tier::Parametric, false, None));
        }
        selector.refresh(false);
        let stats = selector.stats(Tier::Parametric);
        assert_eq!(stats.samples, 5);
        assert_eq!(stats.acceptance, 0.0);
        assert_eq!(selector.outcome_count(), 10);
    }

    #[test]
    fn test_exploration_boost_moves_mass_off_tier_one() {
        let config = TierSelectionConfig {
            blend: BlendPolicyConfig::Fixed,
            ..Default::default()
        };
        let mut selector = TierSelector::new(config, &STANDARD);
        let before = selector.distribution();
        selector.refresh(true);
        let after = selector.distribution();
        assert!(selector.is_boosted());
        assert!(after[0] < before[0]);
        assert!(after[1] > before[1] && after[2] > before[2]);
        selector.refresh(false);
        assert!((selector.distribution()[0] - before[0]).abs() < 1e-9);
    }

    #[test]
    fn test_sampling_never_picks_disabled_tier() {
        let selector = TierSelector::new(TierSelectionConfig::default(), &STANDARD);
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..1000 {
            assert_ne!(selector.sample(&mut rng), Some(Tier::Generator));
        }
    }

    #[test]
    fn test_ema_smooths_across_refreshes() {
        let mut policy = EmaBlend::new(1.0, 0.5);
        let targets = [0.25; 4];
        let first = policy.blend(&targets, &[1.0, 0.0, 0.0, 0.0]);
        let second = policy.blend(&targets, &[0.0, 1.0, 0.0, 0.0]);
        assert_eq!(first[0], 1.0);
        assert_eq!(second[0], 0.5);
        assert_eq!(second[1], 0.5);
    }

    #[test]
    fn test_projection_respects_bounds() {
        let lo = [0.1, 0.1, 0.1, 0.0];
        let hi = [0.5, 0.5, 0.5, 0.0];
        let out = project_into_bands(&[0.9, 0.05, 0.05, 0.3], &lo, &hi);
        assert!((out.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        for i in 0..4 {
            assert!(out[i] >= lo[i] - 1e-9 && out[i] <= hi[i] + 1e-9);
        }
        assert_eq!(out[3], 0.0);
    }
}
