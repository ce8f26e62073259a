use super::traits::{check_unit_interval, config_error, ConfigSection};
use crate::error::FactorforgeError;
use crate::types::Tier;
use serde::{Deserialize, Serialize};

/// How target shares and observed success rates are combined
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlendPolicyConfig {
    /// Ignore feedback, always sample the targets
    Fixed,
    /// `(1 - alpha) * target + alpha * empirical`
    Linear { alpha: f64 },
    /// Like `Linear`, with the empirical distribution smoothed across
    /// generations by an exponential moving average
    Ema { alpha: f64, decay: f64 },
}

impl Default for BlendPolicyConfig {
    fn default() -> Self {
        BlendPolicyConfig::Ema { alpha: 0.5, decay: 0.8 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierSelectionConfig {
    pub parametric_share: f64,
    pub structural_share: f64,
    pub expression_share: f64,
    /// Share for the external structure generator; 0 disables it
    pub generator_share: f64,
    /// Sampling probability stays within `target ± share_band`
    pub share_band: f64,
    /// Floor for every enabled tier
    pub min_share: f64,
    /// Outcomes remembered per tier
    pub window: usize,
    /// Outcome records kept by the selector; older ones are evicted
    pub outcome_log_capacity: usize,
    pub blend: BlendPolicyConfig,
    /// Probability mass moved from Tier 1 to Tiers 2/3 while the champion is stale
    pub exploration_boost: f64,
}

impl Default for TierSelectionConfig {
    fn default() -> Self {
        Self {
            parametric_share: 0.3,
            structural_share: 0.5,
            expression_share: 0.2,
            generator_share: 0.0,
            share_band: 0.15,
            min_share: 0.02,
            window: 50,
            outcome_log_capacity: 10_000,
            blend: BlendPolicyConfig::default(),
            exploration_boost: 0.1,
        }
    }
}

impl TierSelectionConfig {
    pub fn target(&self, tier: Tier) -> f64 {
        match tier {
            Tier::Parametric => self.parametric_share,
            Tier::Structural => self.structural_share,
            Tier::Expression => self.expression_share,
            Tier::Generator => self.generator_share,
        }
    }

    pub fn targets(&self) -> [f64; 4] {
        Tier::ALL.map(|t| self.target(t))
    }
}

impl ConfigSection for TierSelectionConfig {
    fn section_name() -> &'static str {
        "selection"
    }

    fn validate(&self) -> Result<(), FactorforgeError> {
        let section = Self::section_name();
        for tier in Tier::ALL {
            check_unit_interval(section, &format!("{}_share", tier.name()), self.target(tier))?;
        }
        let total: f64 = self.targets().iter().sum();
        if (total - 1.0).abs() > 1e-6 {
            return Err(config_error(section, format!("Tier shares must sum to 1, got {:.6}", total)));
        }
        check_unit_interval(section, "share_band", self.share_band)?;
        check_unit_interval(section, "min_share", self.min_share)?;
        check_unit_interval(section, "exploration_boost", self.exploration_boost)?;

        let lower: f64 = self
            .targets()
            .iter()
            .filter(|t| **t > 0.0)
            .map(|t| (t - self.share_band).max(self.min_share))
            .sum();
        if lower > 1.0 + 1e-9 {
            return Err(config_error(
                section,
                format!("Share floors sum to {:.4}, leaving no feasible distribution", lower),
            ));
        }
        if self.window == 0 {
            return Err(config_error(section, "Outcome window must be at least 1"));
        }
        if self.outcome_log_capacity < self.window {
            return Err(config_error(
                section,
                format!(
                    "Outcome log capacity {} is smaller than the window {}",
                    self.outcome_log_capacity, self.window
                ),
            ));
        }
        match &self.blend {
            BlendPolicyConfig::Fixed => {}
            BlendPolicyConfig::Linear { alpha } => check_unit_interval(section, "blend.alpha", *alpha)?,
            BlendPolicyConfig::Ema { alpha, decay } => {
                check_unit_interval(section, "blend.alpha", *alpha)?;
                check_unit_interval(section, "blend.decay", *decay)?;
            }
        }
        Ok(())
    }
}
