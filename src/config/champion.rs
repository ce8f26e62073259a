use super::traits::{check_non_negative, config_error, ConfigSection};
use crate::error::FactorforgeError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChampionConfig {
    /// Relative improvement required outside probation
    pub required_relative: f64,
    /// Relative improvement required during probation
    pub probation_relative: f64,
    /// Absolute improvement that also qualifies a candidate
    pub required_absolute: f64,
    /// Generations after a promotion that use `probation_relative`
    pub probation_generations: usize,
    /// Generations without promotion before the stale signal is raised
    pub staleness_interval: usize,
    /// Rollback targets must have at least this primary fitness
    pub rollback_floor: Option<f64>,
    /// Re-evaluate the champion every N generations
    pub revalidate_every: Option<usize>,
    /// Relative drop on re-evaluation that triggers a rollback
    pub regression_tolerance: f64,
}

impl Default for ChampionConfig {
    fn default() -> Self {
        Self {
            required_relative: 0.02,
            probation_relative: 0.05,
            required_absolute: 0.01,
            probation_generations: 5,
            staleness_interval: 10,
            rollback_floor: None,
            revalidate_every: None,
            regression_tolerance: 0.1,
        }
    }
}

impl ConfigSection for ChampionConfig {
    fn section_name() -> &'static str {
        "champion"
    }

    fn validate(&self) -> Result<(), FactorforgeError> {
        let section = Self::section_name();
        check_non_negative(section, "required_relative", self.required_relative)?;
        check_non_negative(section, "probation_relative", self.probation_relative)?;
        check_non_negative(section, "required_absolute", self.required_absolute)?;
        check_non_negative(section, "regression_tolerance", self.regression_tolerance)?;
        if self.probation_relative < self.required_relative {
            return Err(config_error(
                section,
                "probation_relative cannot be lower than required_relative",
            ));
        }
        if self.staleness_interval == 0 {
            return Err(config_error(section, "staleness_interval must be at least 1"));
        }
        if self.revalidate_every == Some(0) {
            return Err(config_error(section, "revalidate_every must be at least 1 when set"));
        }
        if let Some(floor) = self.rollback_floor {
            if floor.is_nan() {
                return Err(config_error(section, "rollback_floor cannot be NaN"));
            }
        }
        Ok(())
    }
}
