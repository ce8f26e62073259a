use super::traits::{check_unit_interval, config_error, ConfigSection};
use crate::error::FactorforgeError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    /// Population size N
    pub population_size: usize,
    /// Elite count K carried unmodified into the next generation
    pub elite_count: usize,
    pub tournament_size: usize,
    pub generations: usize,
    /// Fresh mutation attempts after a validator rejection
    pub max_retries: usize,
    pub seed: Option<u64>,
    /// Weight of the category term in the diversity score
    pub diversity_category_weight: f64,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            population_size: 50,
            elite_count: 5,
            tournament_size: 3,
            generations: 50,
            max_retries: 3,
            seed: None,
            diversity_category_weight: 0.5,
        }
    }
}

impl ConfigSection for EvolutionConfig {
    fn section_name() -> &'static str {
        "evolution"
    }

    fn validate(&self) -> Result<(), FactorforgeError> {
        let section = Self::section_name();
        if self.population_size < 2 {
            return Err(config_error(section, "Population size must be at least 2"));
        }
        if self.elite_count > self.population_size {
            return Err(config_error(
                section,
                format!(
                    "Elite count ({}) cannot exceed population size ({})",
                    self.elite_count, self.population_size
                ),
            ));
        }
        if self.tournament_size == 0 {
            return Err(config_error(section, "Tournament size must be at least 1"));
        }
        if self.generations == 0 {
            return Err(config_error(section, "Generations must be at least 1"));
        }
        check_unit_interval(section, "diversity_category_weight", self.diversity_category_weight)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elite_count_above_population_rejected() {
        let config = EvolutionConfig {
            population_size: 4,
            elite_count: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_is_valid() {
        assert!(EvolutionConfig::default().validate().is_ok());
    }
}
