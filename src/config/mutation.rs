use super::traits::{check_non_negative, check_unit_interval, config_error, ConfigSection};
use crate::error::FactorforgeError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParametricConfig {
    /// Independent probability that a numeric parameter is perturbed (p_mut)
    pub mutation_probability: f64,
    /// Relative standard deviation of the Gaussian perturbation
    pub std_dev: f64,
    pub max_attempts: usize,
}

impl Default for ParametricConfig {
    fn default() -> Self {
        Self {
            mutation_probability: 0.3,
            std_dev: 0.2,
            max_attempts: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StructuralConfig {
    pub add_weight: f64,
    pub remove_weight: f64,
    pub replace_weight: f64,
    pub max_attempts: usize,
    /// `add_node` is not offered once a genome has this many nodes
    pub max_nodes: usize,
}

impl Default for StructuralConfig {
    fn default() -> Self {
        Self {
            add_weight: 1.0,
            remove_weight: 1.0,
            replace_weight: 1.0,
            max_attempts: 8,
            max_nodes: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpressionConfig {
    /// Standard deviation of the relative threshold nudge
    pub nudge_std_dev: f64,
    /// Upper bound on comparisons in a node's condition, counted through
    /// nested composites
    pub max_clauses: usize,
    pub max_attempts: usize,
}

impl Default for ExpressionConfig {
    fn default() -> Self {
        Self {
            nudge_std_dev: 0.1,
            max_clauses: 4,
            max_attempts: 8,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MutationConfig {
    pub parametric: ParametricConfig,
    pub structural: StructuralConfig,
    pub expression: ExpressionConfig,
}

impl ConfigSection for MutationConfig {
    fn section_name() -> &'static str {
        "mutation"
    }

    fn validate(&self) -> Result<(), FactorforgeError> {
        let section = Self::section_name();
        check_unit_interval(section, "parametric.mutation_probability", self.parametric.mutation_probability)?;
        check_non_negative(section, "parametric.std_dev", self.parametric.std_dev)?;

        let s = &self.structural;
        check_non_negative(section, "structural.add_weight", s.add_weight)?;
        check_non_negative(section, "structural.remove_weight", s.remove_weight)?;
        check_non_negative(section, "structural.replace_weight", s.replace_weight)?;
        if s.add_weight + s.remove_weight + s.replace_weight <= 0.0 {
            return Err(config_error(section, "Structural operator weights cannot all be zero"));
        }
        if s.max_nodes < 2 {
            return Err(config_error(section, "structural.max_nodes must allow an entry and an exit node"));
        }

        check_non_negative(section, "expression.nudge_std_dev", self.expression.nudge_std_dev)?;
        if self.expression.max_clauses < 1 {
            return Err(config_error(section, "expression.max_clauses must be at least 1"));
        }

        for (name, attempts) in [
            ("parametric.max_attempts", self.parametric.max_attempts),
            ("structural.max_attempts", s.max_attempts),
            ("expression.max_attempts", self.expression.max_attempts),
        ] {
            if attempts == 0 {
                return Err(config_error(section, format!("{} must be at least 1", name)));
            }
        }
        Ok(())
    }
}
