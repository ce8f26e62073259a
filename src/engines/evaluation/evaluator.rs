use crate::config::EvaluationConfig;
use crate::engines::generation::genome::Genome;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("evaluation timed out after {0} ms")]
    Timeout(u64),

    #[error("evaluation failed: {0}")]
    Failed(String),

    #[error("evaluator panicked: {0}")]
    Panicked(String),

    #[error("evaluation cancelled")]
    Cancelled,
}

/// Named scores produced by an evaluator, e.g. `sharpe_ratio`, `return_pct`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitnessMetrics(pub BTreeMap<String, f64>);

impl FitnessMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.0.insert(name.to_string(), value);
        self
    }

    pub fn insert(&mut self, name: &str, value: f64) {
        self.0.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.0.get(name).copied()
    }
}

/// Ordered fitness used for ranking and promotion
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fitness {
    pub primary: f64,
    pub secondary: f64,
}

impl Fitness {
    pub const WORST: Fitness = Fitness {
        primary: f64::NEG_INFINITY,
        secondary: f64::NEG_INFINITY,
    };

    pub fn new(primary: f64, secondary: f64) -> Self {
        Self { primary, secondary }
    }

    pub fn is_finite(&self) -> bool {
        self.primary.is_finite()
    }

    /// Descending order: better fitness sorts first. NaN counts as −∞.
    pub fn rank_cmp(&self, other: &Fitness) -> Ordering {
        let a = (sanitize(self.primary), sanitize(self.secondary));
        let b = (sanitize(other.primary), sanitize(other.secondary));
        b.0.total_cmp(&a.0).then_with(|| b.1.total_cmp(&a.1))
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_nan() {
        f64::NEG_INFINITY
    } else {
        value
    }
}

/// Which metrics make up the primary and tie-break scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitnessObjective {
    pub primary: String,
    pub secondary: Option<String>,
}

impl FitnessObjective {
    pub fn new(primary: &str, secondary: Option<&str>) -> Self {
        Self {
            primary: primary.to_string(),
            secondary: secondary.map(str::to_string),
        }
    }

    pub fn from_config(config: &EvaluationConfig) -> Self {
        Self {
            primary: config.primary_metric.clone(),
            secondary: config.secondary_metric.clone(),
        }
    }

    /// Missing metrics score −∞.
    pub fn extract(&self, metrics: &FitnessMetrics) -> Fitness {
        let primary = metrics.get(&self.primary).unwrap_or(f64::NEG_INFINITY);
        let secondary = match &self.secondary {
            Some(name) => metrics.get(name).unwrap_or(f64::NEG_INFINITY),
            None => 0.0,
        };
        Fitness::new(primary, secondary)
    }
}

/// External scorer for genomes. Called concurrently for distinct genomes and
/// allowed to be slow or to fail.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, genome: &Genome) -> Result<FitnessMetrics, EvalError>;
}

impl<F> Evaluator for F
where
    F: Fn(&Genome) -> Result<FitnessMetrics, EvalError> + Send + Sync,
{
    fn evaluate(&self, genome: &Genome) -> Result<FitnessMetrics, EvalError> {
        self(genome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_metric_is_worst() {
        let objective = FitnessObjective::new("sharpe_ratio", Some("return_pct"));
        let metrics = FitnessMetrics::new().with("return_pct", 12.0);
        let fitness = objective.extract(&metrics);
        assert_eq!(fitness.primary, f64::NEG_INFINITY);
        assert_eq!(fitness.secondary, 12.0);
    }

    #[test]
    fn test_rank_order_uses_secondary_and_nan() {
        let a = Fitness::new(1.0, 5.0);
        let b = Fitness::new(1.0, 3.0);
        let c = Fitness::new(f64::NAN, 100.0);
        let d = Fitness::new(0.5, 0.0);
        let mut all = vec![c, d, b, a];
        all.sort_by(|x, y| x.rank_cmp(y));
        assert_eq!(all[0], a);
        assert_eq!(all[1], b);
        assert_eq!(all[2], d);
        assert!(all[3].primary.is_nan());
    }
}
