use super::traits::{config_error, ConfigSection};
use crate::error::FactorforgeError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Per-genome evaluation deadline; `None` waits indefinitely
    pub timeout_ms: Option<u64>,
    /// How often a waiting evaluation checks for cancellation
    pub poll_interval_ms: u64,
    /// Worker threads for evaluation and offspring production
    pub threads: Option<usize>,
    pub primary_metric: String,
    /// Tie-break metric
    pub secondary_metric: Option<String>,
    /// Timed-out calls whose threads may still be running before new calls
    /// are refused
    pub max_abandoned: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: Some(60_000),
            poll_interval_ms: 10,
            threads: None,
            primary_metric: "sharpe_ratio".to_string(),
            secondary_metric: Some("return_pct".to_string()),
            max_abandoned: 64,
        }
    }
}

impl EvaluationConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl ConfigSection for EvaluationConfig {
    fn section_name() -> &'static str {
        "evaluation"
    }

    fn validate(&self) -> Result<(), FactorforgeError> {
        let section = Self::section_name();
        if self.timeout_ms == Some(0) {
            return Err(config_error(section, "timeout_ms must be positive when set"));
        }
        if self.threads == Some(0) {
            return Err(config_error(section, "threads must be positive when set"));
        }
        if self.max_abandoned == 0 {
            return Err(config_error(section, "max_abandoned must be at least 1"));
        }
        if self.primary_metric.trim().is_empty() {
            return Err(config_error(section, "primary_metric cannot be empty"));
        }
        Ok(())
    }
}
