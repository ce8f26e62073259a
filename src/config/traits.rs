use crate::error::FactorforgeError;
use serde::{Deserialize, Serialize};

/// Trait for configuration sections
pub trait ConfigSection: Serialize + for<'de> Deserialize<'de> + Default + Clone {
    fn section_name() -> &'static str;
    fn validate(&self) -> Result<(), FactorforgeError>;
}

pub(crate) fn config_error(section: &str, message: impl Into<String>) -> FactorforgeError {
    FactorforgeError::Configuration(format!("[{}] {}", section, message.into()))
}

pub(crate) fn check_unit_interval(section: &str, name: &str, value: f64) -> Result<(), FactorforgeError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(config_error(section, format!("{} must be between 0 and 1, got {}", name, value)));
    }
    Ok(())
}

pub(crate) fn check_non_negative(section: &str, name: &str, value: f64) -> Result<(), FactorforgeError> {
    if !value.is_finite() || value < 0.0 {
        return Err(config_error(
            section,
            format!("{} must be a finite non-negative number, got {}", name, value),
        ));
    }
    Ok(())
}
