use crate::engines::generation::logic::LogicExpr;
use crate::types::{FactorCategory, ParamDomain, ParamValue};

/// Declared parameter of a factor template
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub domain: ParamDomain,
    pub default: ParamValue,
}

impl ParamSpec {
    pub fn int(name: &'static str, default: i64, min: i64, max: i64) -> Self {
        Self {
            name,
            domain: ParamDomain::Integer { min, max },
            default: ParamValue::Integer(default),
        }
    }

    pub fn float(name: &'static str, default: f64, min: f64, max: f64) -> Self {
        Self {
            name,
            domain: ParamDomain::Float { min, max },
            default: ParamValue::Float(default),
        }
    }

    pub fn choice(name: &'static str, default: &str, options: &[&str]) -> Self {
        Self {
            name,
            domain: ParamDomain::Enum(options.iter().map(|o| o.to_string()).collect()),
            default: ParamValue::Categorical(default.to_string()),
        }
    }
}

/// Named series a factor's logic can compare against, with its typical range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalInput {
    pub name: &'static str,
    pub typical_min: f64,
    pub typical_max: f64,
}

impl SignalInput {
    pub const fn new(name: &'static str, typical_min: f64, typical_max: f64) -> Self {
        Self {
            name,
            typical_min,
            typical_max,
        }
    }
}

/// Base trait for all factor templates
pub trait FactorTemplate: Send + Sync {
    /// Alias stored on nodes built from this template
    fn alias(&self) -> &'static str;

    fn ui_name(&self) -> &'static str;

    fn category(&self) -> FactorCategory;

    fn parameters(&self) -> Vec<ParamSpec>;

    /// Series available to the logic expression
    fn inputs(&self) -> Vec<SignalInput>;

    /// Logic expression a fresh node starts from
    fn base_logic(&self) -> LogicExpr;
}
