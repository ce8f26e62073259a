use serde::{Deserialize, Serialize};
use std::fmt;

/// Functional role of a factor node inside a strategy graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorCategory {
    Momentum,
    Value,
    Quality,
    Risk,
    Entry,
    Exit,
    Other,
}

impl FactorCategory {
    pub const ALL: [FactorCategory; 7] = [
        FactorCategory::Momentum,
        FactorCategory::Value,
        FactorCategory::Quality,
        FactorCategory::Risk,
        FactorCategory::Entry,
        FactorCategory::Exit,
        FactorCategory::Other,
    ];

    /// Every accepted genome needs at least one node of each required category.
    pub const REQUIRED: [FactorCategory; 2] = [FactorCategory::Entry, FactorCategory::Exit];

    pub fn is_required(&self) -> bool {
        matches!(self, FactorCategory::Entry | FactorCategory::Exit)
    }

    /// Output nodes are the roots of a genome; everything else must feed one.
    pub fn is_output(&self) -> bool {
        self.is_required()
    }

    pub fn name(&self) -> &'static str {
        match self {
            FactorCategory::Momentum => "momentum",
            FactorCategory::Value => "value",
            FactorCategory::Quality => "quality",
            FactorCategory::Risk => "risk",
            FactorCategory::Entry => "entry",
            FactorCategory::Exit => "exit",
            FactorCategory::Other => "other",
        }
    }
}

impl fmt::Display for FactorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameter value carried by a factor node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Integer(i64),
    Float(f64),
    Categorical(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Integer(i) => Some(*i as f64),
            ParamValue::Float(f) => Some(*f),
            ParamValue::Categorical(_) => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, ParamValue::Categorical(_))
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Integer(i) => write!(f, "{}", i),
            ParamValue::Float(v) => write!(f, "{:.4}", v),
            ParamValue::Categorical(s) => write!(f, "{}", s),
        }
    }
}

/// Declared domain of a parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamDomain {
    Integer { min: i64, max: i64 },
    Float { min: f64, max: f64 },
    Enum(Vec<String>),
}

impl ParamDomain {
    /// True when the value has the domain's type and lies inside it.
    pub fn contains(&self, value: &ParamValue) -> bool {
        match (self, value) {
            (ParamDomain::Integer { min, max }, ParamValue::Integer(v)) => v >= min && v <= max,
            (ParamDomain::Float { min, max }, ParamValue::Float(v)) => {
                v.is_finite() && *v >= *min && *v <= *max
            }
            (ParamDomain::Enum(options), ParamValue::Categorical(v)) => options.contains(v),
            _ => false,
        }
    }

    pub fn type_matches(&self, value: &ParamValue) -> bool {
        matches!(
            (self, value),
            (ParamDomain::Integer { .. }, ParamValue::Integer(_))
                | (ParamDomain::Float { .. }, ParamValue::Float(_))
                | (ParamDomain::Enum(_), ParamValue::Categorical(_))
        )
    }

    /// Numeric bounds as floats, `None` for enum domains.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        match self {
            ParamDomain::Integer { min, max } => Some((*min as f64, *max as f64)),
            ParamDomain::Float { min, max } => Some((*min, *max)),
            ParamDomain::Enum(_) => None,
        }
    }

    pub fn span(&self) -> Option<f64> {
        self.bounds().map(|(min, max)| max - min)
    }

    pub fn is_well_formed(&self) -> bool {
        match self {
            ParamDomain::Integer { min, max } => min <= max,
            ParamDomain::Float { min, max } => min.is_finite() && max.is_finite() && min <= max,
            ParamDomain::Enum(options) => !options.is_empty(),
        }
    }
}

/// A parameter value together with the domain it must respect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub value: ParamValue,
    pub domain: ParamDomain,
}

impl Parameter {
    pub fn int(value: i64, min: i64, max: i64) -> Self {
        Self {
            value: ParamValue::Integer(value),
            domain: ParamDomain::Integer { min, max },
        }
    }

    pub fn float(value: f64, min: f64, max: f64) -> Self {
        Self {
            value: ParamValue::Float(value),
            domain: ParamDomain::Float { min, max },
        }
    }

    pub fn choice(value: &str, options: &[&str]) -> Self {
        Self {
            value: ParamValue::Categorical(value.to_string()),
            domain: ParamDomain::Enum(options.iter().map(|o| o.to_string()).collect()),
        }
    }

    pub fn in_bounds(&self) -> bool {
        self.domain.contains(&self.value)
    }
}

/// Offspring source. The first three are the mutation tiers; `Generator` is
/// the optional external structure generator competing for slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Parametric,
    Structural,
    Expression,
    Generator,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Parametric, Tier::Structural, Tier::Expression, Tier::Generator];

    pub fn index(&self) -> usize {
        match self {
            Tier::Parametric => 0,
            Tier::Structural => 1,
            Tier::Expression => 2,
            Tier::Generator => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tier::Parametric => "parametric",
            Tier::Structural => "structural",
            Tier::Expression => "expression",
            Tier::Generator => "generator",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
