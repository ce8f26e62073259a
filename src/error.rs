use thiserror::Error;

use crate::engines::evaluation::EvalError;

#[derive(Error, Debug)]
pub enum FactorforgeError {
    #[error("Structural violation: {0}")]
    StructuralViolation(String),

    #[error("Evaluation failure: {0}")]
    EvaluationFailure(#[from] EvalError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Engine invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl FactorforgeError {
    /// Fatal errors end a run; everything else is recovered inside the engine.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FactorforgeError::Configuration(_) | FactorforgeError::InvariantViolation(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FactorforgeError>;
