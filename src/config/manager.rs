use super::{
    champion::ChampionConfig,
    evaluation::EvaluationConfig,
    evolution::EvolutionConfig,
    mutation::MutationConfig,
    selection::TierSelectionConfig,
    traits::ConfigSection,
};
use crate::error::FactorforgeError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

/// Environment variables override file values, e.g.
/// `FACTORFORGE_EVOLUTION__POPULATION_SIZE=200`.
pub const ENV_PREFIX: &str = "FACTORFORGE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub evolution: EvolutionConfig,
    pub mutation: MutationConfig,
    pub selection: TierSelectionConfig,
    pub champion: ChampionConfig,
    pub evaluation: EvaluationConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), FactorforgeError> {
        self.evolution.validate()?;
        self.mutation.validate()?;
        self.selection.validate()?;
        self.champion.validate()?;
        self.evaluation.validate()?;
        Ok(())
    }
}

pub struct ConfigManager {
    config: Arc<RwLock<AppConfig>>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            config: Arc::new(RwLock::new(AppConfig::default())),
        }
    }

    pub fn from_config(config: AppConfig) -> Result<Self, FactorforgeError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(RwLock::new(config)),
        })
    }

    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> Result<(), FactorforgeError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| FactorforgeError::Configuration(format!("Failed to read config: {}", e)))?;

        let config: AppConfig = toml::from_str(&contents)
            .map_err(|e| FactorforgeError::Configuration(format!("Failed to parse config: {}", e)))?;

        self.replace(config)
    }

    /// Defaults, then the optional file, then `FACTORFORGE_*` environment
    /// variables.
    pub fn load_layered<P: AsRef<Path>>(&self, path: Option<P>) -> Result<(), FactorforgeError> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path.as_ref()).required(true));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| FactorforgeError::Configuration(format!("Failed to load config: {}", e)))?;

        self.replace(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), FactorforgeError> {
        let config = self.get();
        let toml_str = toml::to_string_pretty(&config)
            .map_err(|e| FactorforgeError::Configuration(format!("Failed to serialize: {}", e)))?;

        std::fs::write(path, toml_str)
            .map_err(|e| FactorforgeError::Configuration(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    pub fn get(&self) -> AppConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply `f` to a copy; the stored config only changes if the result validates.
    pub fn update<F>(&self, f: F) -> Result<(), FactorforgeError>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut candidate = self.get();
        f(&mut candidate);
        self.replace(candidate)
    }

    fn replace(&self, config: AppConfig) -> Result<(), FactorforgeError> {
        config.validate()?;
        *self.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        Ok(())
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
