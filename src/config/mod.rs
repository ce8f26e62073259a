pub mod traits;
pub mod evolution;
pub mod mutation;
pub mod selection;
pub mod champion;
pub mod evaluation;
pub mod manager;

pub use manager::{ConfigManager, AppConfig};
pub use evolution::EvolutionConfig;
pub use mutation::{MutationConfig, ParametricConfig, StructuralConfig, ExpressionConfig};
pub use selection::{TierSelectionConfig, BlendPolicyConfig};
pub use champion::ChampionConfig;
pub use evaluation::EvaluationConfig;
pub use traits::ConfigSection;
