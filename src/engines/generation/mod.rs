pub mod champion;
pub mod evolution_engine;
pub mod generator;
pub mod genome;
pub mod logic;
pub mod mutation;
pub mod operators;
pub mod population;
pub mod progress;
pub mod tier_selector;
pub mod validator;

pub use champion::{Champion, ChampionHandle, ChampionState, ChampionTracker, PromotionDecision, RollbackOutcome};
pub use evolution_engine::{EvolutionEngine, RollbackHandle, RunStatus, RunSummary};
pub use generator::{GeneratorMutator, ProposalContext, RegistryGenerator, StructureGenerator};
pub use genome::{FactorNode, Genome, GenomeId, NodeId};
pub use logic::{Comparator, Connective, EvalContext, LogicExpr, Operand, RewriteRule};
pub use mutation::{Mutation, Mutator, MutatorSet};
pub use population::{LineageEntry, Phase, PopulationManager};
pub use progress::{
    ChannelProgressCallback, ConsoleProgressCallback, NoopProgressCallback, ProgressCallback, ProgressMessage, RunReport,
};
pub use tier_selector::{BlendPolicy, OutcomeRecord, TierSelector};
pub use validator::{GenomeValidator, ValidationResult, Violation};
