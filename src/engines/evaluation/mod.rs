pub mod cancel;
pub mod evaluator;
pub mod scheduler;
pub mod synthetic;

pub use cancel::CancellationToken;
pub use evaluator::{EvalError, Evaluator, Fitness, FitnessMetrics, FitnessObjective};
pub use scheduler::{Evaluation, EvaluationScheduler};
pub use synthetic::SyntheticEvaluator;
