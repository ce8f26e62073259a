use super::cancel::CancellationToken;
use super::evaluator::{EvalError, Evaluator, Fitness, FitnessMetrics, FitnessObjective};
use crate::config::EvaluationConfig;
use crate::engines::generation::genome::Genome;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Scored result of one evaluation; failures carry [`Fitness::WORST`]
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub fitness: Fitness,
    pub metrics: Option<FitnessMetrics>,
    pub error: Option<EvalError>,
}

impl Evaluation {
    pub fn failed(error: EvalError) -> Self {
        Self {
            fitness: Fitness::WORST,
            metrics: None,
            error: Some(error),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Runs evaluator calls with a deadline and cancellation.
///
/// Every call gets its own worker thread; the calling rayon task waits on a
/// channel in `poll_interval` steps. A call that outlives its deadline is
/// abandoned and scored as a timeout. Threads cannot be killed, so an
/// abandoned call keeps its thread until the evaluator returns. At most
/// `max_abandoned` such threads may be outstanding; further calls fail
/// without spawning until some of them finish.
pub struct EvaluationScheduler {
    evaluator: Arc<dyn Evaluator>,
    objective: FitnessObjective,
    timeout: Option<Duration>,
    poll_interval: Duration,
    pool: Arc<ThreadPool>,
    abandoned: Arc<AtomicUsize>,
    max_abandoned: usize,
}

impl EvaluationScheduler {
    pub fn new(evaluator: Arc<dyn Evaluator>, config: &EvaluationConfig, pool: Arc<ThreadPool>) -> Self {
        Self {
            evaluator,
            objective: FitnessObjective::from_config(config),
            timeout: config.timeout(),
            poll_interval: config.poll_interval(),
            pool,
            abandoned: Arc::new(AtomicUsize::new(0)),
            max_abandoned: config.max_abandoned,
        }
    }

    pub fn objective(&self) -> &FitnessObjective {
        &self.objective
    }

    /// Abandoned calls whose threads have not returned yet.
    pub fn abandoned_calls(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Evaluate one genome to completion, timeout or cancellation.
    pub fn evaluate(&self, genome: &Genome, cancel: &CancellationToken) -> Evaluation {
        match self.call(genome, cancel) {
            Ok(metrics) => Evaluation {
                fitness: self.objective.extract(&metrics),
                metrics: Some(metrics),
                error: None,
            },
            Err(EvalError::Cancelled) => Evaluation::failed(EvalError::Cancelled),
            Err(e) => {
                log::warn!("Evaluation of {} failed: {}", genome.id, e);
                Evaluation::failed(e)
            }
        }
    }

    /// Evaluate all genomes in parallel, results in input order. `None` when
    /// the token was cancelled while the batch was running.
    pub fn evaluate_batch(&self, genomes: &[Genome], cancel: &CancellationToken) -> Option<Vec<Evaluation>> {
        if cancel.is_cancelled() {
            return None;
        }
        let results: Vec<Evaluation> = self
            .pool
            .install(|| genomes.par_iter().map(|g| self.evaluate(g, cancel)).collect());
        if cancel.is_cancelled() {
            None
        } else {
            Some(results)
        }
    }

    fn call(&self, genome: &Genome, cancel: &CancellationToken) -> Result<FitnessMetrics, EvalError> {
        if cancel.is_cancelled() {
            return Err(EvalError::Cancelled);
        }
        let outstanding = self.abandoned_calls();
        if outstanding >= self.max_abandoned {
            return Err(EvalError::Failed(format!(
                "{} abandoned evaluations are still running",
                outstanding
            )));
        }

        let (tx, rx) = mpsc::channel();
        let evaluator = Arc::clone(&self.evaluator);
        let owned = genome.clone();
        // Set by whichever side finishes first: the worker or the abandoning caller.
        let settled = Arc::new(AtomicBool::new(false));
        let worker_settled = Arc::clone(&settled);
        let abandoned = Arc::clone(&self.abandoned);
        thread::Builder::new()
            .name(format!("eval-{}", genome.id))
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| evaluator.evaluate(&owned)))
                    .unwrap_or_else(|payload| Err(EvalError::Panicked(panic_message(payload.as_ref()))));
                if worker_settled.swap(true, Ordering::SeqCst) {
                    abandoned.fetch_sub(1, Ordering::SeqCst);
                }
                // The receiver is gone when the call was abandoned.
                let _ = tx.send(result);
            })
            .map_err(|e| EvalError::Failed(format!("could not spawn evaluation thread: {}", e)))?;

        let result = self.wait(&rx, cancel);
        if matches!(result, Err(EvalError::Timeout(_)) | Err(EvalError::Cancelled)) {
            self.abandoned.fetch_add(1, Ordering::SeqCst);
            if settled.swap(true, Ordering::SeqCst) {
                self.abandoned.fetch_sub(1, Ordering::SeqCst);
            } else {
                log::debug!("evaluation of {} abandoned with its thread still running", genome.id);
            }
        }
        result
    }

    fn wait(
        &self,
        rx: &mpsc::Receiver<Result<FitnessMetrics, EvalError>>,
        cancel: &CancellationToken,
    ) -> Result<FitnessMetrics, EvalError> {
        let deadline = self.timeout.map(|t| Instant::now() + t);
        loop {
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(EvalError::Timeout(self.timeout_ms()));
                    }
                    self.poll_interval.min(deadline - now)
                }
                None => self.poll_interval,
            };
            match rx.recv_timeout(wait) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Timeout) => {
                    if cancel.is_cancelled() {
                        return Err(EvalError::Cancelled);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(EvalError::Failed("evaluation thread exited without a result".to_string()))
                }
            }
        }
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.map(|t| t.as_millis() as u64).unwrap_or(0)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::generation::genome::GenomeId;
    use rayon::ThreadPoolBuilder;

    fn pool() -> Arc<ThreadPool> {
        Arc::new(ThreadPoolBuilder::new().num_threads(2).build().unwrap())
    }

    fn config(timeout_ms: Option<u64>) -> EvaluationConfig {
        EvaluationConfig {
            timeout_ms,
            poll_interval_ms: 5,
            primary_metric: "score".to_string(),
            secondary_metric: None,
            ..EvaluationConfig::default()
        }
    }

    #[test]
    fn test_success_extracts_objective() {
        let evaluator = |g: &Genome| -> Result<FitnessMetrics, EvalError> {
            Ok(FitnessMetrics::new().with("score", g.id.0 as f64))
        };
        let scheduler = EvaluationScheduler::new(Arc::new(evaluator), &config(Some(1_000)), pool());
        let result = scheduler.evaluate(&Genome::new(GenomeId(7), 0), &CancellationToken::new());
        assert_eq!(result.fitness.primary, 7.0);
        assert!(!result.is_failure());
    }

    #[test]
    fn test_timeout_scores_worst() {
        let evaluator = |_: &Genome| -> Result<FitnessMetrics, EvalError> {
            thread::sleep(Duration::from_millis(500));
            Ok(FitnessMetrics::new().with("score", 1.0))
        };
        let scheduler = EvaluationScheduler::new(Arc::new(evaluator), &config(Some(20)), pool());
        let result = scheduler.evaluate(&Genome::new(GenomeId(1), 0), &CancellationToken::new());
        assert_eq!(result.fitness, Fitness::WORST);
        assert!(matches!(result.error, Some(EvalError::Timeout(20))));
    }

    #[test]
    fn test_abandoned_threads_are_bounded() {
        let evaluator = |_: &Genome| -> Result<FitnessMetrics, EvalError> {
            thread::sleep(Duration::from_millis(300));
            Ok(FitnessMetrics::new().with("score", 1.0))
        };
        let config = EvaluationConfig {
            max_abandoned: 1,
            ..config(Some(20))
        };
        let scheduler = EvaluationScheduler::new(Arc::new(evaluator), &config, pool());
        let cancel = CancellationToken::new();
        let genome = Genome::new(GenomeId(1), 0);

        assert!(matches!(scheduler.evaluate(&genome, &cancel).error, Some(EvalError::Timeout(20))));
        assert_eq!(scheduler.abandoned_calls(), 1);
        let refused = scheduler.evaluate(&genome, &cancel);
        assert!(matches!(refused.error, Some(EvalError::Failed(_))));
        assert_eq!(refused.fitness, Fitness::WORST);

        thread::sleep(Duration::from_millis(600));
        assert_eq!(scheduler.abandoned_calls(), 0);
        assert!(matches!(scheduler.evaluate(&genome, &cancel).error, Some(EvalError::Timeout(20))));
    }

    #[test]
    fn test_panic_is_contained() {
        let evaluator = |_: &Genome| -> Result<FitnessMetrics, EvalError> { panic!("boom") };
        let scheduler = EvaluationScheduler::new(Arc::new(evaluator), &config(None), pool());
        let result = scheduler.evaluate(&Genome::new(GenomeId(1), 0), &CancellationToken::new());
        assert_eq!(result.error, Some(EvalError::Panicked("boom".to_string())));
        assert_eq!(result.fitness.primary, f64::NEG_INFINITY);
    }

    #[test]
    fn test_cancelled_batch_returns_none() {
        let evaluator = |_: &Genome| -> Result<FitnessMetrics, EvalError> {
            thread::sleep(Duration::from_millis(200));
            Ok(FitnessMetrics::new().with("score", 1.0))
        };
        let scheduler = EvaluationScheduler::new(Arc::new(evaluator), &config(None), pool());
        let token = CancellationToken::new();
        let canceller = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });
        let genomes: Vec<Genome> = (0..4).map(|i| Genome::new(GenomeId(i), 0)).collect();
        let started = Instant::now();
        assert!(scheduler.evaluate_batch(&genomes, &token).is_none());
        assert!(started.elapsed() < Duration::from_millis(400));
        handle.join().unwrap();
    }
}
