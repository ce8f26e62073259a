use super::{ClampEvent, Mutation, Mutator};
use crate::config::ParametricConfig;
use crate::engines::generation::genome::{Genome, NodeId};
use crate::types::{ParamDomain, ParamValue, Parameter, Tier};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// Tier 1: Gaussian perturbation of numeric parameters
pub struct ParametricMutator {
    config: ParametricConfig,
}

impl ParametricMutator {
    pub fn new(config: ParametricConfig) -> Self {
        Self { config }
    }
}

impl Mutator for ParametricMutator {
    fn tier(&self) -> Tier {
        Tier::Parametric
    }

    fn apply(&self, genome: &Genome, seed: u64) -> Mutation {
        let mut rng = StdRng::seed_from_u64(seed);
        let targets: Vec<(NodeId, String)> = genome
            .nodes
            .values()
            .flat_map(|n| n.numeric_parameters().into_iter().map(move |p| (n.id, p.to_string())))
            .collect();
        if targets.is_empty() {
            return Mutation::noop(genome);
        }

        let p_mut = self.config.mutation_probability.clamp(0.0, 1.0);
        for _ in 0..self.config.max_attempts.max(1) {
            let mut chosen: Vec<usize> = (0..targets.len()).filter(|_| rng.gen_bool(p_mut)).collect();
            if chosen.is_empty() {
                chosen.push(rng.gen_range(0..targets.len()));
            }

            let mut child = genome.derive_child(seed, Tier::Parametric);
            let mut clamp_events = Vec::new();
            let mut changed = false;

            for idx in chosen {
                let (node_id, name) = &targets[idx];
                let Some(parameter) = child
                    .nodes
                    .get_mut(node_id)
                    .and_then(|n| n.parameters.get_mut(name))
                else {
                    continue;
                };
                let before = parameter.value.clone();
                if let Some((sampled, clamped)) = perturb_parameter(parameter, self.config.std_dev, &mut rng) {
                    if sampled != clamped {
                        log::debug!(
                            "clamped {}.{} from {:.4} to {:.4}",
                            node_id,
                            name,
                            sampled,
                            clamped
                        );
                        clamp_events.push(ClampEvent {
                            node: *node_id,
                            parameter: name.clone(),
                            sampled,
                            clamped,
                        });
                    }
                }
                changed |= parameter.value != before;
            }

            if changed {
                return Mutation {
                    genome: child,
                    clamp_events,
                };
            }
        }

        Mutation::noop(genome)
    }
}

/// `current + N(0, std_dev * |current|)`, or `N(0, std_dev)` around zero.
pub fn gaussian_step<R: Rng>(current: f64, std_dev: f64, rng: &mut R) -> Option<f64> {
    let scale = if current == 0.0 { std_dev } else { std_dev * current.abs() };
    if !scale.is_finite() || scale <= 0.0 {
        return None;
    }
    let normal = Normal::new(0.0, scale).ok()?;
    let sampled = current + normal.sample(rng);
    sampled.is_finite().then_some(sampled)
}

/// Perturb, clamp into the domain, then round integers. Returns the raw
/// sample and the clamped value, or `None` if the parameter was left alone.
pub fn perturb_parameter<R: Rng>(parameter: &mut Parameter, std_dev: f64, rng: &mut R) -> Option<(f64, f64)> {
    let current = parameter.value.as_f64()?;
    let (min, max) = parameter.domain.bounds()?;
    let sampled = gaussian_step(current, std_dev, rng)?;
    let clamped = sampled.clamp(min, max);

    parameter.value = match parameter.domain {
        ParamDomain::Integer { min, max } => ParamValue::Integer((clamped.round() as i64).clamp(min, max)),
        ParamDomain::Float { .. } => ParamValue::Float(clamped),
        ParamDomain::Enum(_) => return None,
    };
    Some((sampled, clamped))
}
