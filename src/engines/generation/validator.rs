use crate::engines::generation::genome::{FactorNode, Genome, NodeId};
use crate::error::{FactorforgeError, Result};
use crate::functions::registry::FactorRegistry;
use crate::types::{FactorCategory, ParamDomain, ParamValue};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValidationStage {
    Acyclicity,
    Closure,
    Coverage,
    Parameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Violation {
    Cycle { nodes: Vec<NodeId> },
    DanglingDependency { node: NodeId, missing: NodeId },
    MissingCategory(FactorCategory),
    Orphan(NodeId),
    ParameterOutOfBounds { node: NodeId, parameter: String, value: ParamValue },
    ParameterTypeMismatch { node: NodeId, parameter: String },
    MalformedDomain { node: NodeId, parameter: String },
    NonFiniteConstant { node: NodeId },
    UnknownParameterReference { node: NodeId, parameter: String },
    Template { node: NodeId, detail: String },
}

impl Violation {
    pub fn stage(&self) -> ValidationStage {
        match self {
            Violation::Cycle { .. } => ValidationStage::Acyclicity,
            Violation::DanglingDependency { .. } => ValidationStage::Closure,
            Violation::MissingCategory(_) | Violation::Orphan(_) => ValidationStage::Coverage,
            _ => ValidationStage::Parameters,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Cycle { nodes } => write!(f, "cycle through {} node(s)", nodes.len()),
            Violation::DanglingDependency { node, missing } => {
                write!(f, "{} depends on missing node {}", node, missing)
            }
            Violation::MissingCategory(category) => write!(f, "no {} node", category),
            Violation::Orphan(node) => write!(f, "{} is not reachable from any output node", node),
            Violation::ParameterOutOfBounds { node, parameter, value } => {
                write!(f, "{}.{} = {} is outside its domain", node, parameter, value)
            }
            Violation::ParameterTypeMismatch { node, parameter } => {
                write!(f, "{}.{} does not match its domain type", node, parameter)
            }
            Violation::MalformedDomain { node, parameter } => {
                write!(f, "{}.{} has a malformed domain", node, parameter)
            }
            Violation::NonFiniteConstant { node } => write!(f, "{} logic has a non-finite constant", node),
            Violation::UnknownParameterReference { node, parameter } => {
                write!(f, "{} logic references unknown parameter '{}'", node, parameter)
            }
            Violation::Template { node, detail } => write!(f, "{}: {}", node, detail),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub violations: Vec<Violation>,
}

impl ValidationResult {
    pub fn ok(&self) -> bool {
        self.violations.is_empty()
    }

    /// Stage that rejected the genome, if any.
    pub fn failed_stage(&self) -> Option<ValidationStage> {
        self.violations.first().map(|v| v.stage())
    }

    pub fn into_result(self) -> Result<()> {
        if self.ok() {
            return Ok(());
        }
        let details: Vec<String> = self.violations.iter().map(|v| v.to_string()).collect();
        Err(FactorforgeError::StructuralViolation(details.join("; ")))
    }
}

/// Pairwise diversity statistics over a population
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DiversitySummary {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub pairs: usize,
}

/// Structural and semantic correctness gate for genomes
pub struct GenomeValidator {
    registry: Option<Arc<FactorRegistry>>,
    category_weight: f64,
}

impl GenomeValidator {
    pub fn new(category_weight: f64) -> Self {
        Self {
            registry: None,
            category_weight: category_weight.clamp(0.0, 1.0),
        }
    }

    /// Also check nodes against their registry templates in the parameter stage.
    pub fn with_registry(mut self, registry: Arc<FactorRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Run the checks stage by stage, stopping after the first stage that
    /// reports anything.
    pub fn validate(&self, genome: &Genome) -> ValidationResult {
        let stages: [fn(&Self, &Genome) -> Vec<Violation>; 4] = [
            Self::check_acyclic,
            Self::check_closure,
            Self::check_coverage,
            Self::check_parameters,
        ];
        for stage in stages {
            let violations = stage(self, genome);
            if !violations.is_empty() {
                return ValidationResult { violations };
            }
        }
        ValidationResult::default()
    }

    fn check_acyclic(&self, genome: &Genome) -> Vec<Violation> {
        match genome.topological_order() {
            Ok(_) => Vec::new(),
            Err(nodes) => vec![Violation::Cycle { nodes }],
        }
    }

    fn check_closure(&self, genome: &Genome) -> Vec<Violation> {
        genome
            .dangling_dependencies()
            .into_iter()
            .map(|(node, missing)| Violation::DanglingDependency { node, missing })
            .collect()
    }

    fn check_coverage(&self, genome: &Genome) -> Vec<Violation> {
        let mut violations: Vec<Violation> = genome
            .missing_required()
            .into_iter()
            .map(Violation::MissingCategory)
            .collect();
        violations.extend(genome.unreachable_nodes().into_iter().map(Violation::Orphan));
        violations
    }

    fn check_parameters(&self, genome: &Genome) -> Vec<Violation> {
        let mut violations = Vec::new();
        for node in genome.nodes.values() {
            self.check_node_parameters(node, &mut violations);
        }
        violations
    }

    fn check_node_parameters(&self, node: &FactorNode, violations: &mut Vec<Violation>) {
        for (name, parameter) in &node.parameters {
            if !parameter.domain.is_well_formed() {
                violations.push(Violation::MalformedDomain {
                    node: node.id,
                    parameter: name.clone(),
                });
            } else if !parameter.domain.type_matches(&parameter.value) {
                violations.push(Violation::ParameterTypeMismatch {
                    node: node.id,
                    parameter: name.clone(),
                });
            } else if !parameter.in_bounds() {
                violations.push(Violation::ParameterOutOfBounds {
                    node: node.id,
                    parameter: name.clone(),
                    value: parameter.value.clone(),
                });
            }
        }

        if node.logic.constants().iter().any(|c| !c.is_finite()) {
            violations.push(Violation::NonFiniteConstant { node: node.id });
        }
        for parameter in node.logic.referenced_params() {
            let numeric = node
                .parameters
                .get(&parameter)
                .map(|p| p.value.is_numeric())
                .unwrap_or(false);
            if !numeric {
                violations.push(Violation::UnknownParameterReference {
                    node: node.id,
                    parameter,
                });
            }
        }

        if let Some(registry) = &self.registry {
            for detail in registry.check_node(node) {
                violations.push(Violation::Template { node: node.id, detail });
            }
        }
    }

    /// Distance in `[0, 1]` between two genomes: a weighted mix of the
    /// Jaccard distance over category multisets and the RMS distance over
    /// parameters of nodes aligned by template. Genomes without any
    /// comparable node are maximally diverse.
    pub fn diversity(&self, a: &Genome, b: &Genome) -> f64 {
        let Some(param_distance) = aligned_parameter_distance(a, b) else {
            return 1.0;
        };
        let jaccard = category_jaccard_distance(a, b);
        let w = self.category_weight;
        (w * jaccard + (1.0 - w) * param_distance).clamp(0.0, 1.0)
    }

    pub fn population_diversity(&self, genomes: &[&Genome]) -> DiversitySummary {
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut pairs = 0usize;
        for i in 0..genomes.len() {
            for j in (i + 1)..genomes.len() {
                let d = self.diversity(genomes[i], genomes[j]);
                sum += d;
                min = min.min(d);
                max = max.max(d);
                pairs += 1;
            }
        }
        if pairs == 0 {
            return DiversitySummary::default();
        }
        DiversitySummary {
            mean: sum / pairs as f64,
            min,
            max,
            pairs,
        }
    }
}

impl Default for GenomeValidator {
    fn default() -> Self {
        Self::new(0.5)
    }
}

fn category_jaccard_distance(a: &Genome, b: &Genome) -> f64 {
    let ca = a.category_counts();
    let cb = b.category_counts();
    let mut intersection = 0usize;
    let mut union = 0usize;
    for category in FactorCategory::ALL {
        let x = ca.get(&category).copied().unwrap_or(0);
        let y = cb.get(&category).copied().unwrap_or(0);
        intersection += x.min(y);
        union += x.max(y);
    }
    if union == 0 {
        0.0
    } else {
        1.0 - intersection as f64 / union as f64
    }
}

fn nodes_by_template(genome: &Genome) -> BTreeMap<&str, Vec<&FactorNode>> {
    let mut grouped: BTreeMap<&str, Vec<&FactorNode>> = BTreeMap::new();
    for node in genome.nodes.values() {
        grouped.entry(node.template.as_str()).or_default().push(node);
    }
    grouped
}

/// `None` when no node of `a` can be aligned with a node of `b`.
fn aligned_parameter_distance(a: &Genome, b: &Genome) -> Option<f64> {
    let ga = nodes_by_template(a);
    let gb = nodes_by_template(b);

    let mut aligned = 0usize;
    let mut squared = 0.0;
    let mut compared = 0usize;

    for (template, nodes_a) in &ga {
        let Some(nodes_b) = gb.get(template) else {
            continue;
        };
        for (na, nb) in nodes_a.iter().zip(nodes_b.iter()) {
            aligned += 1;
            let names: BTreeSet<&String> = na.parameters.keys().collect();
            for name in names {
                let (Some(pa), Some(pb)) = (na.parameters.get(name), nb.parameters.get(name)) else {
                    continue;
                };
                squared += parameter_distance(&pa.domain, &pa.value, &pb.value).powi(2);
                compared += 1;
            }
        }
    }

    if aligned == 0 {
        return None;
    }
    if compared == 0 {
        return Some(0.0);
    }
    Some((squared / compared as f64).sqrt())
}

fn parameter_distance(domain: &ParamDomain, a: &ParamValue, b: &ParamValue) -> f64 {
    match (a, b) {
        (ParamValue::Categorical(x), ParamValue::Categorical(y)) => {
            if x == y {
                0.0
            } else {
                1.0
            }
        }
        _ => match (a.as_f64(), b.as_f64(), domain.span()) {
            (Some(x), Some(y), Some(span)) if span > 0.0 => ((x - y).abs() / span).min(1.0),
            (Some(x), Some(y), _) => {
                if x == y {
                    0.0
                } else {
                    1.0
                }
            }
            _ => 1.0,
        },
    }
}
