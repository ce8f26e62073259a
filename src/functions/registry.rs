use super::factors::builtin_factors;
use super::traits::{FactorTemplate, SignalInput};
use crate::engines::generation::genome::{FactorNode, Genome, GenomeId, NodeId};
use crate::engines::generation::logic::{Comparator, LogicExpr};
use crate::error::{FactorforgeError, Result};
use crate::types::{FactorCategory, ParamDomain, ParamValue, Parameter};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Category-keyed registry of factor templates.
///
/// This is the extension point for new factor kinds: register a
/// [`FactorTemplate`] and the structural mutator, the seeder and the
/// validator pick it up through its category.
pub struct FactorRegistry {
    by_category: BTreeMap<FactorCategory, Vec<Arc<dyn FactorTemplate>>>,
}

impl FactorRegistry {
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for factor in builtin_factors() {
            registry.register(Arc::new(factor));
        }
        registry
    }

    pub fn empty() -> Self {
        Self {
            by_category: BTreeMap::new(),
        }
    }

    /// Later registrations with the same alias replace earlier ones.
    pub fn register(&mut self, template: Arc<dyn FactorTemplate>) {
        let templates = self.by_category.entry(template.category()).or_default();
        templates.retain(|t| t.alias() != template.alias());
        templates.push(template);
    }

    pub fn templates(&self, category: FactorCategory) -> &[Arc<dyn FactorTemplate>] {
        self.by_category
            .get(&category)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn get(&self, alias: &str) -> Option<Arc<dyn FactorTemplate>> {
        self.by_category
            .values()
            .flatten()
            .find(|t| t.alias() == alias)
            .cloned()
    }

    /// Categories with at least one registered template.
    pub fn categories(&self) -> Vec<FactorCategory> {
        self.by_category
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(c, _)| *c)
            .collect()
    }

    /// Build a node with parameters drawn uniformly from their domains.
    pub fn instantiate<R: Rng>(&self, template: &dyn FactorTemplate, id: NodeId, rng: &mut R) -> FactorNode {
        let mut node = FactorNode::new(id, template.category(), template.alias(), template.base_logic());
        for spec in template.parameters() {
            let value = random_value(&spec.domain, rng).unwrap_or(spec.default);
            node.parameters.insert(
                spec.name.to_string(),
                Parameter {
                    value,
                    domain: spec.domain,
                },
            );
        }
        node
    }

    /// Build a node with every parameter at its default.
    pub fn instantiate_default(&self, template: &dyn FactorTemplate, id: NodeId) -> FactorNode {
        let mut node = FactorNode::new(id, template.category(), template.alias(), template.base_logic());
        for spec in template.parameters() {
            node.parameters.insert(
                spec.name.to_string(),
                Parameter {
                    value: spec.default,
                    domain: spec.domain,
                },
            );
        }
        node
    }

    pub fn random_node<R: Rng>(&self, category: FactorCategory, id: NodeId, rng: &mut R) -> Option<FactorNode> {
        let template = self.templates(category).choose(rng)?.clone();
        Some(self.instantiate(template.as_ref(), id, rng))
    }

    /// A fresh comparison clause over one of the node template's inputs.
    pub fn random_clause<R: Rng>(&self, node: &FactorNode, rng: &mut R) -> Option<LogicExpr> {
        let template = self.get(&node.template)?;
        let inputs: Vec<SignalInput> = template.inputs();
        let input = inputs.choose(rng)?;
        let op = *Comparator::ALL.choose(rng)?;
        let threshold = if input.typical_max > input.typical_min {
            rng.gen_range(input.typical_min..=input.typical_max)
        } else {
            input.typical_min
        };
        Some(LogicExpr::input_vs_const(input.name, op, threshold))
    }

    /// Problems with a node as seen by its template: unknown template,
    /// category mismatch, missing or undeclared parameters.
    pub fn check_node(&self, node: &FactorNode) -> Vec<String> {
        let mut problems = Vec::new();
        let template = match self.get(&node.template) {
            Some(t) => t,
            None => {
                problems.push(format!("unknown factor template '{}'", node.template));
                return problems;
            }
        };
        if template.category() != node.category {
            problems.push(format!(
                "template '{}' is {} but node is {}",
                node.template,
                template.category(),
                node.category
            ));
        }
        let specs = template.parameters();
        for spec in &specs {
            if !node.parameters.contains_key(spec.name) {
                problems.push(format!("missing parameter '{}'", spec.name));
            }
        }
        for name in node.parameters.keys() {
            if !specs.iter().any(|s| s.name == name.as_str()) {
                problems.push(format!("undeclared parameter '{}'", name));
            }
        }
        problems
    }

    /// Random seed strategy: one entry node fed by one or two signal nodes,
    /// one exit node fed by a risk node.
    pub fn seed_genome<R: Rng>(&self, id: GenomeId, rng: &mut R) -> Result<Genome> {
        let mut genome = Genome::new(id, 0);

        let signal_categories: Vec<FactorCategory> = [
            FactorCategory::Momentum,
            FactorCategory::Value,
            FactorCategory::Quality,
            FactorCategory::Other,
        ]
        .into_iter()
        .filter(|c| !self.templates(*c).is_empty())
        .collect();

        let mut entry_deps = Vec::new();
        for _ in 0..rng.gen_range(1..=2) {
            let Some(category) = signal_categories.choose(rng).copied() else {
                break;
            };
            let id = genome.next_node_id();
            if let Some(node) = self.random_node(category, id, rng) {
                genome.insert(node);
                entry_deps.push(id);
            }
        }

        let entry_id = genome.next_node_id();
        let mut entry = self
            .random_node(FactorCategory::Entry, entry_id, rng)
            .ok_or_else(|| FactorforgeError::Configuration("no entry factor templates registered".to_string()))?;
        entry.depends_on.extend(entry_deps);
        genome.insert(entry);

        let mut exit_deps = Vec::new();
        let risk_id = genome.next_node_id();
        if let Some(risk) = self.random_node(FactorCategory::Risk, risk_id, rng) {
            genome.insert(risk);
            exit_deps.push(risk_id);
        }

        let exit_id = genome.next_node_id();
        let mut exit = self
            .random_node(FactorCategory::Exit, exit_id, rng)
            .ok_or_else(|| FactorforgeError::Configuration("no exit factor templates registered".to_string()))?;
        exit.depends_on.extend(exit_deps);
        genome.insert(exit);

        Ok(genome)
    }
}

impl Default for FactorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn random_value<R: Rng>(domain: &ParamDomain, rng: &mut R) -> Option<ParamValue> {
    match domain {
        ParamDomain::Integer { min, max } if min <= max => Some(ParamValue::Integer(rng.gen_range(*min..=*max))),
        ParamDomain::Float { min, max } if min < max => Some(ParamValue::Float(rng.gen_range(*min..=*max))),
        ParamDomain::Float { min, max } if min == max => Some(ParamValue::Float(*min)),
        ParamDomain::Enum(options) => options.choose(rng).map(|o| ParamValue::Categorical(o.clone())),
        _ => None,
    }
}
