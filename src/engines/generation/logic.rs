//! Logic expressions carried by factor nodes.
//!
//! A node's logic is a small tagged-union tree: comparisons between named
//! inputs, parameter references and constants, combined with AND/OR. Tier 3
//! mutation rewrites these trees through [`LogicExpr::rewrite`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparator {
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparator {
    pub const ALL: [Comparator; 4] = [Comparator::Lt, Comparator::Le, Comparator::Gt, Comparator::Ge];

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
        }
    }

    /// Strict/non-strict flip: `<` <-> `<=`, `>` <-> `>=`.
    pub fn flipped(&self) -> Comparator {
        match self {
            Comparator::Lt => Comparator::Le,
            Comparator::Le => Comparator::Lt,
            Comparator::Gt => Comparator::Ge,
            Comparator::Ge => Comparator::Gt,
        }
    }

    pub fn apply(&self, left: f64, right: f64) -> bool {
        match self {
            Comparator::Lt => left < right,
            Comparator::Le => left <= right,
            Comparator::Gt => left > right,
            Comparator::Ge => left >= right,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Connective {
    And,
    Or,
}

impl Connective {
    pub fn other(&self) -> Connective {
        match self {
            Connective::And => Connective::Or,
            Connective::Or => Connective::And,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Connective::And => "AND",
            Connective::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    /// Named series value supplied by the evaluation context (e.g. `rsi`)
    Input(String),
    /// Reference to one of the owning node's numeric parameters
    Param(String),
    Const(f64),
}

impl Operand {
    fn resolve(&self, ctx: &EvalContext) -> Option<f64> {
        match self {
            Operand::Input(name) => ctx.inputs.get(name).copied(),
            Operand::Param(name) => ctx.params.get(name).copied(),
            Operand::Const(v) => Some(*v),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Input(name) => write!(f, "{}", name),
            Operand::Param(name) => write!(f, "${}", name),
            Operand::Const(v) => write!(f, "{:.4}", v),
        }
    }
}

/// Values an expression is evaluated against
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    pub inputs: HashMap<String, f64>,
    pub params: HashMap<String, f64>,
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, name: &str, value: f64) -> Self {
        self.inputs.insert(name.to_string(), value);
        self
    }

    pub fn with_param(mut self, name: &str, value: f64) -> Self {
        self.params.insert(name.to_string(), value);
        self
    }
}

/// Expression-level rewrites applied by Tier 3 mutation
#[derive(Debug, Clone, PartialEq)]
pub enum RewriteRule {
    /// Scale the constant of the `clause`-th comparison by `1 + factor`
    /// (adds `factor` when the constant is zero).
    NudgeThreshold { clause: usize, factor: f64 },
    FlipComparator { clause: usize },
    AddClause { clause: LogicExpr, connective: Connective },
    RemoveClause { index: usize },
    SwapConnective,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogicExpr {
    Literal(bool),
    Compare {
        left: Operand,
        op: Comparator,
        right: Operand,
    },
    Composite {
        connective: Connective,
        clauses: Vec<LogicExpr>,
    },
    Not(Box<LogicExpr>),
}

impl LogicExpr {
    pub fn compare(left: Operand, op: Comparator, right: Operand) -> Self {
        LogicExpr::Compare { left, op, right }
    }

    pub fn input_vs_const(input: &str, op: Comparator, threshold: f64) -> Self {
        LogicExpr::Compare {
            left: Operand::Input(input.to_string()),
            op,
            right: Operand::Const(threshold),
        }
    }

    /// Canonical formula string; equal expressions serialize identically.
    pub fn serialize(&self) -> String {
        self.to_string()
    }

    pub fn evaluate(&self, ctx: &EvalContext) -> Option<bool> {
        match self {
            LogicExpr::Literal(b) => Some(*b),
            LogicExpr::Compare { left, op, right } => {
                let l = left.resolve(ctx)?;
                let r = right.resolve(ctx)?;
                Some(op.apply(l, r))
            }
            LogicExpr::Composite { connective, clauses } => {
                let mut values = Vec::with_capacity(clauses.len());
                for clause in clauses {
                    values.push(clause.evaluate(ctx)?);
                }
                Some(match connective {
                    Connective::And => values.iter().all(|v| *v),
                    Connective::Or => values.iter().any(|v| *v),
                })
            }
            LogicExpr::Not(inner) => inner.evaluate(ctx).map(|v| !v),
        }
    }

    /// Number of comparison leaves, in pre-order.
    pub fn comparison_count(&self) -> usize {
        match self {
            LogicExpr::Literal(_) => 0,
            LogicExpr::Compare { .. } => 1,
            LogicExpr::Composite { clauses, .. } => clauses.iter().map(|c| c.comparison_count()).sum(),
            LogicExpr::Not(inner) => inner.comparison_count(),
        }
    }

    /// Pre-order indices of comparisons that carry a constant operand.
    pub fn nudgeable_clauses(&self) -> Vec<usize> {
        let mut out = Vec::new();
        let mut index = 0;
        self.walk_comparisons(&mut |left, _, right| {
            if matches!(left, Operand::Const(_)) || matches!(right, Operand::Const(_)) {
                out.push(index);
            }
            index += 1;
        });
        out
    }

    /// Top-level clause count; 1 for anything that is not a composite.
    pub fn clause_count(&self) -> usize {
        match self {
            LogicExpr::Composite { clauses, .. } => clauses.len(),
            _ => 1,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, LogicExpr::Composite { .. })
    }

    pub fn constants(&self) -> Vec<f64> {
        let mut out = Vec::new();
        self.walk_comparisons(&mut |left, _, right| {
            for operand in [left, right] {
                if let Operand::Const(v) = operand {
                    out.push(*v);
                }
            }
        });
        out
    }

    pub fn referenced_params(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.walk_comparisons(&mut |left, _, right| {
            for operand in [left, right] {
                if let Operand::Param(name) = operand {
                    out.push(name.clone());
                }
            }
        });
        out
    }

    fn walk_comparisons<F: FnMut(&Operand, Comparator, &Operand)>(&self, f: &mut F) {
        match self {
            LogicExpr::Literal(_) => {}
            LogicExpr::Compare { left, op, right } => f(left, *op, right),
            LogicExpr::Composite { clauses, .. } => {
                for clause in clauses {
                    clause.walk_comparisons(f);
                }
            }
            LogicExpr::Not(inner) => inner.walk_comparisons(f),
        }
    }

    /// Mutable access to the `target`-th comparison in pre-order.
    fn comparison_mut(&mut self, target: usize) -> Option<(&mut Operand, &mut Comparator, &mut Operand)> {
        fn visit<'a>(
            expr: &'a mut LogicExpr,
            target: usize,
            seen: &mut usize,
        ) -> Option<(&'a mut Operand, &'a mut Comparator, &'a mut Operand)> {
            match expr {
                LogicExpr::Literal(_) => None,
                LogicExpr::Compare { left, op, right } => {
                    if *seen == target {
                        Some((left, op, right))
                    } else {
                        *seen += 1;
                        None
                    }
                }
                LogicExpr::Composite { clauses, .. } => {
                    for clause in clauses.iter_mut() {
                        if let Some(found) = visit(clause, target, seen) {
                            return Some(found);
                        }
                    }
                    None
                }
                LogicExpr::Not(inner) => visit(inner, target, seen),
            }
        }
        let mut seen = 0;
        visit(self, target, &mut seen)
    }

    /// Apply a rewrite, returning the new expression or `None` when the rule
    /// does not apply to this expression.
    pub fn rewrite(&self, rule: &RewriteRule) -> Option<LogicExpr> {
        match rule {
            RewriteRule::NudgeThreshold { clause, factor } => {
                if !factor.is_finite() {
                    return None;
                }
                let mut out = self.clone();
                let (left, _, right) = out.comparison_mut(*clause)?;
                let constant = if let Operand::Const(v) = right {
                    v
                } else if let Operand::Const(v) = left {
                    v
                } else {
                    return None;
                };
                let nudged = if *constant == 0.0 {
                    *constant + factor
                } else {
                    *constant * (1.0 + factor)
                };
                if !nudged.is_finite() || nudged == *constant {
                    return None;
                }
                *constant = nudged;
                Some(out)
            }
            RewriteRule::FlipComparator { clause } => {
                let mut out = self.clone();
                let (_, op, _) = out.comparison_mut(*clause)?;
                *op = op.flipped();
                Some(out)
            }
            RewriteRule::AddClause { clause, connective } => match self {
                LogicExpr::Composite { connective: own, clauses } if own == connective => {
                    let mut clauses = clauses.clone();
                    clauses.push(clause.clone());
                    Some(LogicExpr::Composite {
                        connective: *own,
                        clauses,
                    })
                }
                other => Some(LogicExpr::Composite {
                    connective: *connective,
                    clauses: vec![other.clone(), clause.clone()],
                }),
            },
            RewriteRule::RemoveClause { index } => match self {
                LogicExpr::Composite { connective, clauses } if clauses.len() >= 2 && *index < clauses.len() => {
                    let mut clauses = clauses.clone();
                    clauses.remove(*index);
                    if clauses.len() == 1 {
                        clauses.pop()
                    } else {
                        Some(LogicExpr::Composite {
                            connective: *connective,
                            clauses,
                        })
                    }
                }
                _ => None,
            },
            RewriteRule::SwapConnective => match self {
                LogicExpr::Composite { connective, clauses } if clauses.len() >= 2 => Some(LogicExpr::Composite {
                    connective: connective.other(),
                    clauses: clauses.clone(),
                }),
                _ => None,
            },
        }
    }
}

impl fmt::Display for LogicExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicExpr::Literal(b) => write!(f, "{}", b),
            LogicExpr::Compare { left, op, right } => write!(f, "{} {} {}", left, op.symbol(), right),
            LogicExpr::Composite { connective, clauses } => {
                let parts: Vec<String> = clauses.iter().map(|c| format!("({})", c)).collect();
                write!(f, "{}", parts.join(&format!(" {} ", connective.symbol())))
            }
            LogicExpr::Not(inner) => write!(f, "NOT ({})", inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rsi_oversold() -> LogicExpr {
        LogicExpr::input_vs_const("rsi", Comparator::Lt, 30.0)
    }

    #[test]
    fn test_evaluate_comparison_and_composite() {
        let expr = LogicExpr::Composite {
            connective: Connective::And,
            clauses: vec![
                rsi_oversold(),
                LogicExpr::compare(
                    Operand::Input("close".into()),
                    Comparator::Gt,
                    Operand::Param("floor".into()),
                ),
            ],
        };
        let ctx = EvalContext::new()
            .with_input("rsi", 25.0)
            .with_input("close", 101.0)
            .with_param("floor", 100.0);
        assert_eq!(expr.evaluate(&ctx), Some(true));

        let missing = EvalContext::new().with_input("rsi", 25.0);
        assert_eq!(expr.evaluate(&missing), None);
    }

    #[test]
    fn test_flip_comparator() {
        let flipped = rsi_oversold()
            .rewrite(&RewriteRule::FlipComparator { clause: 0 })
            .unwrap();
        assert_eq!(flipped.serialize(), "rsi <= 30.0000");
        assert!(rsi_oversold().rewrite(&RewriteRule::FlipComparator { clause: 1 }).is_none());
    }

    #[test]
    fn test_nudge_threshold() {
        let nudged = rsi_oversold()
            .rewrite(&RewriteRule::NudgeThreshold { clause: 0, factor: 0.1 })
            .unwrap();
        assert_eq!(nudged.constants(), vec![33.0]);

        let no_const = LogicExpr::compare(
            Operand::Input("close".into()),
            Comparator::Gt,
            Operand::Input("sma".into()),
        );
        assert!(no_const.nudgeable_clauses().is_empty());
        assert!(no_const
            .rewrite(&RewriteRule::NudgeThreshold { clause: 0, factor: 0.1 })
            .is_none());
    }

    #[test]
    fn test_add_and_remove_clause() {
        let added = rsi_oversold()
            .rewrite(&RewriteRule::AddClause {
                clause: LogicExpr::input_vs_const("volume_ratio", Comparator::Gt, 1.5),
                connective: Connective::Or,
            })
            .unwrap();
        assert_eq!(added.clause_count(), 2);
        assert_eq!(added.serialize(), "(rsi < 30.0000) OR (volume_ratio > 1.5000)");

        let removed = added.rewrite(&RewriteRule::RemoveClause { index: 1 }).unwrap();
        assert_eq!(removed, rsi_oversold());
        assert!(rsi_oversold().rewrite(&RewriteRule::RemoveClause { index: 0 }).is_none());
    }

    #[test]
    fn test_swap_connective() {
        let expr = LogicExpr::Composite {
            connective: Connective::And,
            clauses: vec![rsi_oversold(), LogicExpr::Literal(true)],
        };
        let swapped = expr.rewrite(&RewriteRule::SwapConnective).unwrap();
        assert!(matches!(
            swapped,
            LogicExpr::Composite {
                connective: Connective::Or,
                ..
            }
        ));
    }
}
