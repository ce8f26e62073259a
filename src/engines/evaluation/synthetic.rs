//! Self-contained evaluator used by the binary and the integration tests.
//!
//! A seeded random-walk market is generated once; each genome is replayed
//! bar by bar as a long-only strategy. A node is active on a bar when its own
//! logic holds and every node it depends on is active. Any active entry node
//! opens a position, any active exit node closes it.

use super::evaluator::{EvalError, Evaluator, FitnessMetrics};
use crate::engines::generation::genome::{Genome, NodeId};
use crate::engines::generation::logic::EvalContext;
use crate::types::FactorCategory;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::collections::{BTreeMap, HashMap};

const ANNUALISATION: f64 = 252.0;

/// Per-bar values of every market input a factor can reference
#[derive(Debug, Clone)]
pub struct Bar {
    pub values: HashMap<&'static str, f64>,
}

pub struct SyntheticEvaluator {
    bars: Vec<Bar>,
    closes: Vec<f64>,
}

impl SyntheticEvaluator {
    pub fn new(seed: u64, length: usize) -> Self {
        let closes = random_walk(seed, length.max(2));
        let bars = derive_inputs(&closes, seed);
        Self { bars, closes }
    }

    pub fn len(&self) -> usize {
        self.closes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }

    /// Replay `genome`; returns per-bar strategy returns and closed-trade returns.
    fn simulate(&self, genome: &Genome) -> Result<(Vec<f64>, Vec<f64>), EvalError> {
        let order = genome
            .topological_order()
            .map_err(|cycle| EvalError::Failed(format!("genome has a cycle through {:?}", cycle)))?;

        let mut bar_returns = Vec::with_capacity(self.closes.len());
        let mut trades = Vec::new();
        let mut entry_price: Option<f64> = None;
        let mut bars_held = 0usize;
        let mut equity = 1.0_f64;
        let mut peak = 1.0_f64;

        for i in 1..self.closes.len() {
            let step = self.closes[i] / self.closes[i - 1] - 1.0;
            let ret = if entry_price.is_some() { step } else { 0.0 };
            equity *= 1.0 + ret;
            peak = peak.max(equity);
            bar_returns.push(ret);
            if entry_price.is_some() {
                bars_held += 1;
            }

            let mut ctx = EvalContext::new()
                .with_input("drawdown", 1.0 - equity / peak)
                .with_input("bars_held", bars_held as f64)
                .with_input(
                    "pnl_pct",
                    entry_price.map(|p| self.closes[i] / p - 1.0).unwrap_or(0.0),
                );
            for (name, value) in &self.bars[i].values {
                ctx = ctx.with_input(name, *value);
            }

            let active = active_nodes(genome, &order, &ctx);
            let fires = |category: FactorCategory| {
                genome
                    .nodes
                    .values()
                    .any(|n| n.category == category && active.get(&n.id).copied().unwrap_or(false))
            };

            match entry_price {
                None if fires(FactorCategory::Entry) => {
                    entry_price = Some(self.closes[i]);
                    bars_held = 0;
                }
                Some(price) if fires(FactorCategory::Exit) => {
                    trades.push(self.closes[i] / price - 1.0);
                    entry_price = None;
                }
                _ => {}
            }
        }

        if let Some(price) = entry_price {
            if let Some(last) = self.closes.last() {
                trades.push(last / price - 1.0);
            }
        }
        Ok((bar_returns, trades))
    }
}

impl Evaluator for SyntheticEvaluator {
    fn evaluate(&self, genome: &Genome) -> Result<FitnessMetrics, EvalError> {
        let (bar_returns, trades) = self.simulate(genome)?;
        Ok(summarize(&bar_returns, &trades))
    }
}

fn active_nodes(genome: &Genome, order: &[NodeId], ctx: &EvalContext) -> BTreeMap<NodeId, bool> {
    let mut active = BTreeMap::new();
    for id in order {
        let Some(node) = genome.nodes.get(id) else {
            continue;
        };
        let mut local = ctx.clone();
        for (name, parameter) in &node.parameters {
            if let Some(value) = parameter.value.as_f64() {
                local = local.with_param(name, value);
            }
        }
        let upstream = node
            .depends_on
            .iter()
            .all(|d| active.get(d).copied().unwrap_or(false));
        let own = node.logic.evaluate(&local).unwrap_or(false);
        active.insert(*id, upstream && own);
    }
    active
}

/// Metric names follow the usual backtest report.
fn summarize(bar_returns: &[f64], trades: &[f64]) -> FitnessMetrics {
    let mut metrics = FitnessMetrics::new();
    let n = bar_returns.len().max(1) as f64;
    let mean = bar_returns.iter().sum::<f64>() / n;
    let variance = bar_returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    let sharpe = if std_dev > 0.0 {
        mean / std_dev * ANNUALISATION.sqrt()
    } else {
        0.0
    };

    let mut equity = 1.0_f64;
    let mut peak = 1.0_f64;
    let mut max_drawdown = 0.0_f64;
    for r in bar_returns {
        equity *= 1.0 + r;
        peak = peak.max(equity);
        max_drawdown = max_drawdown.max(1.0 - equity / peak);
    }

    let wins = trades.iter().filter(|t| **t > 0.0).count();
    metrics.insert("sharpe_ratio", sharpe);
    metrics.insert("return_pct", (equity - 1.0) * 100.0);
    metrics.insert("max_drawdown", max_drawdown * 100.0);
    metrics.insert("num_trades", trades.len() as f64);
    metrics.insert(
        "win_rate",
        if trades.is_empty() {
            0.0
        } else {
            wins as f64 / trades.len() as f64 * 100.0
        },
    );
    metrics
}

fn random_walk(seed: u64, length: usize) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut closes = Vec::with_capacity(length);
    let mut price = 100.0_f64;
    let mut drift = 0.0_f64;
    let noise = Normal::new(0.0, 0.015).ok();
    for _ in 0..length {
        // Regime changes keep trends and reversals in the series.
        if rng.gen_bool(0.02) {
            drift = rng.gen_range(-0.003..0.003);
        }
        let shock = noise.as_ref().map(|n| n.sample(&mut rng)).unwrap_or(0.0);
        price *= (1.0 + drift + shock).max(0.5);
        closes.push(price);
    }
    closes
}

fn window(closes: &[f64], i: usize, len: usize) -> &[f64] {
    &closes[i.saturating_sub(len - 1)..=i]
}

fn derive_inputs(closes: &[f64], seed: u64) -> Vec<Bar> {
    let mut rng = StdRng::seed_from_u64(seed.wrapping_add(1));
    let mut bars = Vec::with_capacity(closes.len());
    for i in 0..closes.len() {
        let close = closes[i];
        let w20 = window(closes, i, 20);
        let sma = w20.iter().sum::<f64>() / w20.len() as f64;
        let sd = (w20.iter().map(|c| (c - sma).powi(2)).sum::<f64>() / w20.len() as f64).sqrt();
        let prev_high = if i == 0 {
            close
        } else {
            window(closes, i - 1, 20).iter().cloned().fold(f64::MIN, f64::max)
        };
        let roc = close / closes[i.saturating_sub(12)] - 1.0;

        let w14 = window(closes, i, 15);
        let (mut gains, mut losses) = (0.0, 0.0);
        for pair in w14.windows(2) {
            let d = pair[1] - pair[0];
            if d > 0.0 {
                gains += d;
            } else {
                losses -= d;
            }
        }
        let rsi = if gains + losses > 0.0 {
            100.0 * gains / (gains + losses)
        } else {
            50.0
        };
        let atr_pct = w14
            .windows(2)
            .map(|p| (p[1] / p[0] - 1.0).abs())
            .sum::<f64>()
            / (w14.len().max(2) - 1) as f64;
        let adx = (roc.abs() / atr_pct.max(1e-6) * 10.0).min(100.0);

        let mut values = HashMap::new();
        values.insert("close", close);
        values.insert("sma", sma);
        values.insert("sma_distance", close / sma - 1.0);
        values.insert("zscore", if sd > 0.0 { (close - sma) / sd } else { 0.0 });
        values.insert("channel_high", prev_high);
        values.insert("breakout_pct", close / prev_high - 1.0);
        values.insert("roc", roc);
        values.insert("rsi", rsi);
        values.insert("atr_pct", atr_pct);
        values.insert("adx", adx);
        values.insert("signal", (roc * 10.0).tanh());
        values.insert("volume_ratio", rng.gen_range(0.3..3.0));
        values.insert("hour", (i % 24) as f64);
        bars.push(Bar { values });
    }
    bars
}
