use super::genome::GenomeId;
use super::validator::DiversitySummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::mpsc::Sender;

/// Snapshot emitted once per committed generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub generation: usize,
    pub best_fitness: f64,
    pub best_genome: Option<GenomeId>,
    pub diversity: DiversitySummary,
    /// Offspring produced per tier name, no-op placeholders excluded
    pub tier_usage: BTreeMap<String, usize>,
    pub tier_distribution: BTreeMap<String, f64>,
    pub champion_promoted: bool,
    pub champion_rolled_back: bool,
    pub champion_fitness: Option<f64>,
    pub champion_id: Option<GenomeId>,
    pub stale: bool,
    pub rejections: usize,
    pub noop_offspring: usize,
    pub clamp_events: usize,
    pub evaluation_failures: usize,
    pub timestamp: DateTime<Utc>,
}

impl RunReport {
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

pub trait ProgressCallback: Send {
    fn on_generation_start(&mut self, generation: usize);
    fn on_generation_complete(&mut self, report: &RunReport);
    fn on_genome_evaluated(&mut self, evaluated: usize, total: usize);
}

pub struct ConsoleProgressCallback;

impl ProgressCallback for ConsoleProgressCallback {
    fn on_generation_start(&mut self, generation: usize) {
        log::debug!("Generation {} starting...", generation + 1);
    }

    fn on_generation_complete(&mut self, report: &RunReport) {
        log::info!(
            "Generation {} complete. Best fitness: {:.4}, diversity: {:.3}, champion: {}{}",
            report.generation + 1,
            report.best_fitness,
            report.diversity.mean,
            report
                .champion_fitness
                .map(|f| format!("{:.4}", f))
                .unwrap_or_else(|| "none".to_string()),
            if report.stale { " (stale)" } else { "" }
        );
    }

    fn on_genome_evaluated(&mut self, evaluated: usize, total: usize) {
        if evaluated % 10 == 0 || evaluated == total {
            log::debug!("  Evaluated {}/{} genomes", evaluated, total);
        }
    }
}

/// Forwards progress to another thread
pub struct ChannelProgressCallback {
    sender: Sender<ProgressMessage>,
}

#[derive(Debug, Clone)]
pub enum ProgressMessage {
    GenerationStart(usize),
    GenerationComplete(Box<RunReport>),
    GenomesEvaluated { current: usize, total: usize },
}

impl ChannelProgressCallback {
    pub fn new(sender: Sender<ProgressMessage>) -> Self {
        Self { sender }
    }
}

impl ProgressCallback for ChannelProgressCallback {
    fn on_generation_start(&mut self, generation: usize) {
        let _ = self.sender.send(ProgressMessage::GenerationStart(generation));
    }

    fn on_generation_complete(&mut self, report: &RunReport) {
        let _ = self
            .sender
            .send(ProgressMessage::GenerationComplete(Box::new(report.clone())));
    }

    fn on_genome_evaluated(&mut self, evaluated: usize, total: usize) {
        let _ = self.sender.send(ProgressMessage::GenomesEvaluated {
            current: evaluated,
            total,
        });
    }
}

/// Discards everything
pub struct NoopProgressCallback;

impl ProgressCallback for NoopProgressCallback {
    fn on_generation_start(&mut self, _generation: usize) {}

    fn on_generation_complete(&mut self, _report: &RunReport) {}

    fn on_genome_evaluated(&mut self, _evaluated: usize, _total: usize) {}
}
