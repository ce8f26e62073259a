use anyhow::Context;
use factorforge::config::ConfigManager;
use factorforge::engines::evaluation::SyntheticEvaluator;
use factorforge::engines::generation::{ConsoleProgressCallback, EvolutionEngine, RunStatus};
use std::path::PathBuf;
use std::sync::Arc;

const MARKET_BARS: usize = 500;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // factorforge [config.toml]
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let manager = ConfigManager::new();
    manager
        .load_layered(config_path.as_deref())
        .context("loading configuration")?;
    let config = manager.get();

    let market_seed = config.evolution.seed.unwrap_or(7);
    let evaluator = Arc::new(SyntheticEvaluator::new(market_seed, MARKET_BARS));
    let mut engine = EvolutionEngine::new(config, evaluator).context("building evolution engine")?;

    let summary = engine.run(ConsoleProgressCallback).context("evolution run failed")?;
    if summary.status == RunStatus::Cancelled {
        log::warn!("Run cancelled after {} generations", summary.generations_completed);
    }

    match &summary.champion {
        Some(champion) => {
            println!(
                "Champion {} (generation {}, fitness {:.4}, {} promotions)",
                champion.genome.id, champion.generation_promoted, champion.fitness.primary, champion.promotions
            );
            for node in champion.genome.nodes.values() {
                println!("  {} [{}] {}: {}", node.id, node.category, node.template, node.logic);
            }
        }
        None => println!("No champion was promoted"),
    }
    println!(
        "{} champion records, {} mutation outcomes, {} genomes in lineage",
        summary.champion_history.len(),
        summary.outcomes.len(),
        summary.lineage.len()
    );
    Ok(())
}
