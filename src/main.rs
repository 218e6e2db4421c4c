mod engine;
mod events;
mod order;
mod sim;
mod skiplist;
mod types;

use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use crossbeam_channel::unbounded;
use tracing_subscriber::EnvFilter;

use crate::engine::MatchEngine;
use crate::sim::SimConfig;

/// Concurrent multi-symbol limit-order matching simulator.
#[derive(Parser)]
#[command(name = "tickmatch", about = "Concurrent limit-order matching engine simulator")]
struct Cli {
    /// Simulation duration in seconds
    #[arg(default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    duration: u64,

    /// Number of symbols in the trading universe
    #[arg(long, default_value_t = 1024)]
    symbols: usize,

    /// Concurrent submitter threads per batch
    #[arg(long, default_value_t = 5)]
    submitters: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tickmatch=info".parse()?))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let (tx, rx) = unbounded();
    let engine = MatchEngine::new(cli.symbols, tx);
    let reporter = thread::spawn(move || events::stdout_reporter(rx));

    let config = SimConfig {
        duration: Duration::from_secs(cli.duration),
        batch_size: cli.submitters,
    };
    sim::run(&engine, &config);
    sim::print_open_orders(&engine);

    // Dropping the engine closes the event channel and ends the reporter.
    drop(engine);
    let _ = reporter.join();
    Ok(())
}
