//! Random-load simulation driver and end-of-run reporting.

use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::{info, warn};

use crate::engine::MatchEngine;
use crate::types::{Dollars, Price, Quantity, Side};

pub struct SimConfig {
    pub duration: Duration,
    /// Concurrent submitter threads per batch.
    pub batch_size: usize,
}

/// Runs batches of concurrent random submissions until the deadline.
/// Each batch is joined before the next starts, with a short random
/// pause between batches to mimic gaps between bursts of flow.
pub fn run(engine: &MatchEngine, config: &SimConfig) {
    info!(
        seconds = config.duration.as_secs(),
        submitters = config.batch_size,
        symbols = engine.symbols().len(),
        "starting trading simulation"
    );

    let deadline = Instant::now() + config.duration;
    let mut batches: u64 = 0;

    while Instant::now() < deadline {
        thread::scope(|scope| {
            for _ in 0..config.batch_size {
                scope.spawn(|| submit_random(engine));
            }
        });
        batches += 1;

        let pause = rand::thread_rng().gen_range(100..=300);
        thread::sleep(Duration::from_millis(pause));
    }

    info!(batches, "simulation complete");
}

fn submit_random(engine: &MatchEngine) {
    let mut rng = rand::thread_rng();
    let side = if rng.gen_bool(0.5) {
        Side::Buy
    } else {
        Side::Sell
    };
    let symbols = engine.symbols();
    let symbol = &symbols[rng.gen_range(0..symbols.len())];
    let (quantity, price) = random_order(&mut rng);

    match engine.submit(side, symbol, quantity, price) {
        Ok(_) => info!(%side, quantity, %symbol, price = %Dollars(price), "order added"),
        Err(err) => warn!(%err, "order rejected"),
    }
}

/// Quantity uniform in [100, 1000]; price drawn from a $10-$100 base
/// with a +/-2% jitter, rounded to cents.
fn random_order<R: Rng>(rng: &mut R) -> (Quantity, Price) {
    let quantity = rng.gen_range(100..=1000);
    let base = rng.gen_range(10.0..100.0_f64);
    let jitter = rng.gen_range(0.98..1.02_f64);
    let price = (base * jitter * 100.0).round() as Price;
    (quantity, price)
}

/// Dumps every symbol's surviving orders after the run.
pub fn print_open_orders(engine: &MatchEngine) {
    println!("\nRemaining orders in the book:");

    for symbol in engine.symbols() {
        let Some((bids, asks)) = engine.open_orders(symbol) else {
            continue;
        };
        if bids.is_empty() && asks.is_empty() {
            continue;
        }

        println!("\nTicker: {symbol}");
        if !bids.is_empty() {
            println!("  Buy Orders:");
            for order in &bids {
                println!(
                    "    {}/{} shares @ ${}",
                    order.remaining(),
                    order.original_qty,
                    Dollars(order.price)
                );
            }
        }
        if !asks.is_empty() {
            println!("  Sell Orders:");
            for order in &asks {
                println!(
                    "    {}/{} shares @ ${}",
                    order.remaining(),
                    order.original_qty,
                    Dollars(order.price)
                );
            }
        }
    }
}
