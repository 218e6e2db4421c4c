use std::fmt;
use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::types::{Dollars, Price, Quantity, Side};

/// A single fill between an incoming order and a resting order.
#[derive(Debug, Clone)]
pub struct MatchEvent {
    pub symbol: Arc<str>,
    pub quantity: Quantity,
    /// Trade price: the resting order's limit, so price improvement
    /// accrues to the taker.
    pub price: Price,
    pub taker_side: Side,
    pub taker_price: Price,
    pub taker_remaining: Quantity,
    pub taker_original: Quantity,
    /// Pre-rendered line describing what is left of the resting order.
    pub resting_note: String,
}

impl fmt::Display for MatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "MATCHED: {} shares of {} at ${}",
            self.quantity,
            self.symbol,
            Dollars(self.price)
        )?;
        writeln!(
            f,
            "  {} ORDER: {}/{} left for {} @ {}",
            self.taker_side,
            self.taker_remaining,
            self.taker_original,
            self.symbol,
            Dollars(self.taker_price)
        )?;
        f.write_str(&self.resting_note)
    }
}

/// Prints match events until every sender is gone.
pub fn stdout_reporter(events: Receiver<MatchEvent>) {
    for event in events {
        println!("{event}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_event_report_format() {
        let event = MatchEvent {
            symbol: Arc::from("TICK3"),
            quantity: 30,
            price: 900,
            taker_side: Side::Buy,
            taker_price: 1000,
            taker_remaining: 70,
            taker_original: 100,
            resting_note: "  SELL ORDER: 0/30 left for TICK3 @ 9.00".to_string(),
        };

        assert_eq!(
            event.to_string(),
            "MATCHED: 30 shares of TICK3 at $9.00\n\
             \x20 BUY ORDER: 70/100 left for TICK3 @ 10.00\n\
             \x20 SELL ORDER: 0/30 left for TICK3 @ 9.00"
        );
    }
}
