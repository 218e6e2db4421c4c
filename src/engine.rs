//! Matching orchestrator over per-symbol book pairs.
//!
//! Every incoming order is crossed against the opposite-side index until
//! it is filled or nothing crosses, the touched index is swept, and any
//! residual quantity rests on the order's own side.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::{debug, trace};

use crate::events::MatchEvent;
use crate::order::RestingOrder;
use crate::skiplist::PriceIndex;
use crate::types::{EngineError, Price, Quantity, Side};

/// The two price-ordered indexes for one symbol.
struct Book {
    /// Buy orders, highest price at the front.
    bids: PriceIndex,
    /// Sell orders, lowest price at the front.
    asks: PriceIndex,
}

impl Book {
    fn new() -> Self {
        Self {
            bids: PriceIndex::new(false),
            asks: PriceIndex::new(true),
        }
    }
}

/// Multi-symbol matching engine.
///
/// The symbol universe is fixed at construction (`TICK0..TICKn`); books
/// for different symbols share nothing, so submissions on distinct
/// symbols never contend. All methods take `&self`: synchronization
/// lives entirely in the order records and index pointers.
pub struct MatchEngine {
    books: Vec<Book>,
    symbols: Vec<Arc<str>>,
    index_by_symbol: HashMap<Arc<str>, usize>,
    events: Sender<MatchEvent>,
}

impl MatchEngine {
    pub fn new(num_symbols: usize, events: Sender<MatchEvent>) -> Self {
        let symbols: Vec<Arc<str>> = (0..num_symbols)
            .map(|i| Arc::from(format!("TICK{i}")))
            .collect();
        let index_by_symbol = symbols
            .iter()
            .enumerate()
            .map(|(i, symbol)| (Arc::clone(symbol), i))
            .collect();
        let books = (0..num_symbols).map(|_| Book::new()).collect();

        Self {
            books,
            symbols,
            index_by_symbol,
            events,
        }
    }

    /// The trading universe, in registry order.
    pub fn symbols(&self) -> &[Arc<str>] {
        &self.symbols
    }

    /// Submits an order: match against the opposite side first, then
    /// rest any residual on the order's own side.
    ///
    /// Returns true when the order fully crossed or its residual was
    /// inserted; false only if the residual insert was rejected as a
    /// duplicate record. Invalid input is reported as an error before
    /// any book is touched.
    pub fn submit(
        &self,
        side: Side,
        symbol: &str,
        quantity: Quantity,
        price: Price,
    ) -> Result<bool, EngineError> {
        if quantity == 0 {
            return Err(EngineError::InvalidQuantity(quantity));
        }
        if price == 0 {
            return Err(EngineError::InvalidPrice(price));
        }
        let idx = *self
            .index_by_symbol
            .get(symbol)
            .ok_or_else(|| EngineError::UnknownSymbol(symbol.to_string()))?;

        let order = Arc::new(RestingOrder::new(
            side,
            Arc::clone(&self.symbols[idx]),
            price,
            quantity,
        ));

        let remaining = self.match_incoming(&order, idx);
        if remaining == 0 {
            return Ok(true);
        }

        order.set_remaining(remaining);
        debug!(symbol, %side, remaining, price, "residual rests on the book");
        let book = &self.books[idx];
        let inserted = match side {
            Side::Buy => book.bids.insert(order),
            Side::Sell => book.asks.insert(order),
        };
        Ok(inserted)
    }

    /// Crosses `taker` against the opposite-side index and returns its
    /// unfilled quantity.
    fn match_incoming(&self, taker: &Arc<RestingOrder>, idx: usize) -> Quantity {
        let book = &self.books[idx];
        let limit = taker.price;
        match taker.side {
            Side::Buy => self.drain_contra(&book.asks, |p| p <= limit, taker),
            Side::Sell => self.drain_contra(&book.bids, |p| p >= limit, taker),
        }
    }

    /// One matching pass: consume resting orders one at a time until the
    /// taker is filled or nothing crosses, then sweep the index drained
    /// by this pass.
    fn drain_contra<P>(&self, contra: &PriceIndex, crosses: P, taker: &Arc<RestingOrder>) -> Quantity
    where
        P: Fn(Price) -> bool,
    {
        let mut remaining = taker.remaining();

        while remaining > 0 {
            let hit = contra.find_and_consume(&crosses, remaining);
            if hit.quantity == 0 {
                break;
            }
            remaining -= hit.quantity;
            trace!(symbol = %taker.symbol, quantity = hit.quantity, price = hit.price, "crossed");

            // Trade price is the resting order's limit: price improvement
            // goes to the taker.
            let event = MatchEvent {
                symbol: Arc::clone(&taker.symbol),
                quantity: hit.quantity,
                price: hit.price,
                taker_side: taker.side,
                taker_price: taker.price,
                taker_remaining: remaining,
                taker_original: taker.original_qty,
                resting_note: hit.resting_note.unwrap_or_default(),
            };
            let _ = self.events.send(event);
        }

        contra.sweep_deleted();
        remaining
    }

    /// Live (bids, asks) for one symbol, for reporting and inspection.
    pub fn open_orders(
        &self,
        symbol: &str,
    ) -> Option<(Vec<Arc<RestingOrder>>, Vec<Arc<RestingOrder>>)> {
        let idx = *self.index_by_symbol.get(symbol)?;
        let book = &self.books[idx];
        Some((book.bids.live_orders(), book.asks.live_orders()))
    }
}
