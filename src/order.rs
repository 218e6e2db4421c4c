use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::{Price, Quantity, Side};

/// A limit order resting in a book.
///
/// Design notes:
/// - Arc wrapper for shared ownership between the book and observers
/// - Immutable fields: side, symbol, price, original_qty, submitted_at
/// - Mutable fields: remaining_qty and the deleted flag, both atomic
/// - The deleted flag doubles as the per-order matcher-exclusion latch:
///   whoever flips it false -> true owns consumption until releasing it
#[derive(Debug)]
pub struct RestingOrder {
    /// Buy or Sell
    pub side: Side,

    /// Traded instrument, shared with the engine's registry
    pub symbol: Arc<str>,

    /// Limit price in cents
    pub price: Price,

    /// Quantity the order was submitted with, kept for reporting
    pub original_qty: Quantity,

    /// Unfilled quantity, decremented by matchers. Never rises.
    remaining_qty: AtomicU64,

    /// Logical-delete flag. True while claimed by a matcher or once drained.
    deleted: AtomicBool,

    /// Submission timestamp (milliseconds since epoch)
    pub submitted_at: u64,
}

impl RestingOrder {
    pub fn new(side: Side, symbol: Arc<str>, price: Price, quantity: Quantity) -> Self {
        let submitted_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;

        Self {
            side,
            symbol,
            price,
            original_qty: quantity,
            remaining_qty: AtomicU64::new(quantity),
            deleted: AtomicBool::new(false),
            submitted_at,
        }
    }

    /// Current unfilled quantity.
    pub fn remaining(&self) -> Quantity {
        self.remaining_qty.load(Ordering::Acquire)
    }

    /// Overwrites the unfilled quantity. Only valid before the order is
    /// published into a book, when the submitting thread still owns it
    /// exclusively.
    pub fn set_remaining(&self, quantity: Quantity) {
        self.remaining_qty.store(quantity, Ordering::Release);
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// Attempts to claim exclusive matching rights by flipping the
    /// deleted flag false -> true. Returns false if another matcher
    /// holds the claim or the order is already drained.
    pub fn try_claim(&self) -> bool {
        self.deleted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Releases a claim, returning the order to the live state. A no-op
    /// unless the flag is currently set.
    pub fn release(&self) {
        let _ = self
            .deleted
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Consumes up to `wanted` shares from the unfilled quantity.
    ///
    /// Returns the quantity actually taken, which is zero only when the
    /// order was already drained. Callers must hold the claim; the CAS
    /// loop exists because remaining_qty may still be contended by a
    /// matcher that read it just before losing the claim race.
    pub fn consume(&self, wanted: Quantity) -> Quantity {
        let mut available = self.remaining_qty.load(Ordering::Acquire);

        loop {
            if available == 0 {
                return 0;
            }

            let matched = available.min(wanted);

            match self.remaining_qty.compare_exchange_weak(
                available,
                available - matched,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return matched,
                Err(actual) => {
                    // Raced with another update, retry with the new value
                    available = actual;
                }
            }
        }
    }
}
