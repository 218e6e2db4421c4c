//! Concurrent price-ordered index over resting orders.
//!
//! A lock-free skip list keyed by price, ascending for the ask book and
//! descending for the bid book. Matching walks level 0 only; upper levels
//! exist to keep the insert search logarithmic. Orders leave in two
//! phases: a matcher drains one and leaves its deleted flag set, and a
//! later [`PriceIndex::sweep_deleted`] unlinks the node from every level
//! and hands it to the epoch collector.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use rand::Rng;

use crate::order::RestingOrder;
use crate::types::{Dollars, Price, Quantity};

/// Highest tower a node can reach; the head sentinel always carries
/// `MAX_LEVEL + 1` forward slots.
pub const MAX_LEVEL: usize = 32;

struct Node {
    /// The resting order, or None for the head sentinel.
    order: Option<Arc<RestingOrder>>,

    /// Forward pointers, one per level up to the node's drawn height.
    next: Vec<Atomic<Node>>,

    /// Set once the inserting thread has spliced every level. The sweep
    /// must not retire a node whose inserter may still touch it.
    link_done: AtomicBool,

    /// Claimed by the one sweeper allowed to unlink and retire this node.
    reclaimed: AtomicBool,
}

impl Node {
    fn new(order: Option<Arc<RestingOrder>>, level: usize) -> Self {
        Self {
            order,
            next: (0..=level).map(|_| Atomic::null()).collect(),
            link_done: AtomicBool::new(false),
            reclaimed: AtomicBool::new(false),
        }
    }
}

/// Outcome of one [`PriceIndex::find_and_consume`] call. At most one
/// resting order is consumed per call; the orchestrator loops.
#[derive(Debug)]
pub struct MatchResult {
    pub quantity: Quantity,
    pub price: Price,
    /// Rendered description of what is left of the consumed order.
    pub resting_note: Option<String>,
}

impl MatchResult {
    fn none() -> Self {
        Self {
            quantity: 0,
            price: 0,
            resting_note: None,
        }
    }
}

/// One side of a book: a skip list of resting orders ordered by price in
/// the matching direction.
pub struct PriceIndex {
    head: Node,
    ascending: bool,
    max_level: usize,
}

impl PriceIndex {
    /// Ascending order holds asks (lowest price at the front),
    /// descending holds bids.
    pub fn new(ascending: bool) -> Self {
        Self::with_max_level(ascending, MAX_LEVEL)
    }

    pub fn with_max_level(ascending: bool, max_level: usize) -> Self {
        Self {
            head: Node::new(None, max_level),
            ascending,
            max_level,
        }
    }

    /// Draws a tower height by fair coin flips, capped at the index
    /// maximum. Mean height is ~1.
    fn random_level(&self) -> usize {
        let mut rng = rand::thread_rng();
        let mut level = 0;
        while level < self.max_level && rng.gen_bool(0.5) {
            level += 1;
        }
        level
    }

    /// Whether a resting order at `resting` price sorts strictly before
    /// an order at `incoming` price in this index's direction.
    fn precedes(&self, resting: Price, incoming: Price) -> bool {
        if self.ascending {
            resting < incoming
        } else {
            resting > incoming
        }
    }

    fn resting_label(&self) -> &'static str {
        if self.ascending {
            "SELL"
        } else {
            "BUY"
        }
    }

    /// Links an order into the index.
    ///
    /// Returns false if this exact order record is already present.
    /// Duplicate detection is record identity, never price equality:
    /// distinct orders at the same price all coexist.
    ///
    /// The splice CASes each level and re-walks forward on failure, so a
    /// node retired by a concurrent sweep can never be spliced back in.
    pub fn insert(&self, order: Arc<RestingOrder>) -> bool {
        let guard = &epoch::pin();
        let level = self.random_level();
        let price = order.price;

        // Search phase: record the insertion predecessor at every level.
        let mut update: Vec<&Node> = vec![&self.head; self.max_level + 1];
        let mut current: &Node = &self.head;
        for i in (0..=self.max_level).rev() {
            loop {
                let next = current.next[i].load(Ordering::Acquire, guard);
                let Some(next_node) = (unsafe { next.as_ref() }) else {
                    break;
                };
                let Some(resting) = next_node.order.as_ref() else {
                    break;
                };
                if Arc::ptr_eq(resting, &order) {
                    return false;
                }
                if self.precedes(resting.price, price) {
                    current = next_node;
                } else {
                    break;
                }
            }
            update[i] = current;
        }

        // Splice phase, bottom-up. The level-0 link publishes the order
        // to matchers; upper levels only speed up later searches.
        let node = Owned::new(Node::new(Some(order), level)).into_shared(guard);
        for i in 0..=level {
            let mut pred = update[i];
            loop {
                if pred.reclaimed.load(Ordering::Acquire) {
                    // The recorded predecessor was retired under us;
                    // re-walk this level from the front.
                    pred = &self.head;
                }
                let succ = pred.next[i].load(Ordering::Acquire, guard);
                if let Some(succ_node) = unsafe { succ.as_ref() } {
                    // A concurrent insert may have spliced ahead of us.
                    if succ_node
                        .order
                        .as_ref()
                        .is_some_and(|o| self.precedes(o.price, price))
                    {
                        pred = succ_node;
                        continue;
                    }
                }
                unsafe { node.deref() }.next[i].store(succ, Ordering::Release);
                if pred.next[i]
                    .compare_exchange(succ, node, Ordering::AcqRel, Ordering::Acquire, guard)
                    .is_ok()
                {
                    break;
                }
            }
        }
        unsafe { node.deref() }.link_done.store(true, Ordering::Release);
        true
    }

    /// Walks level 0 best-price-first and consumes up to `wanted` shares
    /// from the first live order whose price satisfies `crosses`.
    ///
    /// Nodes wearing the deleted flag are stepped over: either a peer
    /// matcher holds the claim this instant or the order is drained and
    /// waiting for a sweep. The walk stops at the first unclaimed order
    /// that fails the predicate, since no later node can cross in a
    /// price-ordered index.
    pub fn find_and_consume<P>(&self, crosses: P, wanted: Quantity) -> MatchResult
    where
        P: Fn(Price) -> bool,
    {
        if wanted == 0 {
            return MatchResult::none();
        }

        let guard = &epoch::pin();
        let mut current = self.head.next[0].load(Ordering::Acquire, guard);

        while let Some(node) = unsafe { current.as_ref() } {
            if let Some(order) = node.order.as_ref() {
                if !order.is_deleted() {
                    if !crosses(order.price) {
                        break;
                    }
                    if order.try_claim() {
                        let matched = order.consume(wanted);
                        if matched > 0 {
                            let left = order.remaining();
                            if left > 0 {
                                // Partial slice: the order stays live.
                                order.release();
                            }
                            return MatchResult {
                                quantity: matched,
                                price: order.price,
                                resting_note: Some(format!(
                                    "  {} ORDER: {}/{} left for {} @ {}",
                                    self.resting_label(),
                                    left,
                                    order.original_qty,
                                    order.symbol,
                                    Dollars(order.price),
                                )),
                            };
                        }
                        // Claimed an already-drained order: keep the flag
                        // set so the sweep picks the node up.
                    }
                    // Lost the claim race: the node is being consumed by a
                    // peer, keep walking rather than giving up the pass.
                }
            }
            current = node.next[0].load(Ordering::Acquire, guard);
        }

        MatchResult::none()
    }

    /// Physically unlinks every drained node, single pass over level 0.
    ///
    /// Each removal re-walks the list once per level to find the current
    /// predecessor; sweeps are maintenance work run after a matching
    /// pass, not a hot path. Safe to call from any number of threads:
    /// the per-node reclaimed flag elects a single retiring sweeper.
    pub fn sweep_deleted(&self) {
        let guard = &epoch::pin();
        let mut prev: &Node = &self.head;
        let mut current = prev.next[0].load(Ordering::Acquire, guard);

        while let Some(node) = unsafe { current.as_ref() } {
            let retirable = node.order.as_ref().is_some_and(|o| o.is_deleted())
                && node.link_done.load(Ordering::Acquire)
                && node
                    .reclaimed
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok();

            if retirable {
                self.unlink(node, current, guard);
                unsafe { guard.defer_destroy(current) };
                current = prev.next[0].load(Ordering::Acquire, guard);
            } else {
                prev = node;
                current = node.next[0].load(Ordering::Acquire, guard);
            }
        }
    }

    /// Removes `node` from every level it occupies, top level first so
    /// that a concurrent search never descends through a half-removed
    /// tower.
    ///
    /// The unlink CAS can succeed against a predecessor that a peer
    /// sweeper retired in the same instant, which removes nothing, so a
    /// level is only finished once a fresh walk from the head no longer
    /// reaches the node.
    fn unlink<'g>(&self, node: &Node, target: Shared<'g, Node>, guard: &'g Guard) {
        for level in (0..node.next.len()).rev() {
            loop {
                let mut pred: &Node = &self.head;
                let mut cursor = pred.next[level].load(Ordering::Acquire, guard);
                let mut found = false;
                while let Some(candidate) = unsafe { cursor.as_ref() } {
                    if std::ptr::eq(candidate, node) {
                        found = true;
                        break;
                    }
                    pred = candidate;
                    cursor = candidate.next[level].load(Ordering::Acquire, guard);
                }
                if !found {
                    break;
                }
                let succ = node.next[level].load(Ordering::Acquire, guard);
                let _ = pred.next[level].compare_exchange(
                    target,
                    succ,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    guard,
                );
            }
        }
    }

    /// Snapshot of the live orders in list order, for reporting. Orders
    /// that are claimed, drained, or mid-removal are skipped.
    pub fn live_orders(&self) -> Vec<Arc<RestingOrder>> {
        let guard = &epoch::pin();
        let mut out = Vec::new();
        let mut current = self.head.next[0].load(Ordering::Acquire, guard);

        while let Some(node) = unsafe { current.as_ref() } {
            if let Some(order) = node.order.as_ref() {
                if !order.is_deleted() && order.remaining() > 0 {
                    out.push(Arc::clone(order));
                }
            }
            current = node.next[0].load(Ordering::Acquire, guard);
        }
        out
    }
}

impl Drop for PriceIndex {
    fn drop(&mut self) {
        // All reachable nodes are freed through the level-0 chain; nodes
        // already retired by a sweep were unlinked first.
        unsafe {
            let guard = epoch::unprotected();
            let mut current = self.head.next[0].load(Ordering::Relaxed, guard);
            while !current.is_null() {
                let next = current.deref().next[0].load(Ordering::Relaxed, guard);
                drop(current.into_owned());
                current = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;
    use std::sync::Barrier;
    use std::thread;

    fn ask(price: Price, quantity: Quantity) -> Arc<RestingOrder> {
        Arc::new(RestingOrder::new(
            Side::Sell,
            Arc::from("TICK0"),
            price,
            quantity,
        ))
    }

    /// Level-0 node count including logically deleted nodes.
    fn physical_len(index: &PriceIndex) -> usize {
        let guard = &epoch::pin();
        let mut count = 0;
        let mut current = index.head.next[0].load(Ordering::Acquire, guard);
        while let Some(node) = unsafe { current.as_ref() } {
            count += 1;
            current = node.next[0].load(Ordering::Acquire, guard);
        }
        count
    }

    #[test]
    fn test_ascending_orders_by_price() {
        let index = PriceIndex::new(true);
        for price in [1200, 900, 1000, 950] {
            assert!(index.insert(ask(price, 10)));
        }

        let prices: Vec<Price> = index.live_orders().iter().map(|o| o.price).collect();
        assert_eq!(prices, vec![900, 950, 1000, 1200]);
    }

    #[test]
    fn test_descending_orders_by_price() {
        let index = PriceIndex::new(false);
        for price in [900, 1200, 1000] {
            assert!(index.insert(ask(price, 10)));
        }

        let prices: Vec<Price> = index.live_orders().iter().map(|o| o.price).collect();
        assert_eq!(prices, vec![1200, 1000, 900]);
    }

    #[test]
    fn test_duplicate_record_rejected() {
        let index = PriceIndex::new(true);
        let order = ask(1000, 50);

        assert!(index.insert(Arc::clone(&order)));
        assert!(!index.insert(Arc::clone(&order)));

        // Same price, different record: not a duplicate
        assert!(index.insert(ask(1000, 50)));
        assert_eq!(index.live_orders().len(), 2);
    }

    #[test]
    fn test_consume_from_empty_index() {
        let index = PriceIndex::new(true);
        let result = index.find_and_consume(|p| p <= 1000, 100);
        assert_eq!(result.quantity, 0);
        assert!(result.resting_note.is_none());
    }

    #[test]
    fn test_zero_wanted_consumes_nothing() {
        let index = PriceIndex::new(true);
        let order = ask(1000, 50);
        index.insert(Arc::clone(&order));

        let result = index.find_and_consume(|p| p <= 1000, 0);
        assert_eq!(result.quantity, 0);
        assert!(!order.is_deleted());
        assert_eq!(order.remaining(), 50);
    }

    #[test]
    fn test_non_crossing_price_ends_walk() {
        let index = PriceIndex::new(true);
        let order = ask(1200, 50);
        index.insert(Arc::clone(&order));

        let result = index.find_and_consume(|p| p <= 1000, 100);
        assert_eq!(result.quantity, 0);
        assert!(!order.is_deleted());
        assert_eq!(order.remaining(), 50);
    }

    #[test]
    fn test_exact_consume_drains_and_marks() {
        let index = PriceIndex::new(true);
        let order = ask(1000, 50);
        index.insert(Arc::clone(&order));

        let result = index.find_and_consume(|p| p <= 1000, 50);
        assert_eq!(result.quantity, 50);
        assert_eq!(result.price, 1000);
        assert!(order.is_deleted());
        assert_eq!(order.remaining(), 0);
        assert!(index.live_orders().is_empty());
    }

    #[test]
    fn test_partial_consume_releases_claim() {
        let index = PriceIndex::new(true);
        let order = ask(1000, 200);
        index.insert(Arc::clone(&order));

        let result = index.find_and_consume(|p| p <= 1000, 75);
        assert_eq!(result.quantity, 75);
        assert_eq!(order.remaining(), 125);
        assert!(!order.is_deleted());
        assert_eq!(
            result.resting_note.unwrap(),
            "  SELL ORDER: 125/200 left for TICK0 @ 10.00"
        );
    }

    #[test]
    fn test_walks_over_claimed_node() {
        let index = PriceIndex::new(true);
        let held = ask(900, 50);
        let open = ask(950, 50);
        index.insert(Arc::clone(&held));
        index.insert(Arc::clone(&open));

        // A peer matcher holds the best-priced node mid-consumption.
        assert!(held.try_claim());

        let result = index.find_and_consume(|p| p <= 1000, 100);
        assert_eq!(result.quantity, 50);
        assert_eq!(result.price, 950);
        assert_eq!(held.remaining(), 50);
    }

    #[test]
    fn test_best_price_consumed_first() {
        let index = PriceIndex::new(true);
        index.insert(ask(1200, 50));
        index.insert(ask(900, 50));

        let first = index.find_and_consume(|p| p <= 1000, 100);
        assert_eq!(first.quantity, 50);
        assert_eq!(first.price, 900);

        // The 12.00 ask does not cross; the drained 9.00 node is a ghost.
        let second = index.find_and_consume(|p| p <= 1000, 50);
        assert_eq!(second.quantity, 0);
    }

    #[test]
    fn test_sweep_unlinks_and_is_idempotent() {
        let index = PriceIndex::new(true);
        index.insert(ask(900, 50));
        index.insert(ask(1000, 80));

        let result = index.find_and_consume(|p| p <= 900, 50);
        assert_eq!(result.quantity, 50);
        assert_eq!(physical_len(&index), 2);

        index.sweep_deleted();
        assert_eq!(physical_len(&index), 1);
        assert_eq!(index.live_orders().len(), 1);

        index.sweep_deleted();
        assert_eq!(physical_len(&index), 1);
        assert_eq!(index.live_orders().len(), 1);
    }

    #[test]
    fn test_sweep_on_clean_index_is_noop() {
        let index = PriceIndex::new(true);
        index.insert(ask(900, 50));
        index.sweep_deleted();
        assert_eq!(physical_len(&index), 1);
    }

    #[test]
    fn test_concurrent_inserts_stay_sorted() {
        let index = PriceIndex::new(true);
        let threads = 8;
        let per_thread = 25;
        let barrier = Barrier::new(threads);

        thread::scope(|scope| {
            for t in 0..threads {
                let index = &index;
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    for i in 0..per_thread {
                        let price = 1000 + (t * per_thread + i) as Price;
                        index.insert(ask(price, 10));
                    }
                });
            }
        });

        let prices: Vec<Price> = index.live_orders().iter().map(|o| o.price).collect();
        assert_eq!(prices.len(), threads * per_thread);
        assert!(prices.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_concurrent_consumers_drain_exactly() {
        let index = PriceIndex::new(true);
        let order = ask(1000, 100);
        index.insert(Arc::clone(&order));

        let threads = 4;
        let barrier = Barrier::new(threads);
        let mut taken = Vec::new();

        thread::scope(|scope| {
            let handles: Vec<_> = (0..threads)
                .map(|_| {
                    let index = &index;
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        index.find_and_consume(|p| p <= 1000, 30).quantity
                    })
                })
                .collect();
            for handle in handles {
                taken.push(handle.join().unwrap());
            }
        });

        // A consumer that loses the claim race may walk away empty, but
        // every consumed share comes off the same ledger exactly once.
        let total: Quantity = taken.iter().sum();
        assert!(total <= 100);
        assert_eq!(total + order.remaining(), 100);
    }
}
