use tracing::{debug, instrument, trace, warn};

use crate::engine::ladder::PriceLadder;
use crate::engine::types::{ApplyOutcome, BookAction, BookSide, LevelDiff, PriceLevel};
use crate::market_data::events::ContractType;

/// Live L2 state for one instrument, rebuilt from snapshot/diff messages.
///
/// Asks are read lowest-first and bids highest-first on export. Diffs for one
/// instrument must be applied in arrival order; the registry hands out one
/// shared snapshot per instrument and the session applies frames sequentially.
///
/// Until the first full snapshot lands the book only knows the levels that
/// changed since the subscription, so diffs applied before it leave the book
/// flagged possibly stale.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBookSnapshot {
    instrument_id: String,
    contract_type: ContractType,
    asks: PriceLadder,
    bids: PriceLadder,
    last_update_ms: u64,
    last_action: BookAction,
    updates_applied: u64,
    possibly_stale: bool,
    seeded: bool,
    crossed: bool,
}

impl OrderBookSnapshot {
    pub fn new(instrument_id: impl Into<String>, contract_type: ContractType) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            contract_type,
            asks: PriceLadder::new(),
            bids: PriceLadder::new(),
            last_update_ms: 0,
            last_action: BookAction::Update,
            updates_applied: 0,
            possibly_stale: false,
            seeded: false,
            crossed: false,
        }
    }

    /// Apply one decoded diff. Every tuple was validated by the decoder, so
    /// this cannot fail halfway through and leave a half-applied message.
    ///
    /// A `Snapshot` action wipes both ladders first and clears the stale flag.
    #[instrument(level = "trace", skip(self, asks, bids), fields(instrument = %self.instrument_id))]
    pub fn apply_diff(
        &mut self,
        asks: &[LevelDiff],
        bids: &[LevelDiff],
        action: BookAction,
        ts_ms: u64,
    ) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();

        if action == BookAction::Snapshot {
            debug!(instrument = %self.instrument_id, "full snapshot, rebuilding ladders");
            self.asks.clear();
            self.bids.clear();
            self.possibly_stale = false;
            self.seeded = true;
        } else if !self.seeded {
            self.possibly_stale = true;
        }

        Self::apply_side(&mut self.asks, asks, &mut outcome);
        Self::apply_side(&mut self.bids, bids, &mut outcome);

        self.last_action = action;
        self.last_update_ms = ts_ms;
        self.updates_applied += 1;

        outcome.crossed = self.check_crossed();
        self.crossed = outcome.crossed;
        trace!(
            upserted = outcome.upserted,
            removed = outcome.removed,
            asks = self.asks.len(),
            bids = self.bids.len(),
            "diff applied"
        );
        outcome
    }

    fn apply_side(ladder: &mut PriceLadder, diffs: &[LevelDiff], outcome: &mut ApplyOutcome) {
        for diff in diffs {
            if diff.is_removal() {
                ladder.delete(&diff.key);
                outcome.removed += 1;
            } else {
                ladder.upsert(diff.key, diff.amount, diff.order_count);
                outcome.upserted += 1;
            }
        }
    }

    // best bid >= best ask means a diff was missed somewhere upstream
    fn check_crossed(&self) -> bool {
        let (Some(bid), Some(ask)) = (self.best_bid(), self.best_ask()) else {
            return false;
        };
        if bid.price >= ask.price {
            warn!(
                instrument = %self.instrument_id,
                best_bid = bid.price,
                best_ask = ask.price,
                "crossed book after diff, a message was probably missed"
            );
            metrics::counter!("lobx_feed_book_crossed_total", "instrument" => self.instrument_id.clone())
                .increment(1);
            return true;
        }
        false
    }

    /// Materialize both sides: asks ascending, bids descending. Pure read.
    pub fn export(&self, depth: Option<usize>) -> (Vec<PriceLevel>, Vec<PriceLevel>) {
        let limit = depth.unwrap_or(usize::MAX);
        let asks = self.asks.iter_ascending().take(limit).copied().collect();
        let bids = self.bids.iter_descending().take(limit).copied().collect();
        (asks, bids)
    }

    pub fn ladder(&self, side: BookSide) -> &PriceLadder {
        match side {
            BookSide::Bid => &self.bids,
            BookSide::Ask => &self.asks,
        }
    }

    pub fn best_bid(&self) -> Option<PriceLevel> {
        self.bids.highest().copied()
    }

    pub fn best_ask(&self) -> Option<PriceLevel> {
        self.asks.lowest().copied()
    }

    pub fn spread(&self) -> Option<f64> {
        Some(self.best_ask()?.price - self.best_bid()?.price)
    }

    /// Set when the transport reconnected after this book was last refreshed
    /// by a full snapshot; diffs may have been lost in the gap.
    pub fn mark_stale(&mut self) {
        self.possibly_stale = true;
    }

    pub fn is_possibly_stale(&self) -> bool {
        self.possibly_stale
    }

    /// Whether a full snapshot has been applied at least once.
    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    pub fn is_crossed(&self) -> bool {
        self.crossed
    }

    pub fn instrument_id(&self) -> &str {
        &self.instrument_id
    }

    pub fn contract_type(&self) -> &ContractType {
        &self.contract_type
    }

    pub fn last_update_ms(&self) -> u64 {
        self.last_update_ms
    }

    pub fn last_action(&self) -> BookAction {
        self.last_action
    }

    pub fn updates_applied(&self) -> u64 {
        self.updates_applied
    }
}
