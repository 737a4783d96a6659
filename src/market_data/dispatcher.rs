//! Callback table and the per-exchange dispatcher seam.
//!
//! A [`ProtocolDispatcher`] turns one raw frame into zero or more typed
//! callback invocations. Callbacks run synchronously on the session's
//! receive loop, in arrival order. They must be fast: a slow callback stalls
//! heartbeats and can trip a reconnect. Hand heavy work to
//! [`crate::market_data::handoff`] instead.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::engine::types::{ApplyOutcome, BookAction, LevelDiff};
use crate::error::FeedResult;
use crate::market_data::events::{
    CanonicalPair, Candle, ChannelKind, ContractType, DepthUpdate, KlinePeriod, Ticker, Trade,
};
use crate::market_data::registry::InstrumentBookRegistry;

pub type TickerCallback = Box<dyn Fn(&Ticker) + Send + Sync>;
pub type DepthCallback = Box<dyn Fn(&DepthUpdate) + Send + Sync>;
pub type TradeCallback = Box<dyn Fn(&Trade) + Send + Sync>;
pub type CandleCallback = Box<dyn Fn(&Candle, KlinePeriod) + Send + Sync>;

#[derive(Default)]
pub struct Callbacks {
    pub ticker: Option<TickerCallback>,
    pub depth: Option<DepthCallback>,
    pub trade: Option<TradeCallback>,
    pub candle: Option<CandleCallback>,
}

impl Callbacks {
    pub fn has(&self, kind: ChannelKind) -> bool {
        match kind {
            ChannelKind::Depth => self.depth.is_some(),
            ChannelKind::Ticker => self.ticker.is_some(),
            ChannelKind::Trade => self.trade.is_some(),
            ChannelKind::Candle(_) => self.candle.is_some(),
        }
    }
}

/// What one frame turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched {
    /// Heartbeat reply, consumed silently.
    Heartbeat,
    /// Subscription acknowledged by the venue.
    Subscribed { channel: String },
    /// Other control-plane event, logged only.
    Control { event: String },
    Tickers(usize),
    Trades(usize),
    Candles(usize),
    Depth { instrument_id: String, outcome: ApplyOutcome },
    /// Well-formed but carried nothing to do (e.g. an empty data array).
    Empty,
}

/// State shared by every exchange dispatcher: the callbacks registered by
/// the session owner and the registry that holds the books.
pub struct DispatchContext {
    callbacks: RwLock<Callbacks>,
    registry: Arc<InstrumentBookRegistry>,
}

impl DispatchContext {
    pub fn new(registry: Arc<InstrumentBookRegistry>) -> Self {
        Self { callbacks: RwLock::new(Callbacks::default()), registry }
    }

    pub fn registry(&self) -> &Arc<InstrumentBookRegistry> {
        &self.registry
    }

    pub fn has_callback(&self, kind: ChannelKind) -> bool {
        self.callbacks.read().has(kind)
    }

    // Registering from inside a callback deadlocks: the dispatch loop holds
    // the read side while callbacks run.
    pub fn set_ticker(&self, f: TickerCallback) {
        self.callbacks.write().ticker = Some(f);
    }

    pub fn set_depth(&self, f: DepthCallback) {
        self.callbacks.write().depth = Some(f);
    }

    pub fn set_trade(&self, f: TradeCallback) {
        self.callbacks.write().trade = Some(f);
    }

    pub fn set_candle(&self, f: CandleCallback) {
        self.callbacks.write().candle = Some(f);
    }

    pub fn emit_tickers(&self, tickers: &[Ticker]) -> Dispatched {
        let callbacks = self.callbacks.read();
        match &callbacks.ticker {
            Some(cb) => tickers.iter().for_each(|t| cb(t)),
            None => debug!(count = tickers.len(), "tickers received without a ticker callback"),
        }
        Dispatched::Tickers(tickers.len())
    }

    pub fn emit_trades(&self, trades: &[Trade]) -> Dispatched {
        let callbacks = self.callbacks.read();
        match &callbacks.trade {
            Some(cb) => trades.iter().for_each(|t| cb(t)),
            None => debug!(count = trades.len(), "trades received without a trade callback"),
        }
        Dispatched::Trades(trades.len())
    }

    pub fn emit_candles(&self, candles: &[Candle]) -> Dispatched {
        let callbacks = self.callbacks.read();
        match &callbacks.candle {
            Some(cb) => candles.iter().for_each(|c| cb(c, c.period)),
            None => debug!(count = candles.len(), "candles received without a candle callback"),
        }
        Dispatched::Candles(candles.len())
    }

    /// The depth path: get-or-create the book, apply the already-decoded
    /// diff, export it and hand the export to the depth callback. The book
    /// lock is released before the callback runs.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_depth(
        &self,
        instrument_id: &str,
        pair: CanonicalPair,
        contract_type: ContractType,
        asks: &[LevelDiff],
        bids: &[LevelDiff],
        action: BookAction,
        timestamp_ms: u64,
    ) -> Dispatched {
        let book = self.registry.get_or_create(instrument_id, &contract_type);
        let (outcome, update) = {
            let mut book = book.lock();
            let outcome = book.apply_diff(asks, bids, action, timestamp_ms);
            let (asks, bids) = book.export(None);
            let update = DepthUpdate {
                pair,
                instrument_id: instrument_id.to_string(),
                contract_type,
                asks,
                bids,
                action,
                timestamp_ms,
                possibly_stale: book.is_possibly_stale(),
                crossed: outcome.crossed,
            };
            (outcome, update)
        };

        trace!(instrument = instrument_id, asks = update.asks.len(), bids = update.bids.len(), "depth exported");
        let callbacks = self.callbacks.read();
        match &callbacks.depth {
            Some(cb) => cb(&update),
            None => debug!(instrument = instrument_id, "depth applied without a depth callback"),
        }
        Dispatched::Depth { instrument_id: instrument_id.to_string(), outcome }
    }
}

/// Frame text for error reports, cut at a char boundary.
pub(crate) fn excerpt(frame: &[u8]) -> String {
    const LIMIT: usize = 256;
    let text = String::from_utf8_lossy(frame);
    match text.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.into_owned(),
    }
}

/// One implementation per wire protocol.
pub trait ProtocolDispatcher: Send + Sync {
    /// Handle one inbound frame. Errors are local to the frame; the caller
    /// reports them and keeps receiving.
    fn dispatch(&self, frame: &[u8]) -> FeedResult<Dispatched>;
}
