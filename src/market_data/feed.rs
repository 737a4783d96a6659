//! Per-session public API: register callbacks, then subscribe.
//!
//! Each subscribe method fails fast, before the transport sees anything,
//! when the matching callback is missing or the adapter cannot name the
//! instrument.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{info, trace, warn};

use crate::config::FeedSettings;
use crate::error::{FeedError, FeedResult};
use crate::market_data::adapters::{adapter_for, dispatcher_for, ExchangeAdapter};
use crate::market_data::dispatcher::{DispatchContext, Dispatched, ProtocolDispatcher};
use crate::market_data::events::{
    CanonicalPair, Candle, ChannelKind, ContractType, DepthUpdate, Exchange, KlinePeriod, Ticker,
    Trade,
};
use crate::market_data::registry::InstrumentBookRegistry;
use crate::market_data::session::{FrameHandler, Transport, WsSession};

/// One accepted subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub kind: ChannelKind,
    pub instrument: String,
    pub request: Value,
}

pub struct MarketFeed<T: Transport = WsSession> {
    adapter: Arc<dyn ExchangeAdapter>,
    context: Arc<DispatchContext>,
    dispatcher: Arc<dyn ProtocolDispatcher>,
    transport: T,
    subscriptions: Mutex<Vec<Subscription>>,
}

/// Wraps a dispatcher into the transport's frame handler. Per-frame errors
/// are logged and counted here and never reach the connection loop.
pub fn frame_handler(exchange: Exchange, dispatcher: Arc<dyn ProtocolDispatcher>) -> FrameHandler {
    Arc::new(move |frame: &[u8]| {
        metrics::counter!("lobx_feed_frames_total").increment(1);
        match dispatcher.dispatch(frame) {
            Ok(outcome) => trace!(%exchange, ?outcome, "frame dispatched"),
            Err(e) => {
                warn!(%exchange, kind = e.kind(), error = %e, "dropping frame");
                metrics::counter!("lobx_feed_frame_errors_total", "kind" => e.kind()).increment(1);
            }
        }
    })
}

impl MarketFeed<WsSession> {
    /// Builds the adapter, dispatcher and WebSocket session for `settings`.
    /// The connection opens on the first subscribe.
    pub fn connect(settings: &FeedSettings, registry: Arc<InstrumentBookRegistry>) -> FeedResult<Self> {
        settings.validate()?;
        let adapter = adapter_for(settings.exchange, settings.market);
        let context = Arc::new(DispatchContext::new(Arc::clone(&registry)));
        let dispatcher = dispatcher_for(settings.exchange, Arc::clone(&adapter), Arc::clone(&context));

        let mut builder = WsSession::builder(settings.resolved_ws_url())
            .auto_reconnect(settings.auto_reconnect)
            .reconnect_policy(settings.reconnect.policy())
            .on_reconnect(Arc::new(move || {
                registry.mark_all_stale();
            }));
        if let Some((payload, venue_default)) = adapter.heartbeat() {
            let every = settings.heartbeat_interval().unwrap_or(venue_default);
            builder = builder.heartbeat(payload, every);
        }
        if let Some(inflate) = adapter.decompressor() {
            builder = builder.decompress(inflate);
        }
        let session = builder.build(frame_handler(settings.exchange, Arc::clone(&dispatcher)));

        info!(
            exchange = %settings.exchange,
            market = ?settings.market,
            url = session.url(),
            "feed session built"
        );
        Ok(Self::assemble(adapter, context, dispatcher, session))
    }
}

impl<T: Transport> MarketFeed<T> {
    /// Feed over any transport, e.g. a recording one in tests.
    pub fn with_transport(
        adapter: Arc<dyn ExchangeAdapter>,
        context: Arc<DispatchContext>,
        transport: T,
    ) -> Self {
        let dispatcher = dispatcher_for(adapter.exchange(), Arc::clone(&adapter), Arc::clone(&context));
        Self::assemble(adapter, context, dispatcher, transport)
    }

    fn assemble(
        adapter: Arc<dyn ExchangeAdapter>,
        context: Arc<DispatchContext>,
        dispatcher: Arc<dyn ProtocolDispatcher>,
        transport: T,
    ) -> Self {
        Self { adapter, context, dispatcher, transport, subscriptions: Mutex::new(Vec::new()) }
    }

    pub fn on_ticker<F>(&self, f: F)
    where
        F: Fn(&Ticker) + Send + Sync + 'static,
    {
        self.context.set_ticker(Box::new(f));
    }

    pub fn on_depth<F>(&self, f: F)
    where
        F: Fn(&DepthUpdate) + Send + Sync + 'static,
    {
        self.context.set_depth(Box::new(f));
    }

    pub fn on_trade<F>(&self, f: F)
    where
        F: Fn(&Trade) + Send + Sync + 'static,
    {
        self.context.set_trade(Box::new(f));
    }

    pub fn on_candle<F>(&self, f: F)
    where
        F: Fn(&Candle, KlinePeriod) + Send + Sync + 'static,
    {
        self.context.set_candle(Box::new(f));
    }

    pub fn subscribe_depth(&self, pair: &CanonicalPair, contract: &ContractType) -> FeedResult<()> {
        self.subscribe(ChannelKind::Depth, pair, contract)
    }

    pub fn subscribe_ticker(&self, pair: &CanonicalPair, contract: &ContractType) -> FeedResult<()> {
        self.subscribe(ChannelKind::Ticker, pair, contract)
    }

    pub fn subscribe_trade(&self, pair: &CanonicalPair, contract: &ContractType) -> FeedResult<()> {
        self.subscribe(ChannelKind::Trade, pair, contract)
    }

    pub fn subscribe_candle(
        &self,
        pair: &CanonicalPair,
        contract: &ContractType,
        period: KlinePeriod,
    ) -> FeedResult<()> {
        self.subscribe(ChannelKind::Candle(period), pair, contract)
    }

    pub fn subscribe(&self, kind: ChannelKind, pair: &CanonicalPair, contract: &ContractType) -> FeedResult<()> {
        if !self.context.has_callback(kind) {
            return Err(FeedError::Configuration(format!(
                "no {} callback registered before subscribing {pair} {contract}",
                kind.name()
            )));
        }
        let (instrument, request) = self.adapter.subscribe_request(kind, pair, contract)?;
        self.transport.subscribe(&request)?;

        let mut subs = self.subscriptions.lock();
        if subs.iter().any(|s| s.request == request) {
            return Ok(());
        }
        info!(
            exchange = %self.adapter.exchange(),
            channel = kind.name(),
            %instrument,
            "subscribed"
        );
        subs.push(Subscription { kind, instrument, request });
        Ok(())
    }

    /// Runs one frame through the dispatcher, bypassing the transport.
    pub fn handle_frame(&self, frame: &[u8]) -> FeedResult<Dispatched> {
        self.dispatcher.dispatch(frame)
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.lock().clone()
    }

    pub fn adapter(&self) -> &Arc<dyn ExchangeAdapter> {
        &self.adapter
    }

    pub fn registry(&self) -> &Arc<InstrumentBookRegistry> {
        self.context.registry()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}
