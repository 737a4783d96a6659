// Shared trait for exchange vocabularies + the per-venue implementations

use std::sync::Arc;
use std::time::Duration;

use crate::error::{FeedError, FeedResult};
use crate::market_data::dispatcher::{DispatchContext, ProtocolDispatcher};
use crate::market_data::events::{
    CanonicalPair, ChannelKind, ContractType, Exchange, Market, OrderAction, OrderSide, OrderStatus,
    PositionSide,
};
use crate::market_data::session::Decompressor;

/// Translation between the canonical model and one exchange's wire
/// vocabulary. Adding a venue means adding an implementation; the
/// dispatcher seam and the book never change.
pub trait ExchangeAdapter: Send + Sync {
    fn exchange(&self) -> Exchange;

    /// Public market-data endpoint for this adapter's market.
    fn ws_url(&self) -> &'static str;

    /// Text heartbeat the venue expects from the client, if any.
    fn heartbeat(&self) -> Option<(&'static str, Duration)> {
        None
    }

    /// Inflater for venues that push compressed binary frames.
    fn decompressor(&self) -> Option<Decompressor> {
        None
    }

    fn to_wire_symbol(&self, pair: &CanonicalPair, contract: &ContractType) -> FeedResult<String>;

    fn from_wire_symbol(&self, symbol: &str) -> FeedResult<(CanonicalPair, ContractType)>;

    fn parse_order_side(&self, side: &str) -> FeedResult<OrderSide>;

    fn parse_position_side(&self, position_side: &str) -> FeedResult<PositionSide>;

    /// buy+long -> open long, sell+short -> open short, sell+long -> close
    /// long, buy+short -> close short.
    fn map_order_side(&self, side: &str, position_side: &str) -> FeedResult<OrderAction> {
        Ok(OrderAction::from_sides(
            self.parse_order_side(side)?,
            self.parse_position_side(position_side)?,
        ))
    }

    /// Inverse of [`map_order_side`](Self::map_order_side), in wire strings.
    fn wire_order_sides(&self, action: OrderAction) -> (&'static str, &'static str);

    /// Unknown codes fall back to `Unfilled`.
    fn map_order_status(&self, code: &str) -> OrderStatus;

    fn channel_name(
        &self,
        kind: ChannelKind,
        pair: &CanonicalPair,
        contract: &ContractType,
    ) -> FeedResult<String>;

    /// Returns the instrument id and the full request object to hand to the
    /// transport. Fails before anything is sent.
    fn subscribe_request(
        &self,
        kind: ChannelKind,
        pair: &CanonicalPair,
        contract: &ContractType,
    ) -> FeedResult<(String, serde_json::Value)>;
}

pub(crate) fn unknown_side(exchange: Exchange, what: &str, raw: &str) -> FeedError {
    FeedError::Adapter(format!("{exchange}: unknown {what} {raw:?}"))
}

/// Adapter for one exchange/market session.
pub fn adapter_for(exchange: Exchange, market: Market) -> Arc<dyn ExchangeAdapter> {
    match exchange {
        Exchange::Okx => Arc::new(okx::OkxAdapter::new()),
        Exchange::Binance => Arc::new(binance::BinanceAdapter::new(market)),
    }
}

/// Dispatcher speaking `exchange`'s wire protocol.
pub fn dispatcher_for(
    exchange: Exchange,
    adapter: Arc<dyn ExchangeAdapter>,
    context: Arc<DispatchContext>,
) -> Arc<dyn ProtocolDispatcher> {
    match exchange {
        Exchange::Okx => Arc::new(okx::OkxDispatcher::new(adapter, context)),
        Exchange::Binance => Arc::new(binance::BinanceDispatcher::new(adapter, context)),
    }
}

pub mod binance;
pub mod binance_types;
pub mod okx;
pub mod okx_types;
