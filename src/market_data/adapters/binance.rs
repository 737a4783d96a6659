// Binance combined streams for spot, USDⓈ-M and COIN-M futures

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info};

use super::binance_types::{
    DepthEvent, KlineEvent, PartialDepthEvent, TickerEvent, TradeEvent, WsHeader,
};
use super::{unknown_side, ExchangeAdapter};
use crate::engine::types::BookAction;
use crate::error::{FeedError, FeedResult};
use crate::market_data::dispatcher::{excerpt, DispatchContext, Dispatched, ProtocolDispatcher};
use crate::market_data::events::{
    CanonicalPair, Candle, ChannelKind, ContractType, Exchange, KlinePeriod, Market, OrderAction,
    OrderSide, OrderStatus, PositionSide, Ticker, Trade, TradeSide,
};
use crate::market_data::normaliser::{
    levels_from_pairs, now_millis, parse_decimal, parse_optional_decimal,
};

// Combined endpoints wrap every payload as {"stream", "data"}, which is the
// only place a spot partial-depth frame names its symbol.
pub const BINANCE_SPOT_WS: &str = "wss://stream.binance.com:9443/stream";
pub const BINANCE_USDM_WS: &str = "wss://fstream.binance.com/stream";
pub const BINANCE_COINM_WS: &str = "wss://dstream.binance.com/stream";

// Longer suffixes first so "FDUSD" and "TUSD" win over "USD".
const QUOTE_ASSETS: [&str; 14] = [
    "FDUSD", "USDT", "USDC", "TUSD", "BUSD", "USDP", "USD", "DAI", "EUR", "TRY", "BRL", "BTC", "ETH",
    "BNB",
];

#[derive(Debug, Clone)]
pub struct BinanceAdapter {
    market: Market,
}

impl BinanceAdapter {
    pub fn new(market: Market) -> Self {
        Self { market }
    }

    pub fn market(&self) -> Market {
        self.market
    }

    fn split_symbol(symbol: &str) -> FeedResult<CanonicalPair> {
        QUOTE_ASSETS
            .iter()
            .find_map(|quote| {
                symbol
                    .strip_suffix(quote)
                    .filter(|base| !base.is_empty())
                    .map(|base| CanonicalPair::new(base, quote))
            })
            .unwrap_or_else(|| {
                Err(FeedError::Adapter(format!("binance: no known quote asset in {symbol:?}")))
            })
    }

    fn unsupported(&self, contract: &ContractType) -> FeedError {
        FeedError::Adapter(format!("binance {:?} market has no {contract} contracts", self.market))
    }

    // fixed per kind so a repeated request is byte-identical
    fn request_id(kind: ChannelKind) -> u64 {
        match kind {
            ChannelKind::Depth => 1,
            ChannelKind::Ticker => 2,
            ChannelKind::Trade => 3,
            ChannelKind::Candle(_) => 4,
        }
    }
}

impl ExchangeAdapter for BinanceAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    fn ws_url(&self) -> &'static str {
        match self.market {
            Market::Spot => BINANCE_SPOT_WS,
            Market::LinearSwap => BINANCE_USDM_WS,
            Market::InverseFutures => BINANCE_COINM_WS,
        }
    }

    fn to_wire_symbol(&self, pair: &CanonicalPair, contract: &ContractType) -> FeedResult<String> {
        let symbol = pair.to_symbol("");
        match (self.market, contract) {
            (Market::Spot, ContractType::Spot) => Ok(symbol),
            (Market::LinearSwap, ContractType::Swap) => Ok(symbol),
            (Market::LinearSwap | Market::InverseFutures, ContractType::Futures { delivery }) => {
                Ok(format!("{symbol}_{delivery}"))
            }
            (Market::InverseFutures, ContractType::Swap) => Ok(format!("{symbol}_PERP")),
            _ => Err(self.unsupported(contract)),
        }
    }

    fn from_wire_symbol(&self, symbol: &str) -> FeedResult<(CanonicalPair, ContractType)> {
        let symbol = symbol.to_ascii_uppercase();
        let (root, contract) = match symbol.split_once('_') {
            Some((root, "PERP")) => (root, ContractType::Swap),
            Some((root, delivery)) => (root, ContractType::futures(delivery)?),
            None if self.market == Market::Spot => (symbol.as_str(), ContractType::Spot),
            None => (symbol.as_str(), ContractType::Swap),
        };
        Ok((Self::split_symbol(root)?, contract))
    }

    fn parse_order_side(&self, side: &str) -> FeedResult<OrderSide> {
        match side.to_ascii_uppercase().as_str() {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            _ => Err(unknown_side(Exchange::Binance, "order side", side)),
        }
    }

    fn parse_position_side(&self, position_side: &str) -> FeedResult<PositionSide> {
        match position_side.to_ascii_uppercase().as_str() {
            "LONG" => Ok(PositionSide::Long),
            "SHORT" => Ok(PositionSide::Short),
            _ => Err(unknown_side(Exchange::Binance, "position side", position_side)),
        }
    }

    fn wire_order_sides(&self, action: OrderAction) -> (&'static str, &'static str) {
        let (side, position) = action.sides();
        let side = match side {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        };
        let position = match position {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        };
        (side, position)
    }

    fn map_order_status(&self, code: &str) -> OrderStatus {
        match code {
            "NEW" => OrderStatus::Unfilled,
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "FILLED" => OrderStatus::Filled,
            "CANCELED" | "EXPIRED" | "EXPIRED_IN_MATCH" | "REJECTED" => OrderStatus::Canceled,
            other => {
                debug!(code = other, "unknown binance order status, treating as unfilled");
                OrderStatus::Unfilled
            }
        }
    }

    fn channel_name(
        &self,
        kind: ChannelKind,
        pair: &CanonicalPair,
        contract: &ContractType,
    ) -> FeedResult<String> {
        let stream = self.to_wire_symbol(pair, contract)?.to_ascii_lowercase();
        Ok(match kind {
            // top 20 levels, pushed whole every 100ms
            ChannelKind::Depth => format!("{stream}@depth20@100ms"),
            ChannelKind::Ticker => format!("{stream}@ticker"),
            ChannelKind::Trade => format!("{stream}@aggTrade"),
            ChannelKind::Candle(period) => format!("{stream}@kline_{}", period.binance_interval()),
        })
    }

    fn subscribe_request(
        &self,
        kind: ChannelKind,
        pair: &CanonicalPair,
        contract: &ContractType,
    ) -> FeedResult<(String, serde_json::Value)> {
        let symbol = self.to_wire_symbol(pair, contract)?;
        let stream = self.channel_name(kind, pair, contract)?;
        let request = json!({
            "method": "SUBSCRIBE",
            "params": [stream],
            "id": Self::request_id(kind),
        });
        Ok((symbol, request))
    }
}

/// `btcusdt@depth20@100ms` -> `btcusdt`. Diff streams (`@depth`) are `None`.
fn partial_depth_symbol(stream: &str) -> Option<&str> {
    let (symbol, rest) = stream.split_once('@')?;
    let levels = rest.strip_prefix("depth")?.split('@').next()?;
    matches!(levels, "5" | "10" | "20").then_some(symbol)
}

/// Payload of a frame, either the frame itself or the `data` of a combined
/// stream wrapper.
enum Body<'a> {
    Raw(&'a [u8]),
    Wrapped(serde_json::Value),
}

impl Body<'_> {
    fn decode<T: DeserializeOwned>(self, event: &str) -> FeedResult<T> {
        let decoded = match self {
            Body::Raw(bytes) => serde_json::from_slice(bytes),
            Body::Wrapped(value) => serde_json::from_value(value),
        };
        decoded.map_err(|e| FeedError::decode(event, e))
    }
}

pub struct BinanceDispatcher {
    adapter: Arc<dyn ExchangeAdapter>,
    context: Arc<DispatchContext>,
}

impl BinanceDispatcher {
    pub fn new(adapter: Arc<dyn ExchangeAdapter>, context: Arc<DispatchContext>) -> Self {
        Self { adapter, context }
    }

    fn on_control(&self, header: WsHeader, frame: &[u8]) -> FeedResult<Dispatched> {
        if let Some(err) = header.error {
            return Err(FeedError::Protocol { code: err.code.to_string(), message: err.msg });
        }
        if let (Some(code), Some(msg)) = (header.code, header.msg) {
            return Err(FeedError::Protocol { code: code.to_string(), message: msg });
        }
        match header.id {
            Some(id) => {
                info!(exchange = "binance", id, "request acknowledged");
                Ok(Dispatched::Subscribed { channel: format!("request {id}") })
            }
            None => Err(FeedError::Classification { tag: String::new(), raw: excerpt(frame) }),
        }
    }

    /// Partial depth replaces the whole book every push.
    fn on_partial_depth(
        &self,
        stream_symbol: &str,
        ev: PartialDepthEvent,
    ) -> FeedResult<Dispatched> {
        let symbol = ev.symbol.unwrap_or_else(|| stream_symbol.to_ascii_uppercase());
        let (pair, contract) = self.adapter.from_wire_symbol(&symbol)?;
        let asks = levels_from_pairs(&ev.asks)?;
        let bids = levels_from_pairs(&ev.bids)?;
        debug!(%symbol, last = ?ev.last_update_id, "partial depth snapshot");
        Ok(self.context.apply_depth(
            &symbol,
            pair,
            contract,
            &asks,
            &bids,
            BookAction::Snapshot,
            ev.event_time.unwrap_or_else(now_millis),
        ))
    }

    // Raw diffs never seed a book; it stays possibly stale until a snapshot.
    fn on_depth(&self, ev: DepthEvent) -> FeedResult<Dispatched> {
        let (pair, contract) = self.adapter.from_wire_symbol(&ev.symbol)?;
        let asks = levels_from_pairs(&ev.asks)?;
        let bids = levels_from_pairs(&ev.bids)?;
        debug!(symbol = %ev.symbol, first = ?ev.first_update_id, last = ?ev.final_update_id, "depth diff");
        Ok(self.context.apply_depth(
            &ev.symbol,
            pair,
            contract,
            &asks,
            &bids,
            BookAction::Update,
            ev.event_time,
        ))
    }

    fn on_ticker(&self, ev: TickerEvent) -> FeedResult<Dispatched> {
        let (pair, contract_type) = self.adapter.from_wire_symbol(&ev.symbol)?;
        let ticker = Ticker {
            pair,
            contract_type,
            last: parse_decimal(&ev.last, "ticker.c")?,
            high: parse_decimal(&ev.high, "ticker.h")?,
            low: parse_decimal(&ev.low, "ticker.l")?,
            volume: parse_decimal(&ev.volume, "ticker.v")?,
            best_bid: parse_optional_decimal(ev.best_bid.as_deref(), "ticker.b")?,
            best_ask: parse_optional_decimal(ev.best_ask.as_deref(), "ticker.a")?,
            timestamp_ms: ev.event_time,
            instrument_id: ev.symbol,
        };
        Ok(self.context.emit_tickers(std::slice::from_ref(&ticker)))
    }

    fn on_trade(&self, ev: TradeEvent) -> FeedResult<Dispatched> {
        let (pair, contract_type) = self.adapter.from_wire_symbol(&ev.symbol)?;
        let trade_id = ev
            .agg_id
            .or(ev.trade_id)
            .ok_or_else(|| FeedError::decode("trade", "missing trade id"))?;
        let trade = Trade {
            pair,
            contract_type,
            price: parse_decimal(&ev.price, "trade.p")?,
            amount: parse_decimal(&ev.qty, "trade.q")?,
            // buyer was the maker, so the taker sold
            side: if ev.buyer_is_maker { TradeSide::Sell } else { TradeSide::Buy },
            trade_id: trade_id.to_string(),
            timestamp_ms: ev.trade_time,
            instrument_id: ev.symbol,
        };
        Ok(self.context.emit_trades(std::slice::from_ref(&trade)))
    }

    fn on_kline(&self, ev: KlineEvent) -> FeedResult<Dispatched> {
        let (pair, contract_type) = self.adapter.from_wire_symbol(&ev.symbol)?;
        let k = ev.kline;
        let period = KlinePeriod::from_binance_interval(&k.interval)
            .ok_or_else(|| FeedError::decode("kline.i", format!("{:?}", k.interval)))?;
        let candle = Candle {
            pair,
            contract_type,
            open: parse_decimal(&k.open, "kline.o")?,
            high: parse_decimal(&k.high, "kline.h")?,
            low: parse_decimal(&k.low, "kline.l")?,
            close: parse_decimal(&k.close, "kline.c")?,
            volume: parse_decimal(&k.volume, "kline.v")?,
            timestamp_ms: k.open_time,
            period,
            instrument_id: ev.symbol,
        };
        Ok(self.context.emit_candles(std::slice::from_ref(&candle)))
    }
}

impl ProtocolDispatcher for BinanceDispatcher {
    fn dispatch(&self, frame: &[u8]) -> FeedResult<Dispatched> {
        let mut header: WsHeader = serde_json::from_slice(frame)?;

        let (event, body) = match (header.stream.take(), header.data.take()) {
            (Some(stream), Some(data)) => {
                debug!(exchange = "binance", %stream, "combined stream frame");
                // futures partial frames also say "depthUpdate", so the stream decides
                if let Some(symbol) = partial_depth_symbol(&stream) {
                    return self.on_partial_depth(symbol, Body::Wrapped(data).decode(&stream)?);
                }
                let Some(event) = data.get("e").and_then(|e| e.as_str()).map(str::to_string) else {
                    return Err(FeedError::Classification { tag: stream, raw: excerpt(frame) });
                };
                (event, Body::Wrapped(data))
            }
            _ => match header.event.take() {
                Some(event) => (event, Body::Raw(frame)),
                None => return self.on_control(header, frame),
            },
        };

        match event.as_str() {
            "depthUpdate" => self.on_depth(body.decode(&event)?),
            "24hrTicker" | "24hrMiniTicker" => self.on_ticker(body.decode(&event)?),
            "aggTrade" | "trade" => self.on_trade(body.decode(&event)?),
            "kline" => self.on_kline(body.decode(&event)?),
            _ => Err(FeedError::Classification { tag: event, raw: excerpt(frame) }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(base: &str, quote: &str) -> CanonicalPair {
        CanonicalPair::new(base, quote).unwrap()
    }

    #[test]
    fn symbols_per_market() {
        let spot = BinanceAdapter::new(Market::Spot);
        assert_eq!(spot.to_wire_symbol(&pair("BTC", "USDT"), &ContractType::Spot).unwrap(), "BTCUSDT");
        assert_eq!(
            spot.from_wire_symbol("ETHBTC").unwrap(),
            (pair("ETH", "BTC"), ContractType::Spot)
        );
        assert!(spot.to_wire_symbol(&pair("BTC", "USDT"), &ContractType::Swap).is_err());

        let usdm = BinanceAdapter::new(Market::LinearSwap);
        assert_eq!(usdm.to_wire_symbol(&pair("BTC", "USDT"), &ContractType::Swap).unwrap(), "BTCUSDT");
        assert_eq!(
            usdm.from_wire_symbol("BTCUSDT").unwrap(),
            (pair("BTC", "USDT"), ContractType::Swap)
        );

        let coinm = BinanceAdapter::new(Market::InverseFutures);
        let quarterly = ContractType::futures("250627").unwrap();
        assert_eq!(coinm.to_wire_symbol(&pair("BTC", "USD"), &ContractType::Swap).unwrap(), "BTCUSD_PERP");
        assert_eq!(coinm.to_wire_symbol(&pair("BTC", "USD"), &quarterly).unwrap(), "BTCUSD_250627");
        assert_eq!(coinm.from_wire_symbol("BTCUSD_250627").unwrap(), (pair("BTC", "USD"), quarterly));
        assert_eq!(
            coinm.from_wire_symbol("ETHUSD_PERP").unwrap(),
            (pair("ETH", "USD"), ContractType::Swap)
        );
    }

    #[test]
    fn quote_split_prefers_longest_suffix() {
        let spot = BinanceAdapter::new(Market::Spot);
        assert_eq!(spot.from_wire_symbol("BTCFDUSD").unwrap().0, pair("BTC", "FDUSD"));
        assert_eq!(spot.from_wire_symbol("solusdc").unwrap().0, pair("SOL", "USDC"));
        assert!(spot.from_wire_symbol("USDT").is_err());
        assert!(spot.from_wire_symbol("XYZABC").is_err());
        assert_eq!(spot.from_wire_symbol("BTCTUSD").unwrap().0, pair("BTC", "TUSD"));
        assert_eq!(spot.from_wire_symbol("ETHDAI").unwrap().0, pair("ETH", "DAI"));
        assert_eq!(spot.from_wire_symbol("BTCTRY").unwrap().0, pair("BTC", "TRY"));
    }

    #[test]
    fn partial_depth_streams_are_recognised() {
        assert_eq!(partial_depth_symbol("btcusdt@depth20@100ms"), Some("btcusdt"));
        assert_eq!(partial_depth_symbol("btcusd_perp@depth5"), Some("btcusd_perp"));
        assert_eq!(partial_depth_symbol("btcusdt@depth@100ms"), None);
        assert_eq!(partial_depth_symbol("btcusdt@depth"), None);
        assert_eq!(partial_depth_symbol("btcusdt@aggTrade"), None);
    }

    #[test]
    fn binance_frames_are_never_compressed() {
        assert!(BinanceAdapter::new(Market::Spot).decompressor().is_none());
    }

    #[test]
    fn sides_and_statuses() {
        let b = BinanceAdapter::new(Market::LinearSwap);
        assert_eq!(b.map_order_side("SELL", "LONG").unwrap(), OrderAction::CloseLong);
        assert_eq!(b.map_order_side("buy", "short").unwrap(), OrderAction::CloseShort);
        assert!(b.map_order_side("BUY", "BOTH").is_err());
        assert_eq!(b.wire_order_sides(OrderAction::OpenShort), ("SELL", "SHORT"));
        assert_eq!(b.map_order_status("EXPIRED"), OrderStatus::Canceled);
        assert_eq!(b.map_order_status("PENDING_NEW"), OrderStatus::Unfilled);
    }

    #[test]
    fn subscribe_requests_are_stable() {
        let b = BinanceAdapter::new(Market::Spot);
        let btc = pair("BTC", "USDT");
        let (symbol, req) = b
            .subscribe_request(ChannelKind::Candle(KlinePeriod::Min15), &btc, &ContractType::Spot)
            .unwrap();
        assert_eq!(symbol, "BTCUSDT");
        assert_eq!(req, json!({"method": "SUBSCRIBE", "params": ["btcusdt@kline_15m"], "id": 4}));

        let again = b
            .subscribe_request(ChannelKind::Candle(KlinePeriod::Min15), &btc, &ContractType::Spot)
            .unwrap();
        assert_eq!(req, again.1);
        assert_eq!(
            b.channel_name(ChannelKind::Depth, &btc, &ContractType::Spot).unwrap(),
            "btcusdt@depth20@100ms"
        );
    }
}
