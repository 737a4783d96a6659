// OKX v5 public market data: symbol/side/status vocabulary + frame dispatch

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info};

use super::okx_types::{WsBook, WsCandle, WsEnvelope, WsTicker, WsTrade};
use super::{unknown_side, ExchangeAdapter};
use crate::engine::types::BookAction;
use crate::error::{FeedError, FeedResult};
use crate::market_data::dispatcher::{excerpt, DispatchContext, Dispatched, ProtocolDispatcher};
use crate::market_data::events::{
    CanonicalPair, Candle, ChannelKind, ContractType, Exchange, KlinePeriod, OrderAction,
    OrderSide, OrderStatus, PositionSide, Ticker, Trade, TradeSide,
};
use crate::market_data::normaliser::{
    levels_from_tuples, parse_decimal, parse_optional_decimal, parse_timestamp, DiffBatch,
};
use crate::market_data::session::{inflate_raw, Decompressor};

pub const OKX_PUBLIC_WS: &str = "wss://ws.okx.com:8443/ws/v5/public";
const PING_EVERY: Duration = Duration::from_secs(28);

#[derive(Debug, Clone, Default)]
pub struct OkxAdapter;

impl OkxAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl ExchangeAdapter for OkxAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Okx
    }

    // one endpoint serves spot, swap and futures
    fn ws_url(&self) -> &'static str {
        OKX_PUBLIC_WS
    }

    fn heartbeat(&self) -> Option<(&'static str, Duration)> {
        Some(("ping", PING_EVERY))
    }

    // the older channels push raw-deflated binary frames
    fn decompressor(&self) -> Option<Decompressor> {
        Some(Arc::new(inflate_raw))
    }

    fn to_wire_symbol(&self, pair: &CanonicalPair, contract: &ContractType) -> FeedResult<String> {
        let base = pair.to_symbol("-");
        Ok(match contract {
            ContractType::Spot => base,
            ContractType::Swap => format!("{base}-SWAP"),
            ContractType::Futures { delivery } => format!("{base}-{delivery}"),
        })
    }

    fn from_wire_symbol(&self, symbol: &str) -> FeedResult<(CanonicalPair, ContractType)> {
        let parts: Vec<&str> = symbol.split('-').collect();
        match parts.as_slice() {
            [base, quote] => Ok((CanonicalPair::new(base, quote)?, ContractType::Spot)),
            [base, quote, "SWAP"] => Ok((CanonicalPair::new(base, quote)?, ContractType::Swap)),
            [base, quote, delivery] => {
                Ok((CanonicalPair::new(base, quote)?, ContractType::futures(delivery)?))
            }
            _ => Err(FeedError::Adapter(format!("okx: unrecognised instrument id {symbol:?}"))),
        }
    }

    fn parse_order_side(&self, side: &str) -> FeedResult<OrderSide> {
        match side.to_ascii_lowercase().as_str() {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            _ => Err(unknown_side(Exchange::Okx, "order side", side)),
        }
    }

    fn parse_position_side(&self, position_side: &str) -> FeedResult<PositionSide> {
        match position_side.to_ascii_lowercase().as_str() {
            "long" => Ok(PositionSide::Long),
            "short" => Ok(PositionSide::Short),
            _ => Err(unknown_side(Exchange::Okx, "position side", position_side)),
        }
    }

    fn wire_order_sides(&self, action: OrderAction) -> (&'static str, &'static str) {
        match action.sides() {
            (OrderSide::Buy, PositionSide::Long) => ("buy", "long"),
            (OrderSide::Sell, PositionSide::Short) => ("sell", "short"),
            (OrderSide::Sell, PositionSide::Long) => ("sell", "long"),
            (OrderSide::Buy, PositionSide::Short) => ("buy", "short"),
        }
    }

    // v5 state names, plus the numeric codes of the older API
    fn map_order_status(&self, code: &str) -> OrderStatus {
        match code {
            "live" | "0" => OrderStatus::Unfilled,
            "partially_filled" | "1" => OrderStatus::PartiallyFilled,
            "filled" | "2" => OrderStatus::Filled,
            "canceled" | "mmp_canceled" | "-1" => OrderStatus::Canceled,
            other => {
                debug!(code = other, "unknown okx order state, treating as unfilled");
                OrderStatus::Unfilled
            }
        }
    }

    fn channel_name(
        &self,
        kind: ChannelKind,
        _pair: &CanonicalPair,
        _contract: &ContractType,
    ) -> FeedResult<String> {
        Ok(match kind {
            ChannelKind::Depth => "books".to_string(),
            ChannelKind::Ticker => "tickers".to_string(),
            ChannelKind::Trade => "trades".to_string(),
            ChannelKind::Candle(period) => format!("candle{}", period.okx_bar()),
        })
    }

    fn subscribe_request(
        &self,
        kind: ChannelKind,
        pair: &CanonicalPair,
        contract: &ContractType,
    ) -> FeedResult<(String, serde_json::Value)> {
        let inst_id = self.to_wire_symbol(pair, contract)?;
        let channel = self.channel_name(kind, pair, contract)?;
        let request = json!({
            "op": "subscribe",
            "args": [{ "channel": channel, "instId": inst_id }],
        });
        Ok((inst_id, request))
    }
}

/// Which handler a channel name routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    /// `full` channels push a whole top-of-book every time.
    Depth { full: bool },
    Ticker,
    Trade,
    Candle(KlinePeriod),
}

/// Strips the older `spot/`-style prefix and `:instId` suffix, then maps the
/// bare channel name. `None` means nothing handles it.
fn classify(channel: &str) -> Option<(Route, Option<&str>)> {
    let (name, inst_id) = match channel.split_once(':') {
        Some((name, inst)) => (name, Some(inst)),
        None => (channel, None),
    };
    let name = name.rsplit('/').next().unwrap_or(name);

    let route = if let Some(bar) = name.strip_prefix("candle") {
        let period = match bar.strip_suffix('s').and_then(|secs| secs.parse::<u64>().ok()) {
            Some(secs) => KlinePeriod::from_seconds(secs),
            None => KlinePeriod::from_okx_bar(bar),
        };
        Route::Candle(period?)
    } else {
        match name {
            "tickers" | "ticker" => Route::Ticker,
            "trades" | "trade" => Route::Trade,
            "books" | "books-l2-tbt" | "books50-l2-tbt" | "depth" | "depth_l2_tbt" => {
                Route::Depth { full: false }
            }
            "books5" | "bbo-tbt" | "depth5" => Route::Depth { full: true },
            _ => return None,
        }
    };
    Some((route, inst_id))
}

/// Decodes OKX frames and drives the shared dispatch context.
pub struct OkxDispatcher {
    adapter: Arc<dyn ExchangeAdapter>,
    context: Arc<DispatchContext>,
}

impl OkxDispatcher {
    pub fn new(adapter: Arc<dyn ExchangeAdapter>, context: Arc<DispatchContext>) -> Self {
        Self { adapter, context }
    }

    fn on_event(&self, env: WsEnvelope, frame: &[u8]) -> FeedResult<Dispatched> {
        let event = env.event.unwrap_or_default();
        let channel = env.arg.map(|a| a.channel).unwrap_or_default();
        match event.as_str() {
            "subscribe" => {
                info!(exchange = "okx", %channel, "subscription confirmed");
                Ok(Dispatched::Subscribed { channel })
            }
            "error" => Err(FeedError::Protocol {
                code: env.code.unwrap_or_default(),
                message: env.msg.unwrap_or_else(|| excerpt(frame)),
            }),
            _ => {
                debug!(exchange = "okx", %event, %channel, "control event");
                Ok(Dispatched::Control { event })
            }
        }
    }

    fn on_depth(
        &self,
        inst_id: &str,
        action: Option<&str>,
        full: bool,
        books: Vec<WsBook>,
    ) -> FeedResult<Dispatched> {
        let action = if full { BookAction::Snapshot } else { BookAction::from_wire(action) };
        let (pair, contract) = self.adapter.from_wire_symbol(inst_id)?;

        // decode everything before any ladder is touched
        let decoded = books
            .iter()
            .map(|b| -> FeedResult<(DiffBatch, DiffBatch, u64)> {
                Ok((
                    levels_from_tuples(&b.asks)?,
                    levels_from_tuples(&b.bids)?,
                    parse_timestamp(&b.ts, "books.ts")?,
                ))
            })
            .collect::<FeedResult<Vec<_>>>()?;

        let mut last = Dispatched::Empty;
        for (asks, bids, ts) in decoded {
            last = self.context.apply_depth(
                inst_id,
                pair.clone(),
                contract.clone(),
                &asks,
                &bids,
                action,
                ts,
            );
        }
        Ok(last)
    }

    fn on_tickers(&self, rows: Vec<WsTicker>) -> FeedResult<Dispatched> {
        let tickers = rows
            .into_iter()
            .map(|t| -> FeedResult<Ticker> {
                let (pair, contract_type) = self.adapter.from_wire_symbol(&t.inst_id)?;
                Ok(Ticker {
                    pair,
                    contract_type,
                    last: parse_decimal(&t.last, "tickers.last")?,
                    high: parse_decimal(&t.high_24h, "tickers.high24h")?,
                    low: parse_decimal(&t.low_24h, "tickers.low24h")?,
                    volume: parse_decimal(&t.vol_24h, "tickers.vol24h")?,
                    best_bid: parse_optional_decimal(t.bid_px.as_deref(), "tickers.bidPx")?,
                    best_ask: parse_optional_decimal(t.ask_px.as_deref(), "tickers.askPx")?,
                    timestamp_ms: parse_timestamp(&t.ts, "tickers.ts")?,
                    instrument_id: t.inst_id,
                })
            })
            .collect::<FeedResult<Vec<_>>>()?;
        Ok(self.context.emit_tickers(&tickers))
    }

    fn on_trades(&self, rows: Vec<WsTrade>) -> FeedResult<Dispatched> {
        let trades = rows
            .into_iter()
            .map(|t| -> FeedResult<Trade> {
                let (pair, contract_type) = self.adapter.from_wire_symbol(&t.inst_id)?;
                let side = match t.side.as_str() {
                    "buy" => TradeSide::Buy,
                    "sell" => TradeSide::Sell,
                    other => return Err(FeedError::decode("trades.side", format!("{other:?}"))),
                };
                Ok(Trade {
                    pair,
                    contract_type,
                    price: parse_decimal(&t.px, "trades.px")?,
                    amount: parse_decimal(&t.sz, "trades.sz")?,
                    side,
                    trade_id: t.trade_id,
                    timestamp_ms: parse_timestamp(&t.ts, "trades.ts")?,
                    instrument_id: t.inst_id,
                })
            })
            .collect::<FeedResult<Vec<_>>>()?;
        Ok(self.context.emit_trades(&trades))
    }

    /// `channel_inst` comes from the subscription arg; legacy rows name their
    /// own instrument and win over it.
    fn on_candles(
        &self,
        channel_inst: Option<&str>,
        period: KlinePeriod,
        rows: Vec<WsCandle>,
    ) -> FeedResult<Dispatched> {
        let candles = rows
            .iter()
            .map(|row| -> FeedResult<Candle> {
                let inst_id = row
                    .instrument_id()
                    .or(channel_inst)
                    .ok_or_else(|| FeedError::decode("candle", "missing `instId`"))?;
                let (pair, contract_type) = self.adapter.from_wire_symbol(inst_id)?;
                let fields = row.fields();
                let [ts, open, high, low, close, volume, ..] = fields else {
                    return Err(FeedError::decode(
                        "candle",
                        format!("expected >= 6 fields, got {}", fields.len()),
                    ));
                };
                Ok(Candle {
                    pair,
                    instrument_id: inst_id.to_string(),
                    contract_type,
                    open: parse_decimal(open, "candle.open")?,
                    high: parse_decimal(high, "candle.high")?,
                    low: parse_decimal(low, "candle.low")?,
                    close: parse_decimal(close, "candle.close")?,
                    volume: parse_decimal(volume, "candle.volume")?,
                    timestamp_ms: parse_timestamp(ts, "candle.ts")?,
                    period,
                })
            })
            .collect::<FeedResult<Vec<_>>>()?;
        Ok(self.context.emit_candles(&candles))
    }
}

fn decode_data<T: DeserializeOwned>(
    channel: &str,
    data: Option<serde_json::Value>,
) -> FeedResult<Vec<T>> {
    let data = data.ok_or_else(|| FeedError::decode(channel, "missing field `data`"))?;
    serde_json::from_value(data).map_err(|e| FeedError::decode(channel, e))
}

impl ProtocolDispatcher for OkxDispatcher {
    fn dispatch(&self, frame: &[u8]) -> FeedResult<Dispatched> {
        if std::str::from_utf8(frame).map(str::trim) == Ok("pong") {
            return Ok(Dispatched::Heartbeat);
        }

        let env: WsEnvelope = serde_json::from_slice(frame)?;
        if env.event.is_some() {
            return self.on_event(env, frame);
        }

        let Some(arg) = env.arg else {
            return Err(FeedError::Classification { tag: String::new(), raw: excerpt(frame) });
        };
        let Some((route, legacy_inst)) = classify(&arg.channel) else {
            return Err(FeedError::Classification { tag: arg.channel.clone(), raw: excerpt(frame) });
        };
        let inst_id = arg.inst_id.as_deref().or(legacy_inst);
        debug!(exchange = "okx", channel = %arg.channel, inst = ?inst_id, "frame classified");

        match route {
            Route::Ticker => self.on_tickers(decode_data(&arg.channel, env.data)?),
            Route::Trade => self.on_trades(decode_data(&arg.channel, env.data)?),
            Route::Depth { full } => {
                let books = decode_data(&arg.channel, env.data)?;
                let inst_id = inst_id
                    .ok_or_else(|| FeedError::decode(arg.channel.as_str(), "missing `instId`"))?;
                self.on_depth(inst_id, env.action.as_deref(), full, books)
            }
            Route::Candle(period) => {
                self.on_candles(inst_id, period, decode_data(&arg.channel, env.data)?)
            }
        }
    }
}
