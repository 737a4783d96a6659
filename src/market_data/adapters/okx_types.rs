// Source: wss://ws.okx.com:8443/ws/v5/public (books, tickers, trades, candle*)
// Aliases cover the older `spot/…`, `swap/…`, `futures/…` channel payloads.
use serde::Deserialize;

// Outer envelope: either {arg, action?, data} or {event, arg?, code?, msg?}
#[derive(Debug, Deserialize)]
pub struct WsEnvelope {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub arg: Option<WsArg>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    // decoded per channel once the channel is known
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct WsArg {
    pub channel: String,
    #[serde(rename = "instId", default)]
    pub inst_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WsBook {
    pub asks: Vec<Vec<String>>, // [px, sz, liquidated (unused), numOrders]
    pub bids: Vec<Vec<String>>,
    #[serde(alias = "timestamp")]
    pub ts: String, // epoch millis, RFC 3339 on the older channels
}

#[derive(Debug, Deserialize)]
pub struct WsTicker {
    #[serde(rename = "instId", alias = "instrument_id")]
    pub inst_id: String,
    pub last: String,
    #[serde(rename = "askPx", alias = "best_ask", default)]
    pub ask_px: Option<String>,
    #[serde(rename = "bidPx", alias = "best_bid", default)]
    pub bid_px: Option<String>,
    #[serde(rename = "high24h", alias = "high_24h")]
    pub high_24h: String,
    #[serde(rename = "low24h", alias = "low_24h")]
    pub low_24h: String,
    #[serde(rename = "vol24h", alias = "volume_24h", alias = "base_volume_24h")]
    pub vol_24h: String,
    #[serde(alias = "timestamp")]
    pub ts: String,
}

#[derive(Debug, Deserialize)]
pub struct WsTrade {
    #[serde(rename = "instId", alias = "instrument_id")]
    pub inst_id: String,
    #[serde(rename = "tradeId", alias = "trade_id")]
    pub trade_id: String,
    #[serde(alias = "price")]
    pub px: String,
    #[serde(alias = "size", alias = "qty")]
    pub sz: String,
    pub side: String, // taker side: "buy" | "sell"
    #[serde(alias = "timestamp")]
    pub ts: String,
}

/// v5 rows are positional: `[ts, o, h, l, c, vol, volCcy, volCcyQuote, confirm]`.
/// The older channels wrap the same order (RFC 3339 ts) in an object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum WsCandle {
    Row(Vec<String>),
    Legacy { candle: Vec<String>, instrument_id: String },
}

impl WsCandle {
    pub fn fields(&self) -> &[String] {
        match self {
            WsCandle::Row(row) => row,
            WsCandle::Legacy { candle, .. } => candle,
        }
    }

    pub fn instrument_id(&self) -> Option<&str> {
        match self {
            WsCandle::Row(_) => None,
            WsCandle::Legacy { instrument_id, .. } => Some(instrument_id),
        }
    }
}
