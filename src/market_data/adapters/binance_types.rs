// Source: Binance spot / USDⓈ-M / COIN-M combined streams
// (<symbol>@depth20@100ms, @depth, @ticker, @aggTrade, @kline_<i>)
use serde::Deserialize;

// Just enough of any frame to route it
#[derive(Debug, Deserialize)]
pub struct WsHeader {
    #[serde(rename = "e", default)]
    pub event: Option<String>,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub error: Option<WsError>,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub msg: Option<String>,
    // combined-stream wrapper: {"stream": "...", "data": {...}}
    #[serde(default)]
    pub stream: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct WsError {
    pub code: i64,
    pub msg: String,
}

#[derive(Debug, Deserialize)]
pub struct DepthEvent {
    #[serde(rename = "E")]
    pub event_time: u64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "U", default)]
    pub first_update_id: Option<u64>,
    #[serde(rename = "u", default)]
    pub final_update_id: Option<u64>,
    #[serde(rename = "b")]
    pub bids: Vec<[String; 2]>, // [price, qty]
    #[serde(rename = "a")]
    pub asks: Vec<[String; 2]>,
}

// Partial book depth: spot sends {lastUpdateId, bids, asks}, futures add
// e/E/s and use the short b/a keys.
#[derive(Debug, Deserialize)]
pub struct PartialDepthEvent {
    #[serde(rename = "E", default)]
    pub event_time: Option<u64>,
    #[serde(rename = "s", default)]
    pub symbol: Option<String>,
    #[serde(rename = "lastUpdateId", alias = "u", default)]
    pub last_update_id: Option<u64>,
    #[serde(alias = "b")]
    pub bids: Vec<[String; 2]>,
    #[serde(alias = "a")]
    pub asks: Vec<[String; 2]>,
}

// 24hrTicker and 24hrMiniTicker; futures tickers carry no b/a
#[derive(Debug, Deserialize)]
pub struct TickerEvent {
    #[serde(rename = "E")]
    pub event_time: u64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c")]
    pub last: String,
    #[serde(rename = "h")]
    pub high: String,
    #[serde(rename = "l")]
    pub low: String,
    #[serde(rename = "v")]
    pub volume: String,
    #[serde(rename = "b", default)]
    pub best_bid: Option<String>,
    #[serde(rename = "a", default)]
    pub best_ask: Option<String>,
}

// aggTrade carries "a", raw trade carries "t"
#[derive(Debug, Deserialize)]
pub struct TradeEvent {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "a", default)]
    pub agg_id: Option<u64>,
    #[serde(rename = "t", default)]
    pub trade_id: Option<u64>,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "q")]
    pub qty: String,
    #[serde(rename = "T")]
    pub trade_time: u64,
    #[serde(rename = "m")]
    pub buyer_is_maker: bool,
}

#[derive(Debug, Deserialize)]
pub struct KlineEvent {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "k")]
    pub kline: Kline,
}

#[derive(Debug, Deserialize)]
pub struct Kline {
    #[serde(rename = "t")]
    pub open_time: u64,
    #[serde(rename = "i")]
    pub interval: String,
    #[serde(rename = "o")]
    pub open: String,
    #[serde(rename = "h")]
    pub high: String,
    #[serde(rename = "l")]
    pub low: String,
    #[serde(rename = "c")]
    pub close: String,
    #[serde(rename = "v")]
    pub volume: String,
}
