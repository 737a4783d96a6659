//! Exchange-independent market model. Every adapter produces exactly these
//! shapes; nothing downstream of a dispatcher sees wire vocabulary.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::engine::types::{BookAction, PriceLevel};
use crate::error::{FeedError, FeedResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    Okx,
    Binance,
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exchange::Okx => write!(f, "okx"),
            Exchange::Binance => write!(f, "binance"),
        }
    }
}

/// Contract family served by one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Market {
    #[default]
    Spot,
    LinearSwap,
    InverseFutures,
}

/// (base, quote), always upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(try_from = "String")]
pub struct CanonicalPair {
    pub base: String,
    pub quote: String,
}

impl CanonicalPair {
    pub fn new(base: &str, quote: &str) -> FeedResult<Self> {
        let (base, quote) = (base.trim(), quote.trim());
        let valid = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric());
        if !valid(base) || !valid(quote) {
            return Err(FeedError::Adapter(format!("invalid currency pair {base:?}/{quote:?}")));
        }
        Ok(Self { base: base.to_ascii_uppercase(), quote: quote.to_ascii_uppercase() })
    }

    pub fn to_symbol(&self, sep: &str) -> String {
        format!("{}{}{}", self.base, sep, self.quote)
    }
}

impl FromStr for CanonicalPair {
    type Err = FeedError;

    /// Accepts `BTC-USDT`, `BTC_USDT` and `BTC/USDT`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(['-', '_', '/']);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(base), Some(quote), None) => CanonicalPair::new(base, quote),
            _ => Err(FeedError::Adapter(format!("cannot parse currency pair {s:?}"))),
        }
    }
}

impl TryFrom<String> for CanonicalPair {
    type Error = FeedError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for CanonicalPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum ContractType {
    Spot,
    /// Perpetual. Linear or inverse follows from the quote asset.
    Swap,
    /// Delivery contract, `delivery` is the `YYMMDD` settlement date.
    Futures { delivery: String },
}

impl ContractType {
    pub fn futures(delivery: &str) -> FeedResult<Self> {
        if delivery.len() != 6 || !delivery.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FeedError::Adapter(format!(
                "delivery date must be YYMMDD, got {delivery:?}"
            )));
        }
        Ok(ContractType::Futures { delivery: delivery.to_string() })
    }

    pub fn is_derivative(&self) -> bool {
        !matches!(self, ContractType::Spot)
    }
}

impl FromStr for ContractType {
    type Err = FeedError;

    /// `spot`, `swap`, or `futures:YYMMDD`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "spot" => Ok(ContractType::Spot),
            "swap" | "perp" | "perpetual" => Ok(ContractType::Swap),
            other => match other.split_once(':') {
                Some(("futures", delivery)) => ContractType::futures(delivery),
                _ => Err(FeedError::Adapter(format!("unknown contract type {s:?}"))),
            },
        }
    }
}

impl TryFrom<String> for ContractType {
    type Error = FeedError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for ContractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractType::Spot => write!(f, "spot"),
            ContractType::Swap => write!(f, "swap"),
            ContractType::Futures { delivery } => write!(f, "futures:{delivery}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum KlinePeriod {
    Min1,
    Min3,
    Min5,
    Min15,
    Min30,
    Hour1,
    Hour2,
    Hour4,
    Hour6,
    Hour12,
    Day1,
    Week1,
}

const PERIODS: [(KlinePeriod, u64, &str, &str); 12] = [
    (KlinePeriod::Min1, 60, "1m", "1m"),
    (KlinePeriod::Min3, 180, "3m", "3m"),
    (KlinePeriod::Min5, 300, "5m", "5m"),
    (KlinePeriod::Min15, 900, "15m", "15m"),
    (KlinePeriod::Min30, 1_800, "30m", "30m"),
    (KlinePeriod::Hour1, 3_600, "1H", "1h"),
    (KlinePeriod::Hour2, 7_200, "2H", "2h"),
    (KlinePeriod::Hour4, 14_400, "4H", "4h"),
    (KlinePeriod::Hour6, 21_600, "6H", "6h"),
    (KlinePeriod::Hour12, 43_200, "12H", "12h"),
    (KlinePeriod::Day1, 86_400, "1D", "1d"),
    (KlinePeriod::Week1, 604_800, "1W", "1w"),
];

impl KlinePeriod {
    fn row(&self) -> &'static (KlinePeriod, u64, &'static str, &'static str) {
        // every variant has a row
        &PERIODS[*self as usize]
    }

    pub fn seconds(&self) -> u64 {
        self.row().1
    }

    /// OKX bar suffix: `1m`, `1H`, `1D`...
    pub fn okx_bar(&self) -> &'static str {
        self.row().2
    }

    /// Binance kline interval: `1m`, `1h`, `1d`...
    pub fn binance_interval(&self) -> &'static str {
        self.row().3
    }

    pub fn from_seconds(seconds: u64) -> Option<Self> {
        PERIODS.iter().find(|row| row.1 == seconds).map(|row| row.0)
    }

    pub fn from_okx_bar(bar: &str) -> Option<Self> {
        PERIODS.iter().find(|row| row.2 == bar).map(|row| row.0)
    }

    pub fn from_binance_interval(interval: &str) -> Option<Self> {
        PERIODS.iter().find(|row| row.3 == interval).map(|row| row.0)
    }
}

impl FromStr for KlinePeriod {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KlinePeriod::from_binance_interval(s)
            .or_else(|| KlinePeriod::from_okx_bar(s))
            .or_else(|| s.parse::<u64>().ok().and_then(KlinePeriod::from_seconds))
            .ok_or_else(|| FeedError::Adapter(format!("unsupported kline period {s:?}")))
    }
}

impl TryFrom<String> for KlinePeriod {
    type Error = FeedError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for KlinePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binance_interval())
    }
}

/// What a subscription asks the venue for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Depth,
    Ticker,
    Trade,
    Candle(KlinePeriod),
}

impl ChannelKind {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelKind::Depth => "depth",
            ChannelKind::Ticker => "ticker",
            ChannelKind::Trade => "trade",
            ChannelKind::Candle(_) => "candle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ticker {
    pub pair: CanonicalPair,
    pub instrument_id: String,
    pub contract_type: ContractType,
    pub last: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub pair: CanonicalPair,
    pub instrument_id: String,
    pub contract_type: ContractType,
    pub price: f64,
    pub amount: f64,
    pub side: TradeSide,
    pub trade_id: String,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub pair: CanonicalPair,
    pub instrument_id: String,
    pub contract_type: ContractType,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub timestamp_ms: u64,
    pub period: KlinePeriod,
}

/// Book after a diff was applied: asks ascending, bids descending.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthUpdate {
    pub pair: CanonicalPair,
    pub instrument_id: String,
    pub contract_type: ContractType,
    pub asks: Vec<PriceLevel>,
    pub bids: Vec<PriceLevel>,
    pub action: BookAction,
    pub timestamp_ms: u64,
    pub possibly_stale: bool,
    pub crossed: bool,
}

impl DepthUpdate {
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionSide {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderAction {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
}

impl OrderAction {
    /// The fixed 2x2 table every derivatives venue agrees on.
    pub fn from_sides(side: OrderSide, position: PositionSide) -> Self {
        match (side, position) {
            (OrderSide::Buy, PositionSide::Long) => OrderAction::OpenLong,
            (OrderSide::Sell, PositionSide::Short) => OrderAction::OpenShort,
            (OrderSide::Sell, PositionSide::Long) => OrderAction::CloseLong,
            (OrderSide::Buy, PositionSide::Short) => OrderAction::CloseShort,
        }
    }

    pub fn sides(&self) -> (OrderSide, PositionSide) {
        match self {
            OrderAction::OpenLong => (OrderSide::Buy, PositionSide::Long),
            OrderAction::OpenShort => (OrderSide::Sell, PositionSide::Short),
            OrderAction::CloseLong => (OrderSide::Sell, PositionSide::Long),
            OrderAction::CloseShort => (OrderSide::Buy, PositionSide::Short),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Unfilled,
    PartiallyFilled,
    Filled,
    Canceled,
}
