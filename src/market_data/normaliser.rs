// Convert wire strings into numbers and level diffs.
// Every failure is a decode error for the one message being handled.

use smallvec::SmallVec;

use crate::engine::ladder::PriceKey;
use crate::engine::types::LevelDiff;
use crate::error::{FeedError, FeedResult};

/// Diff batches are usually a handful of levels.
pub type DiffBatch = SmallVec<[LevelDiff; 16]>;

pub fn parse_decimal(raw: &str, field: &str) -> FeedResult<f64> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|e| FeedError::decode(field, format!("{raw:?}: {e}")))?;
    if !value.is_finite() {
        return Err(FeedError::decode(field, format!("{raw:?} is not finite")));
    }
    Ok(value)
}

/// Level sizes: zero is a removal, below zero is garbage.
pub fn parse_amount(raw: &str, field: &str) -> FeedResult<f64> {
    let value = parse_decimal(raw, field)?;
    if value < 0.0 {
        return Err(FeedError::decode(field, format!("{raw:?} is negative")));
    }
    Ok(value)
}

/// Venues send `""` for fields that have no value yet (e.g. an empty side).
pub fn parse_optional_decimal(raw: Option<&str>, field: &str) -> FeedResult<Option<f64>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => parse_decimal(s, field).map(Some),
    }
}

pub fn parse_count(raw: &str, field: &str) -> FeedResult<u64> {
    raw.trim()
        .parse()
        .map_err(|e| FeedError::decode(field, format!("{raw:?}: {e}")))
}

/// Millisecond epoch timestamps arrive as strings on some venues.
pub fn parse_millis(raw: &str, field: &str) -> FeedResult<u64> {
    parse_count(raw, field)
}

/// Epoch millis (`"1700000000000"`) or an RFC 3339 instant
/// (`"2019-04-16T10:49:00.000Z"`, older OKX channels).
pub fn parse_timestamp(raw: &str, field: &str) -> FeedResult<u64> {
    let raw = raw.trim();
    if raw.bytes().all(|b| b.is_ascii_digit()) {
        return parse_millis(raw, field);
    }
    let instant = chrono::DateTime::parse_from_rfc3339(raw)
        .map_err(|e| FeedError::decode(field, format!("{raw:?}: {e}")))?;
    u64::try_from(instant.timestamp_millis())
        .map_err(|_| FeedError::decode(field, format!("{raw:?} is before the epoch")))
}

pub fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}

/// `[price, amount, <ignored>, orderCount?]`, the OKX book tuple.
pub fn level_from_tuple(tuple: &[String]) -> FeedResult<LevelDiff> {
    let (price, amount) = match tuple {
        [price, amount, ..] => (price, amount),
        _ => return Err(FeedError::decode("level", format!("expected >= 2 fields, got {tuple:?}"))),
    };
    let order_count = match tuple.get(3) {
        Some(count) => Some(parse_count(count, "level.orderCount")?),
        None => None,
    };
    Ok(LevelDiff::new(PriceKey::parse(price)?, parse_amount(amount, "level.amount")?, order_count))
}

/// `[price, qty]`, the Binance book tuple.
pub fn level_from_pair(pair: &[String; 2]) -> FeedResult<LevelDiff> {
    Ok(LevelDiff::new(PriceKey::parse(&pair[0])?, parse_amount(&pair[1], "level.qty")?, None))
}

pub fn levels_from_tuples(tuples: &[Vec<String>]) -> FeedResult<DiffBatch> {
    tuples.iter().map(|t| level_from_tuple(t)).collect()
}

pub fn levels_from_pairs(pairs: &[[String; 2]]) -> FeedResult<DiffBatch> {
    pairs.iter().map(level_from_pair).collect()
}
