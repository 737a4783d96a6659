//! One side of a book: price -> level, ordered by the numeric price.
//!
//! Keys are parsed once into [`PriceKey`] so that `"100"`, `"100.0"` and
//! `"100.00"` all address the same level regardless of how the venue
//! formatted them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ordered_float::OrderedFloat;

use crate::engine::types::PriceLevel;
use crate::error::{FeedError, FeedResult};
use crate::market_data::normaliser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PriceKey(OrderedFloat<f64>);

impl PriceKey {
    pub fn new(price: f64) -> FeedResult<Self> {
        if !price.is_finite() || price < 0.0 {
            return Err(FeedError::decode("price", format!("not a valid price: {price}")));
        }
        // -0.0 and 0.0 must hash alike
        Ok(PriceKey(OrderedFloat(price + 0.0)))
    }

    pub fn parse(raw: &str) -> FeedResult<Self> {
        Self::new(normaliser::parse_decimal(raw, "price")?)
    }

    pub fn value(&self) -> f64 {
        self.0.into_inner()
    }
}

impl FromStr for PriceKey {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PriceKey::parse(s)
    }
}

impl fmt::Display for PriceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PriceLadder {
    levels: BTreeMap<PriceKey, PriceLevel>,
}

impl PriceLadder {
    pub fn new() -> Self {
        Self { levels: BTreeMap::new() }
    }

    /// Insert or replace the level at `key`. A non-positive amount is a
    /// removal, never a stored level.
    pub fn upsert(&mut self, key: PriceKey, amount: f64, order_count: Option<u64>) {
        if amount <= 0.0 {
            self.levels.remove(&key);
            return;
        }
        let level = PriceLevel { price: key.value(), amount, order_count };
        self.levels.insert(key, level);
    }

    /// Removing an absent price is a no-op.
    pub fn delete(&mut self, key: &PriceKey) -> Option<PriceLevel> {
        self.levels.remove(key)
    }

    pub fn lookup(&self, key: &PriceKey) -> Option<&PriceLevel> {
        self.levels.get(key)
    }

    /// Lowest price first. Each call starts a fresh traversal.
    pub fn iter_ascending(&self) -> impl Iterator<Item = &PriceLevel> + '_ {
        self.levels.values()
    }

    /// Highest price first.
    pub fn iter_descending(&self) -> impl Iterator<Item = &PriceLevel> + '_ {
        self.levels.values().rev()
    }

    pub fn lowest(&self) -> Option<&PriceLevel> {
        self.levels.values().next()
    }

    pub fn highest(&self) -> Option<&PriceLevel> {
        self.levels.values().next_back()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn clear(&mut self) {
        self.levels.clear();
    }
}
