use crate::engine::ladder::PriceKey;

// Price level as exported to callers (ascending asks / descending bids)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceLevel {
    pub price: f64,
    pub amount: f64,
    pub order_count: Option<u64>, // "slots" on venues that report it
}

/// One decoded tuple of a depth diff. Never stored as-is: it is either an
/// upsert or a removal instruction for the level at `key`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelDiff {
    pub key: PriceKey,
    pub amount: f64,
    pub order_count: Option<u64>,
}

impl LevelDiff {
    pub fn new(key: PriceKey, amount: f64, order_count: Option<u64>) -> Self {
        Self { key, amount, order_count }
    }

    /// Zero size (or zero resting orders) means "remove this price".
    pub fn is_removal(&self) -> bool {
        self.amount == 0.0 || self.order_count == Some(0)
    }

    pub fn to_level(&self) -> PriceLevel {
        PriceLevel { price: self.key.value(), amount: self.amount, order_count: self.order_count }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BookAction {
    /// Full picture: ladders are rebuilt from this message alone.
    Snapshot,
    #[default]
    Update,
}

impl BookAction {
    pub fn from_wire(action: Option<&str>) -> Self {
        match action {
            Some("snapshot") | Some("partial") => BookAction::Snapshot,
            _ => BookAction::Update,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookAction::Snapshot => "snapshot",
            BookAction::Update => "update",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookSide {
    Bid,
    Ask,
}

// Result of applying one diff to a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApplyOutcome {
    pub upserted: usize,
    pub removed: usize,
    pub crossed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff(price: &str, amount: f64, count: Option<u64>) -> LevelDiff {
        LevelDiff::new(PriceKey::parse(price).unwrap(), amount, count)
    }

    #[test]
    fn zero_amount_or_zero_count_is_removal() {
        assert!(diff("100", 0.0, Some(0)).is_removal());
        assert!(diff("100", 0.0, None).is_removal());
        assert!(diff("100", 1.0, Some(0)).is_removal());
        assert!(!diff("100", 1.0, Some(5)).is_removal());
        assert!(!diff("100", 1.0, None).is_removal());
    }

    #[test]
    fn action_defaults_to_update() {
        assert_eq!(BookAction::from_wire(None), BookAction::Update);
        assert_eq!(BookAction::from_wire(Some("update")), BookAction::Update);
        assert_eq!(BookAction::from_wire(Some("snapshot")), BookAction::Snapshot);
    }
}
