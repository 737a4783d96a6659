//! Streaming market-data feed: exchange adapters, protocol dispatch and
//! per-instrument order books rebuilt from snapshot/diff streams.

pub mod config;
pub mod engine;
pub mod error;
pub mod market_data;
pub mod telemetry;

pub use error::{FeedError, FeedResult};
