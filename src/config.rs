//! Layered settings for one feed session.
//!
//! Layers, lowest priority first:
//! 1. Compiled-in defaults
//! 2. TOML file (if a path is given)
//! 3. Environment overrides, prefix `LOBX_`, nested with `__`
//!    (e.g. `LOBX_RECONNECT__MAX_RETRIES=5`)
//!
//! Command-line flags are applied on top by the binary.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::{FeedError, FeedResult};
use crate::market_data::adapters::adapter_for;
use crate::market_data::events::{CanonicalPair, ChannelKind, ContractType, Exchange, KlinePeriod, Market};
use crate::market_data::session::ReconnectPolicy;

fn default_exchange() -> Exchange {
    Exchange::Okx
}

fn default_true() -> bool {
    true
}

/// OKX drops idle connections after 30 s.
fn default_heartbeat_interval_secs() -> u64 {
    28
}

fn default_handoff_capacity() -> usize {
    1_024
}

fn default_initial_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_contract() -> ContractType {
    ContractType::Spot
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedSettings {
    #[serde(default = "default_exchange")]
    pub exchange: Exchange,
    #[serde(default)]
    pub market: Market,
    /// Overrides the exchange/market default endpoint.
    #[serde(default)]
    pub ws_url: Option<String>,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    /// Only used for venues that expect a client heartbeat. 0 keeps the
    /// venue default.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default)]
    pub reconnect: ReconnectSettings,
    /// Depth events queued for the slow consumer before dropping.
    #[serde(default = "default_handoff_capacity")]
    pub handoff_capacity: usize,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// 0 = unlimited
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_retries: 0,
        }
    }
}

impl ReconnectSettings {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            max_retries: self.max_retries,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ChannelName {
    Depth,
    Ticker,
    Trade,
    Candle,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionSettings {
    pub pair: CanonicalPair,
    #[serde(default = "default_contract")]
    pub contract: ContractType,
    pub channels: Vec<ChannelName>,
    /// Required when `channels` contains `candle`.
    #[serde(default)]
    pub period: Option<KlinePeriod>,
}

impl SubscriptionSettings {
    pub fn kinds(&self) -> FeedResult<Vec<ChannelKind>> {
        self.channels
            .iter()
            .map(|channel| match channel {
                ChannelName::Depth => Ok(ChannelKind::Depth),
                ChannelName::Ticker => Ok(ChannelKind::Ticker),
                ChannelName::Trade => Ok(ChannelKind::Trade),
                ChannelName::Candle => self.period.map(ChannelKind::Candle).ok_or_else(|| {
                    FeedError::Configuration(format!("candle subscription for {} needs a period", self.pair))
                }),
            })
            .collect()
    }
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            exchange: default_exchange(),
            market: Market::default(),
            ws_url: None,
            auto_reconnect: true,
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            reconnect: ReconnectSettings::default(),
            handoff_capacity: default_handoff_capacity(),
            subscriptions: Vec::new(),
        }
    }
}

impl FeedSettings {
    pub fn load(path: Option<&Path>) -> FeedResult<Self> {
        let mut builder = Config::builder()
            .set_default("exchange", "okx")?
            .set_default("market", "spot")?
            .set_default("auto_reconnect", true)?
            .set_default("heartbeat_interval_secs", default_heartbeat_interval_secs() as i64)?
            .set_default("handoff_capacity", default_handoff_capacity() as i64)?
            .set_default("reconnect.initial_backoff_ms", default_initial_backoff_ms() as i64)?
            .set_default("reconnect.max_backoff_ms", default_max_backoff_ms() as i64)?
            .set_default("reconnect.max_retries", 0i64)?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        // prefix separator stays `_` even though nesting uses `__`
        builder = builder.add_source(
            Environment::with_prefix("LOBX")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: FeedSettings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> FeedResult<()> {
        if self.handoff_capacity == 0 {
            return Err(FeedError::Configuration("handoff_capacity must be at least 1".into()));
        }
        if self.reconnect.initial_backoff_ms > self.reconnect.max_backoff_ms {
            return Err(FeedError::Configuration(
                "reconnect.initial_backoff_ms exceeds reconnect.max_backoff_ms".into(),
            ));
        }
        for sub in &self.subscriptions {
            sub.kinds()?;
        }
        Ok(())
    }

    pub fn resolved_ws_url(&self) -> String {
        match &self.ws_url {
            Some(url) => url.clone(),
            None => adapter_for(self.exchange, self.market).ws_url().to_string(),
        }
    }

    /// `None` keeps the adapter's own interval.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs > 0).then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }
}
