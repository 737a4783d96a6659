use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;

use lobx_feed::config::{ChannelName, FeedSettings, SubscriptionSettings};
use lobx_feed::market_data::events::{CanonicalPair, ContractType, Exchange, KlinePeriod, Market};
use lobx_feed::market_data::router;
use lobx_feed::telemetry;

/// Stream public market data and keep live order books.
#[derive(Debug, Parser)]
#[command(name = "lobx-feed", version)]
struct Cli {
    /// TOML settings file
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    exchange: Option<Exchange>,

    #[arg(long, value_enum)]
    market: Option<Market>,

    /// BTC-USDT style; repeat for several pairs
    #[arg(long = "pair")]
    pairs: Vec<CanonicalPair>,

    /// spot | swap | futures:YYMMDD
    #[arg(long, default_value = "spot")]
    contract: ContractType,

    #[arg(long = "channel", value_enum)]
    channels: Vec<ChannelName>,

    /// kline period for candle channels (1m, 1h, 4H, 3600...)
    #[arg(long)]
    period: Option<KlinePeriod>,

    #[arg(long, default_value = "info,lobx_feed=debug")]
    log_filter: String,

    /// prometheus port, used with the metrics-exporter feature
    #[arg(long, default_value_t = 9000)]
    metrics_port: u16,
}

impl Cli {
    fn apply(self, mut settings: FeedSettings) -> anyhow::Result<FeedSettings> {
        if let Some(exchange) = self.exchange {
            settings.exchange = exchange;
        }
        if let Some(market) = self.market {
            settings.market = market;
        }
        if !self.pairs.is_empty() {
            if self.channels.is_empty() {
                bail!("--pair needs at least one --channel");
            }
            settings.subscriptions = self
                .pairs
                .into_iter()
                .map(|pair| SubscriptionSettings {
                    pair,
                    contract: self.contract.clone(),
                    channels: self.channels.clone(),
                    period: self.period,
                })
                .collect();
        }
        settings.validate()?;
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // load .env

    let cli = Cli::parse();
    telemetry::init_tracing(&cli.log_filter);
    telemetry::init_metrics(cli.metrics_port)?;

    let settings = FeedSettings::load(cli.config.as_deref()).context("loading settings")?;
    let settings = cli.apply(settings)?;

    router::run(settings).await
}
