// Router wires settings -> registry + feed, logs what arrives and a BBO line per book each second
use std::sync::Arc;

use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::config::FeedSettings;
use crate::market_data::events::DepthUpdate;
use crate::market_data::feed::MarketFeed;
use crate::market_data::handoff;
use crate::market_data::registry::InstrumentBookRegistry;

pub async fn run(settings: FeedSettings) -> anyhow::Result<()> {
    let registry = Arc::new(InstrumentBookRegistry::new());
    let feed = MarketFeed::connect(&settings, Arc::clone(&registry))?;

    feed.on_ticker(|t| {
        info!(
            instrument = %t.instrument_id,
            last = t.last,
            bid = ?t.best_bid,
            ask = ?t.best_ask,
            vol = t.volume,
            "ticker"
        );
    });
    feed.on_trade(|t| {
        debug!(instrument = %t.instrument_id, price = t.price, amount = t.amount, side = ?t.side, "trade");
    });
    feed.on_candle(|c, period| {
        info!(
            instrument = %c.instrument_id,
            %period,
            open = c.open,
            high = c.high,
            low = c.low,
            close = c.close,
            "candle"
        );
    });

    // depth exports can be large; format them off the dispatch loop
    let depth = handoff::bounded("depth", settings.handoff_capacity, |u: DepthUpdate| {
        if u.crossed {
            warn!(instrument = %u.instrument_id, "crossed book exported");
        }
        debug!(
            instrument = %u.instrument_id,
            action = u.action.as_str(),
            asks = u.asks.len(),
            bids = u.bids.len(),
            stale = u.possibly_stale,
            "depth"
        );
    })?;
    feed.on_depth(depth.into_callback());

    if settings.subscriptions.is_empty() {
        warn!("no subscriptions configured, nothing will stream");
    }
    for sub in &settings.subscriptions {
        for kind in sub.kinds()? {
            feed.subscribe(kind, &sub.pair, &sub.contract)?;
        }
    }

    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = interval.tick() => log_bbo(&registry),
            res = &mut shutdown => {
                if let Err(e) = res {
                    warn!(error = %e, "ctrl-c handler failed, stopping");
                }
                info!(books = registry.len(), "shutting down");
                break;
            }
        }
    }
    Ok(())
}

fn log_bbo(registry: &InstrumentBookRegistry) {
    for id in registry.instrument_ids() {
        let Some(book) = registry.get(&id) else { continue };
        let book = book.lock();
        match (book.best_bid(), book.best_ask()) {
            (Some(bid), Some(ask)) => info!(
                instrument = %id,
                bid = bid.price,
                bid_size = bid.amount,
                ask = ask.price,
                ask_size = ask.amount,
                spread = ask.price - bid.price,
                stale = book.is_possibly_stale(),
                "bbo"
            ),
            (bid, ask) => info!(
                instrument = %id,
                bid = ?bid.map(|l| l.price),
                ask = ?ask.map(|l| l.price),
                "bbo (one side empty)"
            ),
        }
    }
}
