use std::sync::{Arc, Mutex};

use lobx_feed::engine::types::{BookAction, PriceLevel};
use lobx_feed::market_data::adapters::okx::{OkxAdapter, OkxDispatcher};
use lobx_feed::market_data::dispatcher::{DispatchContext, Dispatched, ProtocolDispatcher};
use lobx_feed::market_data::events::{
    Candle, ContractType, DepthUpdate, KlinePeriod, Ticker, Trade, TradeSide,
};
use lobx_feed::market_data::registry::InstrumentBookRegistry;

struct Harness {
    registry: Arc<InstrumentBookRegistry>,
    dispatcher: OkxDispatcher,
    depth: Arc<Mutex<Vec<DepthUpdate>>>,
    tickers: Arc<Mutex<Vec<Ticker>>>,
    trades: Arc<Mutex<Vec<Trade>>>,
    candles: Arc<Mutex<Vec<(Candle, KlinePeriod)>>>,
}

fn harness() -> Harness {
    let registry = Arc::new(InstrumentBookRegistry::new());
    let context = Arc::new(DispatchContext::new(Arc::clone(&registry)));

    let depth = Arc::new(Mutex::new(Vec::new()));
    let tickers = Arc::new(Mutex::new(Vec::new()));
    let trades = Arc::new(Mutex::new(Vec::new()));
    let candles = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&depth);
    context.set_depth(Box::new(move |u: &DepthUpdate| sink.lock().unwrap().push(u.clone())));
    let sink = Arc::clone(&tickers);
    context.set_ticker(Box::new(move |t: &Ticker| sink.lock().unwrap().push(t.clone())));
    let sink = Arc::clone(&trades);
    context.set_trade(Box::new(move |t: &Trade| sink.lock().unwrap().push(t.clone())));
    let sink = Arc::clone(&candles);
    context.set_candle(Box::new(move |c: &Candle, p: KlinePeriod| {
        sink.lock().unwrap().push((c.clone(), p))
    }));

    let dispatcher = OkxDispatcher::new(Arc::new(OkxAdapter::new()), context);
    Harness { registry, dispatcher, depth, tickers, trades, candles }
}

fn books_frame(inst: &str, action: &str, asks: &str, bids: &str) -> String {
    format!(
        r#"{{"arg":{{"channel":"books","instId":"{inst}"}},"action":"{action}","data":[{{"asks":{asks},"bids":{bids},"ts":"1700000000000","checksum":0}}]}}"#
    )
}

fn level(price: f64, amount: f64, count: u64) -> PriceLevel {
    PriceLevel { price, amount, order_count: Some(count) }
}

fn export(h: &Harness, inst: &str) -> (Vec<PriceLevel>, Vec<PriceLevel>) {
    h.registry.get(inst).expect("book exists").lock().export(None)
}

#[test]
fn scenario_a_single_bid_level() {
    let h = harness();
    let frame = books_frame("BTC-USDT", "update", "[]", r#"[["100","1","0","5"]]"#);
    let out = h.dispatcher.dispatch(frame.as_bytes()).unwrap();
    assert!(matches!(out, Dispatched::Depth { ref instrument_id, .. } if instrument_id == "BTC-USDT"));

    let (asks, bids) = export(&h, "BTC-USDT");
    assert!(asks.is_empty());
    assert_eq!(bids, vec![level(100.0, 1.0, 5)]);

    let updates = h.depth.lock().unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].bids, vec![level(100.0, 1.0, 5)]);
    assert_eq!(updates[0].contract_type, ContractType::Spot);
    assert_eq!(updates[0].pair.to_string(), "BTC/USDT");
}

#[test]
fn scenario_b_zero_count_removes_level() {
    let h = harness();
    h.dispatcher
        .dispatch(books_frame("BTC-USDT", "update", "[]", r#"[["100","1","0","5"]]"#).as_bytes())
        .unwrap();
    h.dispatcher
        .dispatch(books_frame("BTC-USDT", "update", "[]", r#"[["100","0","0","0"]]"#).as_bytes())
        .unwrap();

    let (asks, bids) = export(&h, "BTC-USDT");
    assert!(asks.is_empty());
    assert!(bids.is_empty());
    assert!(h.depth.lock().unwrap().last().unwrap().bids.is_empty());
}

#[test]
fn scenario_c_both_sides_not_crossed() {
    let h = harness();
    h.dispatcher
        .dispatch(books_frame("BTC-USDT", "update", r#"[["101","2","0","3"]]"#, "[]").as_bytes())
        .unwrap();
    let out = h
        .dispatcher
        .dispatch(books_frame("BTC-USDT", "update", "[]", r#"[["100","1","0","5"]]"#).as_bytes())
        .unwrap();

    let (asks, bids) = export(&h, "BTC-USDT");
    assert_eq!(asks, vec![level(101.0, 2.0, 3)]);
    assert_eq!(bids, vec![level(100.0, 1.0, 5)]);
    assert!(asks[0].price >= bids[0].price);
    match out {
        Dispatched::Depth { outcome, .. } => assert!(!outcome.crossed),
        other => panic!("unexpected {other:?}"),
    }
    assert!(!h.depth.lock().unwrap().last().unwrap().crossed);
}

#[test]
fn scenario_d_candle_never_touches_registry() {
    let h = harness();
    let frame = r#"{"arg":{"channel":"candle3600s:BTC-USDT"},"data":[["1700000000000","100","110","95","105","12.5"]]}"#;
    assert_eq!(h.dispatcher.dispatch(frame.as_bytes()).unwrap(), Dispatched::Candles(1));

    assert!(h.registry.is_empty());
    let candles = h.candles.lock().unwrap();
    let (candle, period) = &candles[0];
    assert_eq!(*period, KlinePeriod::Hour1);
    assert_eq!(candle.instrument_id, "BTC-USDT");
    assert_eq!((candle.open, candle.high, candle.low, candle.close), (100.0, 110.0, 95.0, 105.0));
    assert_eq!(candle.volume, 12.5);
    assert_eq!(candle.timestamp_ms, 1_700_000_000_000);
}

#[test]
fn scenario_e_missing_data_leaves_book_unchanged() {
    let h = harness();
    h.dispatcher
        .dispatch(books_frame("BTC-USDT", "update", "[]", r#"[["100","1","0","5"]]"#).as_bytes())
        .unwrap();
    let before = h.registry.get("BTC-USDT").unwrap().lock().clone();

    let frame = r#"{"arg":{"channel":"books","instId":"BTC-USDT"},"action":"update"}"#;
    let err = h.dispatcher.dispatch(frame.as_bytes()).unwrap_err();
    assert_eq!(err.kind(), "decode");
    assert!(!err.is_fatal());

    let after = h.registry.get("BTC-USDT").unwrap().lock().clone();
    assert_eq!(before, after);
    assert_eq!(h.depth.lock().unwrap().len(), 1);
}

#[test]
fn bad_tuple_late_in_frame_applies_nothing() {
    let h = harness();
    h.dispatcher
        .dispatch(books_frame("BTC-USDT", "update", "[]", r#"[["100","1","0","5"]]"#).as_bytes())
        .unwrap();

    let frame = books_frame("BTC-USDT", "update", "[]", r#"[["99","1","0","2"],["oops","1","0","1"]]"#);
    assert_eq!(h.dispatcher.dispatch(frame.as_bytes()).unwrap_err().kind(), "decode");

    let (_, bids) = export(&h, "BTC-USDT");
    assert_eq!(bids, vec![level(100.0, 1.0, 5)]);
    assert_eq!(h.registry.get("BTC-USDT").unwrap().lock().updates_applied(), 1);
}

#[test]
fn negative_size_is_rejected_and_book_kept() {
    let h = harness();
    h.dispatcher
        .dispatch(books_frame("BTC-USDT", "update", "[]", r#"[["100","1","0","5"]]"#).as_bytes())
        .unwrap();
    let before = h.registry.get("BTC-USDT").unwrap().lock().clone();

    let frame = books_frame("BTC-USDT", "update", "[]", r#"[["100","-5","0","3"]]"#);
    let err = h.dispatcher.dispatch(frame.as_bytes()).unwrap_err();
    assert_eq!(err.kind(), "decode");

    assert_eq!(*h.registry.get("BTC-USDT").unwrap().lock(), before);
    assert_eq!(h.depth.lock().unwrap().len(), 1);
}

#[test]
fn legacy_candle_rows_name_their_instrument() {
    let h = harness();
    let frame = r#"{"arg":{"channel":"swap/candle60s:BTC-USD-SWAP"},"data":[{"candle":["2019-04-16T10:49:00.000Z","5197.9","5199.7","5195.6","5197.4","1200","23.09"],"instrument_id":"BTC-USD-SWAP"}]}"#;
    assert_eq!(h.dispatcher.dispatch(frame.as_bytes()).unwrap(), Dispatched::Candles(1));

    let candles = h.candles.lock().unwrap();
    let (candle, period) = &candles[0];
    assert_eq!(*period, KlinePeriod::Min1);
    assert_eq!(candle.instrument_id, "BTC-USD-SWAP");
    assert_eq!(candle.contract_type, ContractType::Swap);
    assert_eq!(candle.pair.to_string(), "BTC/USD");
    assert_eq!(candle.timestamp_ms, 1_555_411_740_000);
    assert_eq!(candle.close, 5197.4);
    assert_eq!(candle.volume, 1200.0);
    assert!(h.registry.is_empty());
}

#[test]
fn legacy_field_names_and_iso_timestamps() {
    let h = harness();
    let depth = r#"{"arg":{"channel":"spot/depth:ETH-USDT"},"action":"partial","data":[{"asks":[["2001","1","0","1"]],"bids":[["2000","2","0","3"]],"timestamp":"2019-04-16T10:49:00.000Z"}]}"#;
    h.dispatcher.dispatch(depth.as_bytes()).unwrap();
    let book = h.registry.get("ETH-USDT").unwrap();
    assert!(book.lock().is_seeded());
    assert_eq!(book.lock().last_update_ms(), 1_555_411_740_000);

    let trade = r#"{"arg":{"channel":"spot/trade:ETH-USDT"},"data":[{"instrument_id":"ETH-USDT","trade_id":"77","price":"2000.5","size":"0.25","side":"sell","timestamp":"2019-04-16T10:49:00.250Z"}]}"#;
    assert_eq!(h.dispatcher.dispatch(trade.as_bytes()).unwrap(), Dispatched::Trades(1));
    let trades = h.trades.lock().unwrap();
    assert_eq!(trades[0].trade_id, "77");
    assert_eq!(trades[0].amount, 0.25);
    assert_eq!(trades[0].side, TradeSide::Sell);
    assert_eq!(trades[0].timestamp_ms, 1_555_411_740_250);

    let ticker = r#"{"arg":{"channel":"spot/ticker:ETH-USDT"},"data":[{"instrument_id":"ETH-USDT","last":"2000","best_bid":"1999.5","best_ask":"2000.5","high_24h":"2100","low_24h":"1900","base_volume_24h":"5000","timestamp":"2019-04-16T10:49:01.000Z"}]}"#;
    assert_eq!(h.dispatcher.dispatch(ticker.as_bytes()).unwrap(), Dispatched::Tickers(1));
    let tickers = h.tickers.lock().unwrap();
    assert_eq!(tickers[0].best_bid, Some(1999.5));
    assert_eq!(tickers[0].volume, 5000.0);
    assert_eq!(tickers[0].timestamp_ms, 1_555_411_741_000);
}

#[test]
fn snapshot_action_rebuilds_and_clears_stale() {
    let h = harness();
    h.dispatcher
        .dispatch(books_frame("BTC-USDT", "update", "[]", r#"[["100","1","0","5"]]"#).as_bytes())
        .unwrap();
    assert_eq!(h.registry.mark_all_stale(), 1);

    h.dispatcher
        .dispatch(books_frame("BTC-USDT", "update", "[]", r#"[["98","1","0","1"]]"#).as_bytes())
        .unwrap();
    assert!(h.depth.lock().unwrap().last().unwrap().possibly_stale);

    h.dispatcher
        .dispatch(books_frame("BTC-USDT", "snapshot", r#"[["102","4","0","2"]]"#, r#"[["99","3","0","1"]]"#).as_bytes())
        .unwrap();
    let (asks, bids) = export(&h, "BTC-USDT");
    assert_eq!(asks, vec![level(102.0, 4.0, 2)]);
    assert_eq!(bids, vec![level(99.0, 3.0, 1)]);

    let last = h.depth.lock().unwrap().last().cloned().unwrap();
    assert_eq!(last.action, BookAction::Snapshot);
    assert!(!last.possibly_stale);
}

#[test]
fn crossed_book_is_flagged_not_fatal() {
    let h = harness();
    h.dispatcher
        .dispatch(books_frame("ETH-USDT-SWAP", "update", r#"[["100","1","0","1"]]"#, r#"[["101","1","0","1"]]"#).as_bytes())
        .unwrap();
    let last = h.depth.lock().unwrap().last().cloned().unwrap();
    assert!(last.crossed);
    assert_eq!(last.contract_type, ContractType::Swap);

    // later diffs still apply
    h.dispatcher
        .dispatch(books_frame("ETH-USDT-SWAP", "update", "[]", r#"[["101","0","0","0"]]"#).as_bytes())
        .unwrap();
    assert!(!h.depth.lock().unwrap().last().unwrap().crossed);
}

#[test]
fn price_formatting_does_not_split_levels() {
    let h = harness();
    h.dispatcher
        .dispatch(books_frame("BTC-USDT", "update", "[]", r#"[["100","1","0","5"]]"#).as_bytes())
        .unwrap();
    h.dispatcher
        .dispatch(books_frame("BTC-USDT", "update", "[]", r#"[["100.0","2","0","6"]]"#).as_bytes())
        .unwrap();
    let (_, bids) = export(&h, "BTC-USDT");
    assert_eq!(bids, vec![level(100.0, 2.0, 6)]);
}

#[test]
fn one_frame_many_tickers() {
    let h = harness();
    let frame = r#"{"arg":{"channel":"tickers","instId":"BTC-USDT"},"data":[
        {"instId":"BTC-USDT","last":"65000.1","askPx":"65000.2","bidPx":"65000","high24h":"66000","low24h":"64000","vol24h":"1234.5","ts":"1700000000001"},
        {"instId":"BTC-USDT-SWAP","last":"65010","askPx":"","bidPx":"65009","high24h":"66010","low24h":"64010","vol24h":"99","ts":"1700000000002"}
    ]}"#;
    assert_eq!(h.dispatcher.dispatch(frame.as_bytes()).unwrap(), Dispatched::Tickers(2));

    let tickers = h.tickers.lock().unwrap();
    assert_eq!(tickers.len(), 2);
    assert_eq!(tickers[0].best_ask, Some(65000.2));
    assert_eq!(tickers[0].contract_type, ContractType::Spot);
    assert_eq!(tickers[1].best_ask, None);
    assert_eq!(tickers[1].contract_type, ContractType::Swap);
    assert!(h.registry.is_empty());
}

#[test]
fn trades_map_taker_side() {
    let h = harness();
    let frame = r#"{"arg":{"channel":"trades","instId":"BTC-USD-250627"},"data":[
        {"instId":"BTC-USD-250627","tradeId":"130639474","px":"42219.9","sz":"0.12","side":"sell","ts":"1630048897897"}
    ]}"#;
    assert_eq!(h.dispatcher.dispatch(frame.as_bytes()).unwrap(), Dispatched::Trades(1));
    let trades = h.trades.lock().unwrap();
    assert_eq!(trades[0].side, TradeSide::Sell);
    assert_eq!(trades[0].trade_id, "130639474");
    assert_eq!(trades[0].contract_type, ContractType::futures("250627").unwrap());
}

#[test]
fn control_plane_frames() {
    let h = harness();
    assert_eq!(h.dispatcher.dispatch(b"pong").unwrap(), Dispatched::Heartbeat);

    let ack = r#"{"event":"subscribe","arg":{"channel":"books","instId":"BTC-USDT"},"connId":"a4d3ae55"}"#;
    assert_eq!(
        h.dispatcher.dispatch(ack.as_bytes()).unwrap(),
        Dispatched::Subscribed { channel: "books".into() }
    );

    let err = h
        .dispatcher
        .dispatch(br#"{"event":"error","code":"60012","msg":"Invalid request"}"#)
        .unwrap_err();
    assert_eq!(err.kind(), "protocol");
    assert!(err.to_string().contains("60012"));

    let other = h.dispatcher.dispatch(br#"{"event":"notice","msg":"maintenance"}"#).unwrap();
    assert_eq!(other, Dispatched::Control { event: "notice".into() });
}

#[test]
fn unknown_channel_and_garbage_are_reported() {
    let h = harness();
    let err = h
        .dispatcher
        .dispatch(br#"{"arg":{"channel":"funding-rate","instId":"BTC-USDT-SWAP"},"data":[]}"#)
        .unwrap_err();
    assert_eq!(err.kind(), "classification");
    assert!(err.to_string().contains("funding-rate"));

    assert_eq!(h.dispatcher.dispatch(b"not json").unwrap_err().kind(), "decode");
    assert_eq!(h.dispatcher.dispatch(br#"{"foo":1}"#).unwrap_err().kind(), "classification");

    // unknown instrument form is an adapter error and creates no book
    let frame = books_frame("BTCUSDT", "update", "[]", r#"[["1","1","0","1"]]"#);
    assert_eq!(h.dispatcher.dispatch(frame.as_bytes()).unwrap_err().kind(), "adapter");
    assert!(h.registry.is_empty());
}
