use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use lobx_feed::engine::book::OrderBookSnapshot;
use lobx_feed::engine::ladder::PriceKey;
use lobx_feed::engine::types::{BookAction, LevelDiff};
use lobx_feed::market_data::events::ContractType;
use lobx_feed::market_data::normaliser::levels_from_tuples;

fn diff(price: f64, amount: f64, count: u64) -> LevelDiff {
    LevelDiff::new(PriceKey::new(price).unwrap(), amount, Some(count))
}

// 400-level book around 100.00 with a 0.01 tick
fn seeded_book() -> OrderBookSnapshot {
    let mut book = OrderBookSnapshot::new("BTC-USDT", ContractType::Spot);
    let asks: Vec<_> = (1..=200).map(|i| diff(100.0 + i as f64 * 0.01, 1.0, 1)).collect();
    let bids: Vec<_> = (0..200).map(|i| diff(100.0 - i as f64 * 0.01, 1.0, 1)).collect();
    book.apply_diff(&asks, &bids, BookAction::Snapshot, 0);
    book
}

fn bench_apply_diff(c: &mut Criterion) {
    let updates: Vec<LevelDiff> = (0..20)
        .map(|i| diff(100.0 - (i % 10) as f64 * 0.01, if i % 3 == 0 { 0.0 } else { 2.5 }, 3))
        .collect();

    c.bench_function("apply_diff_20_levels", |b| {
        b.iter_batched(
            seeded_book,
            |mut book| {
                book.apply_diff(&[], black_box(&updates), BookAction::Update, 1);
                book
            },
            BatchSize::SmallInput,
        )
    });

    let book = seeded_book();
    c.bench_function("export_full_depth", |b| b.iter(|| black_box(book.export(None))));
    c.bench_function("export_top_10", |b| b.iter(|| black_box(book.export(Some(10)))));
}

fn bench_decode(c: &mut Criterion) {
    let tuples: Vec<Vec<String>> = (0..50)
        .map(|i| {
            vec![format!("{:.2}", 65_000.0 + i as f64 * 0.1), "0.5".into(), "0".into(), "3".into()]
        })
        .collect();
    c.bench_function("decode_50_okx_tuples", |b| {
        b.iter(|| levels_from_tuples(black_box(&tuples)).unwrap())
    });
}

criterion_group!(benches, bench_apply_diff, bench_decode);
criterion_main!(benches);
