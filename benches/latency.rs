use criterion::{criterion_group, criterion_main, Criterion};
use nexus_trader::decision::{
    evaluate, normalize, Action, Decision, Direction, CONFIDENCE_THRESHOLD,
};
use nexus_trader::exchange::{Position, PositionSide};
use nexus_trader::risk::{LevelOverrides, PositionSizer, SizingParams};
use std::hint::black_box;

const JSON_REPLY: &str = r#"{"decision":"LONG","confidence":82,"reasoning":"RSI recovering from oversold with bullish MACD crossover","entry_price":null,"stop_loss":null,"take_profit":null,"risk_level":"MEDIUM"}"#;

const FENCED_REPLY: &str = "```json\n{\"decision\":\"SHORT\",\"confidence\":75,\"reasoning\":\"Funding elevated, longs crowded\",\"entry_price\":null,\"stop_loss\":65500.0,\"take_profit\":61000.0,\"risk_level\":\"HIGH\"}\n```";

const PROSE_REPLY: &str = "Given the extreme greed reading and the weakening momentum I would stay flat and WAIT for a cleaner setup before committing.";

fn benchmark_normalizer(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalizer");

    group.bench_function("bare_json", |b| {
        b.iter(|| black_box(normalize(black_box(JSON_REPLY))))
    });

    group.bench_function("fenced_json", |b| {
        b.iter(|| black_box(normalize(black_box(FENCED_REPLY))))
    });

    group.bench_function("text_fallback", |b| {
        b.iter(|| black_box(normalize(black_box(PROSE_REPLY))))
    });

    group.finish();
}

fn benchmark_gate_and_sizing(c: &mut Criterion) {
    let positions = vec![Position {
        symbol: "BTCUSDT".to_string(),
        side: PositionSide::Short,
        size: 0.01,
        entry_price: 64_000.0,
        mark_price: 63_800.0,
        pnl: 2.0,
        liquidation_price: None,
    }];
    let decision = Decision::new(Action::Long, 85);

    let sizer = PositionSizer::new(SizingParams {
        leverage: 5,
        position_size_pct: 10.0,
        stop_loss_pct: 2.0,
        take_profit_pct: 5.0,
    });

    let mut group = c.benchmark_group("execution_path");

    group.bench_function("gate_evaluate", |b| {
        b.iter(|| {
            black_box(evaluate(
                black_box(&decision),
                black_box(&positions),
                3,
                CONFIDENCE_THRESHOLD,
            ))
        })
    });

    group.bench_function("size_and_levels", |b| {
        b.iter(|| {
            black_box(sizer.size_and_levels(
                black_box(Direction::Long),
                black_box(Some(64_000.0)),
                black_box(1_000.0),
                LevelOverrides::default(),
            ))
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark_normalizer, benchmark_gate_and_sizing);
criterion_main!(benches);
