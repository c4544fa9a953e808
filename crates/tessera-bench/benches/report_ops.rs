//! Criterion micro-benchmarks for tick statistics.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tessera_engine::{TickHorizon, TickReport, TickStats};

const INTERVAL: u64 = 50_000_000;

/// 15 minutes of 20 Hz ticks with seeded durations.
fn filled_stats() -> TickStats {
    let mut rng = ChaCha8Rng::seed_from_u64(9);
    let mut stats = TickStats::new(0);
    for i in 0..18_000u64 {
        stats.record(i * INTERVAL, 1_000_000 + u64::from(rng.next_u32() % 20_000_000));
    }
    stats
}

/// Benchmark: record one tick into every horizon.
fn bench_record(c: &mut Criterion) {
    let mut stats = TickStats::new(0);
    let mut t = 0u64;
    c.bench_function("tick_stats_record", |b| {
        b.iter(|| {
            t += INTERVAL;
            stats.record(black_box(t), black_box(4_000_000));
        });
    });
}

/// Benchmark: a report per horizon over a full 15-minute history.
fn bench_report_all_horizons(c: &mut Criterion) {
    let stats = filled_stats();
    let now = 18_000 * INTERVAL;
    c.bench_function("tick_stats_report_all_horizons", |b| {
        b.iter(|| {
            for h in TickHorizon::ALL {
                black_box(stats.report(h, now, INTERVAL, 20.0));
            }
        });
    });
}

/// Benchmark: aggregate 1K region reports into a world report.
fn bench_aggregate_1k(c: &mut Criterion) {
    let stats = filled_stats();
    let now = 18_000 * INTERVAL;
    let reports: Vec<TickReport> = (0..1_000)
        .map(|_| stats.report(TickHorizon::Minutes1, now, INTERVAL, 20.0))
        .collect();
    c.bench_function("tick_report_aggregate_1k", |b| {
        b.iter(|| black_box(TickReport::aggregate(&reports, 20.0)));
    });
}

criterion_group!(benches, bench_record, bench_report_all_horizons, bench_aggregate_1k);
criterion_main!(benches);
