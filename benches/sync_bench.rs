//! Benchmarks for the reconciliation helpers
//!
//! Measures the per-sync index building (day-max values, known sample ids)
//! and dedup planning over a year of synthetic entries.

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stride::store::{EntrySource, MetricEntry};
use stride::sync::dedup;

/// A year of entries with several per day, a mix of sources
fn synthetic_entries(per_day: usize) -> Vec<MetricEntry> {
    let start = Utc::now() - Duration::days(365);
    let mut entries = Vec::with_capacity(365 * per_day);

    for day in 0..365 {
        for slot in 0..per_day {
            let date = start + Duration::days(day) + Duration::hours(slot as i64 * 3);
            let source = if slot % 2 == 0 {
                EntrySource::Manual
            } else {
                EntrySource::ExternalDevice
            };

            let mut entry = MetricEntry::new(
                "bench-user",
                1000.0 + (day * per_day as i64 + slot as i64) as f64,
                date,
                source,
            );
            if source == EntrySource::ExternalDevice {
                entry.external_sample_id = Some(format!("sample-{}-{}", day, slot));
            }
            entries.push(entry);
        }
    }

    entries
}

fn bench_day_index(c: &mut Criterion) {
    let entries = synthetic_entries(8);

    c.bench_function("max_value_by_day_365d_x8", |b| {
        b.iter(|| dedup::max_value_by_day(black_box(&entries)))
    });
}

fn bench_known_sample_ids(c: &mut Criterion) {
    let entries = synthetic_entries(8);

    c.bench_function("known_sample_ids_365d_x8", |b| {
        b.iter(|| dedup::known_sample_ids(black_box(&entries)))
    });
}

fn bench_dedup_plan(c: &mut Criterion) {
    let entries = synthetic_entries(8);

    c.bench_function("dedup_plan_365d_x8", |b| {
        b.iter(|| dedup::plan(black_box(&entries)))
    });
}

criterion_group!(
    benches,
    bench_day_index,
    bench_known_sample_ids,
    bench_dedup_plan
);
criterion_main!(benches);
