//! Performance benchmarks for gamecheck-core.
//!
//! Run with: cargo bench -p gamecheck-core

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use gamecheck_core::history::{HistoryStore, HistoryTrimmer, SledHistoryStore};
use gamecheck_core::types::{ActivityKind, HistoryRecord, UserId};
use tempfile::TempDir;

/// Benchmark recording activity with trimming, at different history bounds.
fn bench_record_and_trim(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_and_trim");

    for max in [10_usize, 30, 100] {
        group.bench_with_input(BenchmarkId::new("max_per_owner", max), &max, |b, &max| {
            let temp_dir = TempDir::new().unwrap();
            let store: Arc<dyn HistoryStore> =
                Arc::new(SledHistoryStore::open(temp_dir.path()).unwrap());
            let trimmer = HistoryTrimmer::new(store, max);
            let owner = UserId::new("bench-user");

            b.iter(|| {
                let record =
                    HistoryRecord::new(owner.clone(), ActivityKind::AddGame).with_game("Hades");
                trimmer.record(black_box(record)).unwrap();
            });
        });
    }

    group.finish();
}

/// Benchmark listing a full history page.
fn bench_list(c: &mut Criterion) {
    let temp_dir = TempDir::new().unwrap();
    let store = SledHistoryStore::open(temp_dir.path()).unwrap();
    let owner = UserId::new("bench-user");
    for i in 0..30 {
        let record =
            HistoryRecord::new(owner.clone(), ActivityKind::AddGame).with_game(format!("Game {i}"));
        store.insert(&record).unwrap();
    }

    c.bench_function("history_list_30", |b| {
        b.iter(|| store.list(black_box(&owner), 30, 0).unwrap());
    });
}

criterion_group!(benches, bench_record_and_trim, bench_list);
criterion_main!(benches);
