//! Event store benchmark: batched appends and snapshot reads on SQLite.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use funnel_engine::events::NewEvent;
use funnel_engine::storage::{EventStore, SqliteEventStore};
use tempfile::tempdir;

fn batch(n: usize) -> Vec<NewEvent> {
    (0..n)
        .map(|i| NewEvent::new(format!("user-{}", i % 50), "view", "2024-01-01T00:00:00Z"))
        .collect()
}

fn bench_append_batch(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let store = SqliteEventStore::open(&dir.path().join("events.db")).unwrap();

    c.bench_function("storage_append_100", |b| {
        b.iter(|| black_box(store.append(batch(100))).unwrap())
    });
}

fn bench_snapshot(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let store = SqliteEventStore::open(&dir.path().join("events.db")).unwrap();
    store.append(batch(10_000)).unwrap();

    c.bench_function("storage_snapshot_unchanged", |b| {
        b.iter(|| black_box(store.snapshot()).unwrap())
    });
}

criterion_group!(benches, bench_append_batch, bench_snapshot);
criterion_main!(benches);
