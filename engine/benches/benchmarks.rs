//! Performance benchmarks for tandem-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tandem_engine::{
    sql, EventLog, FnSubscriber, LiveQueryEngine, LiveUpdate, LogicalClock, QueryTimer,
    ReplicaBuilder, ReplicaSource, StoreHandle, Value,
};
use tokio::runtime::Runtime;

fn populated_handle(rows: usize) -> StoreHandle {
    let mut handle = StoreHandle::open_in_memory(true).unwrap();
    handle.mark_ready();
    handle
        .exec("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, email TEXT, age INTEGER)")
        .unwrap();
    handle
        .transaction(|tx| {
            for i in 0..rows {
                tx.execute(
                    "INSERT INTO users (name, email, age) VALUES ($1, $2, $3)",
                    &[
                        Value::from(format!("User {}", i)),
                        Value::from(format!("user{}@test.com", i)),
                        Value::Integer(i as i64 % 90),
                    ],
                )?;
            }
            Ok(())
        })
        .unwrap();
    handle
}

fn bench_clock(c: &mut Criterion) {
    let mut group = c.benchmark_group("clock");

    group.bench_function("next_timestamp", |b| {
        let mut clock = LogicalClock::new("session");
        b.iter(|| clock.next_timestamp())
    });

    group.bench_function("sync_timestamp", |b| {
        let mut clock = LogicalClock::new("session");
        let mut remote = 0i64;
        b.iter(|| {
            remote += 2;
            clock.sync_timestamp(black_box(remote))
        })
    });

    group.bench_function("event_record", |b| {
        let mut log = EventLog::new("session").with_capacity(10_000);
        let payload = r#"{"sql":"INSERT INTO users (name) VALUES ($1)","params":["Alice"]}"#;
        b.iter(|| log.record(black_box(payload)))
    });

    group.finish();
}

fn bench_sql(c: &mut Criterion) {
    let mut group = c.benchmark_group("sql");
    let statement = "WITH recent AS (SELECT id FROM users WHERE age > $1) \
                     UPDATE users SET name = '$2 literal' WHERE id IN (SELECT id FROM recent) AND email = $2";

    group.bench_function("classify", |b| {
        b.iter(|| sql::classify(black_box(statement)))
    });

    group.bench_function("translate_placeholders", |b| {
        b.iter(|| sql::translate_placeholders(black_box(statement)))
    });

    group.finish();
}

fn bench_export(c: &mut Criterion) {
    let mut group = c.benchmark_group("export");
    let runtime = Runtime::new().unwrap();

    for size in [100, 1000, 5000].iter() {
        group.bench_with_input(BenchmarkId::new("capture", size), size, |b, &size| {
            let mut handle = populated_handle(size);
            b.iter(|| handle.export_state().unwrap())
        });

        group.bench_with_input(BenchmarkId::new("load", size), size, |b, &size| {
            let export = populated_handle(size).export_state().unwrap();
            b.iter(|| {
                let mut copy = StoreHandle::open_in_memory(true).unwrap();
                copy.load_state(black_box(&export)).unwrap();
                copy
            })
        });

        group.bench_with_input(BenchmarkId::new("to_json", size), size, |b, &size| {
            let export = populated_handle(size).export_state().unwrap();
            b.iter(|| black_box(&export).to_json().unwrap())
        });

        group.bench_with_input(BenchmarkId::new("build_replica", size), size, |b, &size| {
            let export = Arc::new(populated_handle(size).export_state().unwrap());
            let builder = ReplicaBuilder::new(Arc::new(QueryTimer::default()), true);
            b.to_async(&runtime).iter(|| async {
                builder
                    .build(ReplicaSource::Export(Arc::clone(&export)))
                    .await
                    .unwrap()
            })
        });
    }

    group.finish();
}

fn bench_live_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("live_queries");
    let runtime = Runtime::new().unwrap();

    let export = Arc::new(populated_handle(1000).export_state().unwrap());
    let builder = ReplicaBuilder::new(Arc::new(QueryTimer::default()), true);
    let replica = runtime
        .block_on(builder.build(ReplicaSource::Export(export)))
        .unwrap();

    for subscriptions in [1, 10, 100].iter() {
        group.bench_with_input(
            BenchmarkId::new("invalidate", subscriptions),
            subscriptions,
            |b, &subscriptions| {
                let mut engine = LiveQueryEngine::new();
                for i in 0..subscriptions {
                    engine
                        .register(
                            &replica,
                            "SELECT count(*) FROM users WHERE age > $1",
                            &[Value::Integer(i as i64 % 90)],
                            Box::new(FnSubscriber(|update: &LiveUpdate| {
                                black_box(update);
                            })),
                        )
                        .unwrap();
                }
                b.iter(|| engine.invalidate(black_box(&replica)))
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_clock,
    bench_sql,
    bench_export,
    bench_live_queries,
);
criterion_main!(benches);
