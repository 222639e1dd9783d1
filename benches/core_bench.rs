//! Benchmarks for viper container operations.
//!
//! Run with: cargo bench
//!
//! Results include 95% confidence intervals via Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use viper::core::hasher::hash_record;
use viper::{Host, Hosts, Item, Registry, Task, TaskResult, TaskResults, WhereCondition};

fn hosts(n: usize) -> Hosts {
    Hosts::from_items((0..n).map(|i| {
        Host::new(format!("10.{}.{}.{}", i / 65536 % 256, i / 256 % 256, i % 256))
            .with_hostname(format!("node{}", i))
            .with_meta("rack", (i % 16) as u64)
    }))
}

fn results(n: usize) -> TaskResults {
    let mut reg = Registry::new();
    let factory = reg.register_command("bench.echo", |h: &Host, _: &[String]| {
        Ok(vec!["echo".to_string(), h.ip.clone()])
    });
    let task = Task::new("bench", factory).with_retry(3);
    TaskResults::from_items((0..n).map(|i| {
        let trigger = (i / 64) as f64;
        let retry = (i % 4) as u32;
        TaskResult {
            trigger_time: trigger,
            task: task.clone(),
            host: Host::new(format!("10.0.{}.{}", i / 256 % 256, (i / 4) % 16)),
            args: Vec::new(),
            command: vec!["echo".to_string()],
            stdout: format!("out {}", i),
            stderr: String::new(),
            returncode: if retry == 3 { 0 } else { 1 },
            start: trigger + retry as f64,
            end: trigger + retry as f64 + 0.5,
            retry,
        }
    }))
}

fn bench_dedup(c: &mut Criterion) {
    let mut group = c.benchmark_group("from_items_dedup");
    for size in [100, 1_000, 10_000] {
        let base = hosts(size);
        let doubled: Vec<Host> = base.iter().chain(base.iter()).cloned().collect();
        group.bench_with_input(BenchmarkId::from_parameter(size), &doubled, |b, items| {
            b.iter(|| black_box(Hosts::from_items(items.iter().cloned())));
        });
    }
    group.finish();
}

fn bench_where(c: &mut Criterion) {
    let mut group = c.benchmark_group("where_field");
    for size in [100, 1_000, 10_000] {
        let items = hosts(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &items, |b, items| {
            b.iter(|| {
                black_box(items.where_field("ip", WhereCondition::StartsWith, &["10.0.1"]));
            });
        });
    }
    group.finish();
}

fn bench_order_by(c: &mut Criterion) {
    let mut group = c.benchmark_group("order_by");
    for size in [100, 1_000] {
        let items = hosts(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &items, |b, items| {
            b.iter(|| black_box(items.order_by(&["meta.rack", "hostname"], true)));
        });
    }
    group.finish();
}

fn bench_final(c: &mut Criterion) {
    let mut group = c.benchmark_group("final_results");
    for size in [256, 4_096] {
        let items = results(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &items, |b, items| {
            b.iter(|| black_box(items.final_results()));
        });
    }
    group.finish();
}

fn bench_hash_record(c: &mut Criterion) {
    let record = results(1).first().map(Item::to_record).unwrap_or_default();
    c.bench_function("hash_record", |b| {
        b.iter(|| black_box(hash_record(black_box(&record))));
    });
}

criterion_group!(
    benches,
    bench_dedup,
    bench_where,
    bench_order_by,
    bench_final,
    bench_hash_record
);
criterion_main!(benches);
