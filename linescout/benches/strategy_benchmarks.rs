#![allow(unused_must_use)]

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use linescout::dataset::{DatasetSnapshot, DatasetStore};
use linescout::search::{all_strategies, strategy_by_name};
use std::{fs::File, io::Write};
use tempfile::tempdir;

fn create_dataset_file(
    dir: &tempfile::TempDir,
    name: &str,
    line_count: usize,
) -> std::io::Result<std::path::PathBuf> {
    let path = dir.path().join(name);
    let mut file = File::create(&path)?;
    for i in 0..line_count {
        writeln!(file, "{};0;{};28;0;23;{};0;", i, i % 64, i % 7)?;
    }
    Ok(path)
}

fn build_snapshot(line_count: usize) -> DatasetSnapshot {
    let mut text = String::new();
    for i in 0..line_count {
        text.push_str(&format!("{};0;{};28;0;23;{};0;\n", i, i % 64, i % 7));
    }
    DatasetSnapshot::from_text(&text)
}

fn bench_strategy_comparison(c: &mut Criterion) {
    let snapshot = build_snapshot(10_000);
    // Last line: worst case for the linear scan.
    let hit = "9999;0;15;28;0;23;3;0;".to_string();
    let miss = "not;in;the;dataset".to_string();

    let mut group = c.benchmark_group("Strategy Comparison");
    for strategy in all_strategies() {
        // Pay the binary strategy's one-time sort outside measurement.
        strategy.matches(&snapshot, &hit);

        group.bench_function(format!("{}_hit", strategy.name()), |b| {
            b.iter(|| black_box(strategy.matches(&snapshot, black_box(&hit))));
        });
        group.bench_function(format!("{}_miss", strategy.name()), |b| {
            b.iter(|| black_box(strategy.matches(&snapshot, black_box(&miss))));
        });
    }
    group.finish();
}

fn bench_dataset_scaling(c: &mut Criterion) {
    let line_counts = vec![1_000, 10_000, 100_000];

    let mut group = c.benchmark_group("Dataset Scaling");
    for &count in &line_counts {
        let snapshot = build_snapshot(count);
        let miss = "not;in;the;dataset".to_string();

        for name in ["set", "linear"] {
            let strategy = strategy_by_name(name).unwrap();
            group.bench_function(format!("{}_{}_lines", name, count), |b| {
                b.iter(|| black_box(strategy.matches(&snapshot, black_box(&miss))));
            });
        }
    }
    group.finish();
}

fn bench_reread_policy(c: &mut Criterion) -> std::io::Result<()> {
    let dir = tempdir().unwrap();
    let path = create_dataset_file(&dir, "bench.txt", 10_000)?;

    let cached = DatasetStore::open(&path, false).unwrap();
    let reread = DatasetStore::open(&path, true).unwrap();

    let mut group = c.benchmark_group("Reread Policy");
    group.bench_function("cached_snapshot", |b| {
        b.iter(|| black_box(cached.snapshot().unwrap()));
    });
    group.bench_function("reread_snapshot", |b| {
        b.iter(|| black_box(reread.snapshot().unwrap()));
    });
    group.finish();
    Ok(())
}

fn bench_snapshot_build(c: &mut Criterion) -> std::io::Result<()> {
    let dir = tempdir().unwrap();
    let path = create_dataset_file(&dir, "build.txt", 50_000)?;
    let text = std::fs::read_to_string(&path)?;

    let mut group = c.benchmark_group("Snapshot Build");
    group.bench_function("from_text_50k_lines", |b| {
        b.iter(|| black_box(DatasetSnapshot::from_text(black_box(&text))));
    });
    group.finish();
    Ok(())
}

criterion_group! {
    name = benches;
    config = Criterion::default();
    targets = bench_strategy_comparison, bench_dataset_scaling,
              bench_reread_policy, bench_snapshot_build
}

#[test]
fn ensure_benchmarks_valid() {
    benches();
}

criterion_main!(benches);
