//! Benchmarks for strategy expansion.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use planflow::strategy::{fetch_children, ForLoopConfig, MatrixConfig, StrategyConfig};

fn matrix_config() -> StrategyConfig {
    StrategyConfig::Matrix(
        MatrixConfig::new()
            .with_axis("os", ["linux", "windows", "macos"])
            .with_axis("arch", ["x86", "arm"])
            .with_axis("toolchain", ["stable", "beta", "nightly", "msrv"])
            .with_exclude([("os", "windows"), ("arch", "arm")]),
    )
}

fn strategy_benchmark(c: &mut Criterion) {
    let matrix = matrix_config();
    c.bench_function("expand_matrix_24", |b| {
        b.iter(|| fetch_children(black_box(&matrix), "build"));
    });

    let for_loop = StrategyConfig::ForLoop(ForLoopConfig::new(1_000));
    c.bench_function("expand_for_loop_1000", |b| {
        b.iter(|| fetch_children(black_box(&for_loop), "shard"));
    });

    let postfix_children = fetch_children(&matrix, "build").unwrap_or_default();
    c.bench_function("matrix_identifier_postfix", |b| {
        b.iter(|| {
            postfix_children
                .iter()
                .map(|child| child.strategy_metadata.identifier_postfix(black_box(true)))
                .count()
        });
    });
}

criterion_group!(benches, strategy_benchmark);
criterion_main!(benches);
