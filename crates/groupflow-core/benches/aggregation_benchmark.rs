//! Throughput of the streaming aggregator at different scales.
//!
//! Compares flat and nested grouping, and the cost of footers and variables
//! on top of plain aggregates.

#![allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use groupflow_core::{
    AggregateSpec, AggregationPlan, AggregatorOptions, GroupDefinition, GroupFooter,
    StreamAggregator, VariableDef, VariableKind, VecSource,
};
use serde_json::{json, Value};

fn sorted_records(size: usize) -> Vec<Value> {
    let regions = ["east", "north", "south", "west"];
    (0..size)
        .map(|id| {
            let region = regions[id * regions.len() / size.max(1)];
            json!({
                "region": region,
                "store": format!("s{:03}", (id / 50) % 1000),
                "amount": (id % 1000) as f64 + 0.99,
                "qty": (id % 7) as i64,
            })
        })
        .collect()
}

fn flat_plan() -> AggregationPlan {
    AggregationPlan::new()
        .with_group(GroupDefinition::new("region", 1, ["region"]))
        .with_aggregate(AggregateSpec::count())
        .with_aggregate(AggregateSpec::sum("amount"))
}

fn nested_plan() -> AggregationPlan {
    AggregationPlan::new()
        .with_group(GroupDefinition::new("region", 1, ["region"]))
        .with_group(GroupDefinition::new("store", 2, ["store"]))
        .with_aggregate(AggregateSpec::count())
        .with_aggregate(AggregateSpec::sum("amount"))
        .with_aggregate(AggregateSpec::avg("qty"))
        .with_aggregate(AggregateSpec::max("amount"))
        .cumulative(true)
}

fn with_variables(plan: AggregationPlan) -> AggregationPlan {
    plan.with_variable(VariableDef::new("rows", VariableKind::Count))
        .with_variable(
            VariableDef::new("region_amount", VariableKind::Sum)
                .with_field("amount")
                .reset_on_group(1),
        )
}

fn bench_flat_grouping(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregation_flat");
    group.sample_size(20);

    for size in [1_000, 10_000, 100_000] {
        let records = sorted_records(size);
        group.bench_with_input(BenchmarkId::new("sum_count", size), &size, |b, _| {
            b.iter(|| {
                let mut aggregator = StreamAggregator::new(flat_plan()).expect("plan");
                let result = aggregator.run(&mut VecSource::new(records.clone()));
                black_box(result)
            });
        });
    }

    group.finish();
}

fn bench_nested_grouping(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregation_nested");
    group.sample_size(20);

    for size in [1_000, 10_000, 100_000] {
        let records = sorted_records(size);
        group.bench_with_input(BenchmarkId::new("cumulative", size), &size, |b, _| {
            b.iter(|| {
                let mut aggregator = StreamAggregator::new(nested_plan()).expect("plan");
                let result = aggregator.run(&mut VecSource::new(records.clone()));
                black_box(result)
            });
        });
    }

    group.finish();
}

fn bench_footers_and_variables(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregation_footers");
    group.sample_size(20);

    for size in [10_000, 100_000] {
        let records = sorted_records(size);
        group.bench_with_input(BenchmarkId::new("variables", size), &size, |b, _| {
            b.iter(|| {
                let plan = with_variables(nested_plan());
                let mut aggregator = StreamAggregator::new(plan).expect("plan");
                let mut footers: Vec<GroupFooter> = Vec::new();
                let result =
                    aggregator.run_with_footers(&mut VecSource::new(records.clone()), &mut footers);
                black_box((result, footers.len()))
            });
        });
    }

    group.finish();
}

fn bench_batch_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregation_batch_size");
    group.sample_size(20);
    let records = sorted_records(50_000);

    for batch_size in [16, 256, 4096] {
        group.bench_with_input(
            BenchmarkId::new("batch", batch_size),
            &batch_size,
            |b, &batch_size| {
                b.iter(|| {
                    let options = AggregatorOptions::default().with_batch_size(batch_size);
                    let mut aggregator =
                        StreamAggregator::with_options(nested_plan(), options).expect("plan");
                    let result = aggregator.run(&mut VecSource::new(records.clone()));
                    black_box(result)
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_flat_grouping,
    bench_nested_grouping,
    bench_footers_and_variables,
    bench_batch_size
);

criterion_main!(benches);
