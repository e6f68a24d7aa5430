//! Fuzz target: the batch size must never change the result.
//!
//! Records are generated sorted on the group fields, then aggregated once in
//! a single batch and once with a fuzzer-chosen batch size.

#![no_main]

use arbitrary::Arbitrary;
use groupflow_core::{
    AggregateSpec, AggregationPlan, AggregatorOptions, GroupDefinition, StreamAggregator,
    VariableDef, VariableKind, VecSource,
};
use libfuzzer_sys::fuzz_target;
use serde_json::{json, Value};

#[derive(Debug, Arbitrary)]
enum Amount {
    Int(i32),
    Float(f32),
    Text(String),
    Missing,
}

#[derive(Debug, Arbitrary)]
struct Row {
    region: u8,
    store: u8,
    amount: Amount,
}

#[derive(Debug, Arbitrary)]
struct Input {
    rows: Vec<Row>,
    batch_size: u8,
    cumulative: bool,
}

fn to_record(row: &Row) -> Value {
    let amount = match &row.amount {
        Amount::Int(i) => json!(i),
        Amount::Float(f) if f.is_finite() => json!(f),
        Amount::Text(s) => json!(s),
        Amount::Float(_) | Amount::Missing => Value::Null,
    };
    json!({"region": row.region % 4, "store": row.store % 8, "amount": amount})
}

fn plan(cumulative: bool) -> AggregationPlan {
    AggregationPlan::new()
        .with_group(GroupDefinition::new("region", 1, ["region"]))
        .with_group(GroupDefinition::new("store", 2, ["store"]))
        .with_aggregate(AggregateSpec::count())
        .with_aggregate(AggregateSpec::sum("amount"))
        .with_aggregate(AggregateSpec::max("amount"))
        .with_aggregate(AggregateSpec::first("amount"))
        .with_variable(VariableDef::new("rows", VariableKind::Count))
        .with_variable(
            VariableDef::new("store_amount", VariableKind::Sum)
                .with_field("amount")
                .reset_on_group(2),
        )
        .cumulative(cumulative)
}

fn aggregate(records: Vec<Value>, batch_size: usize, cumulative: bool) -> Option<Value> {
    let options = AggregatorOptions::default().with_batch_size(batch_size);
    let mut aggregator = StreamAggregator::with_options(plan(cumulative), options).ok()?;
    let result = aggregator.run(&mut VecSource::new(records)).ok()?;
    Some(json!({
        "groups": result.table.to_json(),
        "variables": serde_json::to_value(&result.variables_final).ok()?,
        "records": result.record_count,
    }))
}

fuzz_target!(|input: Input| {
    let mut rows = input.rows;
    rows.truncate(512);
    rows.sort_by_key(|row| (row.region % 4, row.store % 8));
    let records: Vec<Value> = rows.iter().map(to_record).collect();
    let batch_size = usize::from(input.batch_size.max(1));

    let whole = aggregate(records.clone(), 4096, input.cumulative);
    let batched = aggregate(records, batch_size, input.cumulative);
    assert_eq!(whole, batched);
});
