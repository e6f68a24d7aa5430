//! Fuzz target for the JSON-lines source feeding the aggregator.
//!
//! Arbitrary bytes must either aggregate or fail with a source error. A
//! completed run must account for every record exactly once.

#![no_main]

use groupflow_core::{
    AggregateSpec, AggregationPlan, Condition, Error, GroupDefinition, GroupFooter,
    JsonLinesSource, Lookup, StreamAggregator, VariableDef, VariableKind,
};
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;

/// Inputs above this size only slow the fuzzer down.
const MAX_INPUT: usize = 64 * 1024;

fn plan() -> AggregationPlan {
    AggregationPlan::new()
        .with_group(GroupDefinition::new("a", 1, ["a"]))
        .with_group(GroupDefinition::new("b", 2, ["b.c"]))
        .with_aggregate(AggregateSpec::count())
        .with_aggregate(AggregateSpec::sum("v"))
        .with_aggregate(AggregateSpec::min("v"))
        .with_aggregate(AggregateSpec::last("v"))
        .with_aggregate(AggregateSpec::count_where("big", Condition::gt("v", 100)))
        .with_variable(VariableDef::new("rows", VariableKind::Count))
        .with_variable(VariableDef::new("a_sum", VariableKind::Sum).with_field("v").reset_on_group(1))
        .cumulative(true)
}

fuzz_target!(|data: &[u8]| {
    if data.len() > MAX_INPUT {
        return;
    }

    let Ok(mut aggregator) = StreamAggregator::new(plan()) else {
        return;
    };
    let mut source = JsonLinesSource::new(Cursor::new(data));
    let mut footers: Vec<GroupFooter> = Vec::new();

    match aggregator.run_with_footers(&mut source, &mut footers) {
        Ok(result) => {
            // The grand total sees every record unless its fold failed.
            if let Lookup::Found(total) = result.facade().grand_total() {
                assert_eq!(total.count(), result.record_count);
            }
            if result.record_count > 0 {
                assert_eq!(footers.last().map(|f| f.level), Some(1));
            }
        }
        Err(Error::QuerySource(_) | Error::Io(_)) => {}
        Err(other) => panic!("unexpected error: {other}"),
    }
});
