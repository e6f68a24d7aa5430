//! Tests for accumulator module

#[cfg(test)]
mod tests {
    use crate::accumulator::*;
    use crate::condition::Condition;
    use crate::error::FoldError;
    use crate::plan::AggregateSpec;
    use crate::value::Scalar;
    use serde_json::{json, Value};

    fn fold_all(specs: &[AggregateSpec], records: &[Value]) -> AggregationAccumulator {
        let program = AggregateProgram::compile(specs);
        let mut acc = AggregationAccumulator::new(&program);
        for (seq, record) in records.iter().enumerate() {
            let inputs = program.evaluate(record).expect("evaluate");
            acc.apply(&inputs, seq as u64 + 1).expect("apply");
        }
        acc
    }

    // ========================================================================
    // Program compilation
    // ========================================================================

    #[test]
    fn test_program_ids_follow_configuration_order() {
        // Arrange
        let specs = [
            AggregateSpec::count(),
            AggregateSpec::sum("amt"),
            AggregateSpec::max("amt").with_id("peak"),
        ];

        // Act
        let program = AggregateProgram::compile(&specs);

        // Assert
        assert_eq!(program.ids(), ["count", "sum_amt", "peak"]);
        assert_eq!(program.len(), 3);
        assert!(!program.is_empty());
    }

    // ========================================================================
    // Folding
    // ========================================================================

    #[test]
    fn test_sum_and_count_over_group() {
        // Arrange
        let records = [json!({"amt": 10}), json!({"amt": 5})];

        // Act
        let acc = fold_all(&[AggregateSpec::sum("amt"), AggregateSpec::count()], &records);

        // Assert
        assert_eq!(acc.count(), 2);
        assert_eq!(acc.sum("sum_amt"), Some(15.0));
        assert_eq!(acc.value("sum_amt"), Some(json!(15)));
        assert_eq!(acc.value("count"), Some(json!(2)));
    }

    #[test]
    fn test_avg_min_max() {
        // Arrange
        let records = [json!({"x": 4}), json!({"x": 1}), json!({"x": 7})];

        // Act
        let acc = fold_all(
            &[
                AggregateSpec::avg("x"),
                AggregateSpec::min("x"),
                AggregateSpec::max("x"),
            ],
            &records,
        );

        // Assert
        assert_eq!(acc.avg("avg_x"), Some(4.0));
        assert_eq!(acc.min("min_x"), Some(&Scalar::Number(1.0)));
        assert_eq!(acc.max("max_x"), Some(&Scalar::Number(7.0)));
    }

    #[test]
    fn test_nulls_and_missing_fields_are_skipped() {
        // Arrange
        let records = [json!({"x": 2}), json!({"x": null}), json!({"y": 1})];

        // Act
        let acc = fold_all(
            &[
                AggregateSpec::count(),
                AggregateSpec::count_field("x"),
                AggregateSpec::avg("x"),
            ],
            &records,
        );

        // Assert
        assert_eq!(acc.count(), 3);
        assert_eq!(acc.counted("count"), Some(3));
        assert_eq!(acc.counted("count_x"), Some(1));
        assert_eq!(acc.avg("avg_x"), Some(2.0));
    }

    #[test]
    fn test_empty_sum_reads_as_null() {
        // Arrange
        let records = [json!({"other": 1})];

        // Act
        let acc = fold_all(&[AggregateSpec::sum("amt")], &records);

        // Assert
        assert_eq!(acc.sum("sum_amt"), None);
        assert_eq!(acc.value("sum_amt"), Some(Value::Null));
    }

    #[test]
    fn test_first_and_last_keep_stream_order() {
        // Arrange
        let records = [
            json!({"name": null}),
            json!({"name": "a"}),
            json!({"name": "b"}),
            json!({"name": null}),
        ];

        // Act
        let acc = fold_all(&[AggregateSpec::first("name"), AggregateSpec::last("name")], &records);

        // Assert
        assert_eq!(acc.first("first_name"), Some(&json!("a")));
        assert_eq!(acc.last("last_name"), Some(&json!("b")));
    }

    #[test]
    fn test_conditional_aggregates() {
        // Arrange
        let refunds = Condition::eq("kind", "refund");
        let records = [
            json!({"kind": "sale", "amt": 10}),
            json!({"kind": "refund", "amt": 3}),
            json!({"kind": "refund", "amt": 4}),
        ];

        // Act
        let acc = fold_all(
            &[
                AggregateSpec::count_where("refunds", refunds.clone()),
                AggregateSpec::sum_where("refunded", "amt", refunds),
            ],
            &records,
        );

        // Assert
        assert_eq!(acc.conditional_count("refunds"), Some(2));
        assert_eq!(acc.conditional_sum("refunded"), Some(7.0));
    }

    #[test]
    fn test_unknown_id_returns_none() {
        // Arrange
        let acc = fold_all(&[AggregateSpec::count()], &[json!({})]);

        // Act & Assert
        assert!(acc.value("nope").is_none());
        assert!(acc.sum("count").is_none());
    }

    // ========================================================================
    // Fold errors
    // ========================================================================

    #[test]
    fn test_non_numeric_sum_fails_evaluation() {
        // Arrange
        let program = AggregateProgram::compile(&[AggregateSpec::sum("amt")]);

        // Act
        let err = program.evaluate(&json!({"amt": "ten"})).unwrap_err();

        // Assert
        assert!(matches!(err, FoldError::NotNumeric { ref target, ref field, .. }
            if target == "sum_amt" && field == "amt"));
    }

    #[test]
    fn test_incomparable_min_leaves_accumulator_unchanged() {
        // Arrange
        let program = AggregateProgram::compile(&[AggregateSpec::min("v"), AggregateSpec::count()]);
        let mut acc = AggregationAccumulator::new(&program);
        let first_row = json!({"v": 3});
        let first = program.evaluate(&first_row).expect("evaluate");
        acc.apply(&first, 1).expect("apply");
        let before = acc.clone();

        // Act
        let second_row = json!({"v": "x"});
        let second = program.evaluate(&second_row).expect("evaluate");
        let err = acc.apply(&second, 2).unwrap_err();

        // Assert
        assert!(matches!(err, FoldError::Incomparable { .. }));
        assert_eq!(acc, before);
    }

    // ========================================================================
    // Merge
    // ========================================================================

    #[test]
    fn test_merge_matches_single_pass() {
        // Arrange
        let specs = [
            AggregateSpec::count(),
            AggregateSpec::sum("x"),
            AggregateSpec::avg("x"),
            AggregateSpec::min("x"),
            AggregateSpec::max("x"),
            AggregateSpec::first("x"),
            AggregateSpec::last("x"),
        ];
        let records: Vec<Value> = (1..=6).map(|i| json!({"x": i})).collect();
        let program = AggregateProgram::compile(&specs);
        let mut left = AggregationAccumulator::new(&program);
        let mut right = AggregationAccumulator::new(&program);
        for (i, record) in records.iter().enumerate() {
            let inputs = program.evaluate(record).expect("evaluate");
            let target = if i < 3 { &mut left } else { &mut right };
            target.apply(&inputs, i as u64 + 1).expect("apply");
        }

        // Act
        let mut merged = right.clone();
        merged.merge(&left).expect("merge");
        let whole = fold_all(&specs, &records);

        // Assert
        assert_eq!(merged.to_json(), whole.to_json());
        assert_eq!(merged.first("first_x"), Some(&json!(1)));
        assert_eq!(merged.last("last_x"), Some(&json!(6)));
    }

    #[test]
    fn test_to_json_lists_every_aggregate() {
        // Arrange
        let acc = fold_all(
            &[AggregateSpec::sum("amt"), AggregateSpec::count()],
            &[json!({"amt": 2.5})],
        );

        // Act
        let json = acc.to_json();

        // Assert
        assert_eq!(json, json!({"sum_amt": 2.5, "count": 1}));
    }
}
