//! Tests for plan module

#[cfg(test)]
mod tests {
    use crate::condition::Condition;
    use crate::error::Error;
    use crate::plan::*;
    use std::io::Write;

    fn two_level_plan() -> AggregationPlan {
        AggregationPlan::new()
            .with_group(GroupDefinition::new("region", 1, ["region"]))
            .with_group(GroupDefinition::new("city", 2, ["city"]))
            .with_aggregate(AggregateSpec::sum("amt"))
            .with_aggregate(AggregateSpec::count())
    }

    fn invalid_message(plan: &AggregationPlan) -> String {
        match plan.validate() {
            Err(Error::InvalidPlan(message)) => message,
            other => panic!("expected InvalidPlan, got {other:?}"),
        }
    }

    // ========================================================================
    // Aggregate ids
    // ========================================================================

    #[test]
    fn test_resolved_ids() {
        assert_eq!(AggregateSpec::count().resolved_id(), "count");
        assert_eq!(AggregateSpec::sum("amt").resolved_id(), "sum_amt");
        assert_eq!(AggregateSpec::count_field("x").resolved_id(), "count_x");
        assert_eq!(AggregateSpec::avg("x").with_id("mean").resolved_id(), "mean");
    }

    // ========================================================================
    // Validation
    // ========================================================================

    #[test]
    fn test_valid_plan_passes() {
        assert!(two_level_plan().validate().is_ok());
    }

    #[test]
    fn test_levels_must_be_contiguous() {
        // Arrange
        let plan = AggregationPlan::new()
            .with_group(GroupDefinition::new("a", 1, ["a"]))
            .with_group(GroupDefinition::new("c", 3, ["c"]));

        // Act
        let message = invalid_message(&plan);

        // Assert
        assert!(message.contains("expected 2"));
    }

    #[test]
    fn test_group_needs_field_paths() {
        // Arrange
        let plan = AggregationPlan::new()
            .with_group(GroupDefinition::new("a", 1, Vec::<String>::new()));

        // Act & Assert
        assert!(invalid_message(&plan).contains("no field paths"));
    }

    #[test]
    fn test_duplicate_aggregate_ids_rejected() {
        // Arrange
        let plan = two_level_plan().with_aggregate(AggregateSpec::sum("amt"));

        // Act & Assert
        assert!(invalid_message(&plan).contains("duplicate aggregate id 'sum_amt'"));
    }

    #[test]
    fn test_duplicate_variable_names_rejected() {
        // Arrange
        let plan = two_level_plan()
            .with_variable(VariableDef::new("n", VariableKind::Count))
            .with_variable(VariableDef::new("n", VariableKind::Count));

        // Act & Assert
        assert!(invalid_message(&plan).contains("duplicate variable name"));
    }

    #[test]
    fn test_variable_requirements() {
        let no_source = two_level_plan().with_variable(VariableDef::new("s", VariableKind::Sum));
        assert!(invalid_message(&no_source).contains("requires a source"));

        let no_condition = two_level_plan()
            .with_variable(VariableDef::new("c", VariableKind::CountWhere));
        assert!(invalid_message(&no_condition).contains("requires a condition"));

        let no_fold = two_level_plan().with_variable(VariableDef::new("x", VariableKind::Custom));
        assert!(invalid_message(&no_fold).contains("does not name a fold"));
    }

    #[test]
    fn test_reset_level_out_of_range() {
        // Arrange
        let plan = two_level_plan()
            .with_variable(VariableDef::new("n", VariableKind::Count).reset_on_group(3));

        // Act & Assert
        assert!(invalid_message(&plan).contains("resets on level 3"));
    }

    #[test]
    fn test_reset_level_only_with_group_scope() {
        // Arrange
        let mut variable = VariableDef::new("n", VariableKind::Count);
        variable.reset_group_level = Some(1);
        let plan = two_level_plan().with_variable(variable);

        // Act & Assert
        assert!(invalid_message(&plan).contains("reset_group_level"));
    }

    #[test]
    fn test_group_scope_needs_groups() {
        // Arrange
        let plan = AggregationPlan::new().with_variable(
            VariableDef::new("n", VariableKind::Count).with_reset_scope(ResetScope::Group),
        );

        // Act & Assert
        assert!(invalid_message(&plan).contains("no groups"));
    }

    #[test]
    fn test_conditional_aggregate_needs_condition() {
        // Arrange
        let mut spec = AggregateSpec::count_where("big", Condition::gt("amt", 1));
        spec.condition = None;
        let plan = two_level_plan().with_aggregate(spec);

        // Act & Assert
        assert!(invalid_message(&plan).contains("requires a condition"));
    }

    #[test]
    fn test_sampling_needs_positive_size() {
        // Arrange
        let plan = two_level_plan().with_sample(0, 1);

        // Act & Assert
        assert!(invalid_message(&plan).contains("sample_size"));
    }

    // ========================================================================
    // Cardinality
    // ========================================================================

    #[test]
    fn test_cardinality_warning_above_ceiling() {
        // Arrange
        let plan = AggregationPlan::new()
            .with_group(GroupDefinition::new("a", 1, ["a"]).with_expected_cardinality(1_000))
            .with_group(GroupDefinition::new("b", 2, ["b"]).with_expected_cardinality(5_000));

        // Act
        let warning = plan.check_cardinality(1_000_000).expect("warning");

        // Assert
        assert_eq!(warning.estimated_groups, 5_000_000);
        assert_eq!(warning.levels, vec!["a".to_string(), "b".to_string()]);
        assert!(warning.to_string().contains("a > b"));
    }

    #[test]
    fn test_no_cardinality_warning_without_declarations() {
        assert!(two_level_plan().check_cardinality(1).is_none());
    }

    #[test]
    fn test_cardinality_saturates() {
        // Arrange
        let plan = AggregationPlan::new()
            .with_group(GroupDefinition::new("a", 1, ["a"]).with_expected_cardinality(u64::MAX))
            .with_group(GroupDefinition::new("b", 2, ["b"]).with_expected_cardinality(2));

        // Act & Assert
        assert_eq!(
            plan.check_cardinality(10).map(|w| w.estimated_groups),
            Some(u64::MAX)
        );
    }

    // ========================================================================
    // Parsing
    // ========================================================================

    #[test]
    fn test_from_toml() {
        // Arrange
        let text = r#"
            cumulative = true

            [[groups]]
            name = "region"
            level = 1
            field_paths = ["region"]
            field_type = "string"

            [[aggregates]]
            kind = "sum"
            field = "amount"

            [[aggregates]]
            id = "refunds"
            kind = "count_where"
            condition = { type = "eq", field = "kind", value = "refund" }

            [[variables]]
            name = "region_total"
            kind = "sum"
            source = { field = "amount" }
            reset_scope = "group"
            reset_group_level = 1

            [sample]
            include_sample = true
            sample_size = 10
        "#;

        // Act
        let plan = AggregationPlan::from_toml(text).expect("parse");

        // Assert
        assert!(plan.cumulative);
        assert_eq!(plan.groups[0].field_type, crate::value::FieldType::String);
        assert_eq!(plan.aggregates[1].resolved_id(), "refunds");
        assert_eq!(plan.variables[0].source, Some(SourceExpr::Field("amount".to_string())));
        assert_eq!(plan.variables[0].reset_group_level, Some(1));
        assert_eq!(plan.sample.sample_size, Some(10));
        assert_eq!(plan.sample.seed, None);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_from_json_rejects_unknown_kind() {
        // Arrange
        let text = r#"{"aggregates": [{"kind": "median", "field": "x"}]}"#;

        // Act
        let result = AggregationPlan::from_json(text);

        // Assert
        assert!(matches!(result, Err(Error::InvalidPlan(_))));
    }

    #[test]
    fn test_from_path_picks_format_by_extension() {
        // Arrange
        let mut file = tempfile::Builder::new()
            .suffix(".json")
            .tempfile()
            .expect("tempfile");
        write!(
            file,
            r#"{{"groups": [{{"name": "r", "level": 1, "field_paths": ["r"]}}]}}"#
        )
        .expect("write");

        // Act
        let plan = AggregationPlan::from_path(file.path()).expect("load");

        // Assert
        assert_eq!(plan.depth(), 1);
    }
}
