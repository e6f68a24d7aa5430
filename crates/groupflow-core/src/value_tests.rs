//! Tests for value module

#[cfg(test)]
mod tests {
    use crate::value::*;
    use serde_json::json;
    use std::cmp::Ordering;
    use std::collections::HashSet;

    #[test]
    fn test_get_field_dot_notation() {
        // Arrange
        let record = json!({"customer": {"address": {"city": "Lyon"}}, "id": 1});

        // Act & Assert
        assert_eq!(get_field(&record, "customer.address.city"), Some(&json!("Lyon")));
        assert_eq!(get_field(&record, "id"), Some(&json!(1)));
        assert_eq!(get_field(&record, "customer.zip"), None);
    }

    #[test]
    fn test_as_number_only_accepts_numbers() {
        assert_eq!(as_number(&json!(2.5)), Some(2.5));
        assert_eq!(as_number(&json!(-3)), Some(-3.0));
        assert_eq!(as_number(&json!("2.5")), None);
        assert_eq!(as_number(&json!(null)), None);
    }

    #[test]
    fn test_number_to_json_keeps_integers_integral() {
        assert_eq!(number_to_json(15.0), json!(15));
        assert_eq!(number_to_json(2.5), json!(2.5));
        assert_eq!(number_to_json(f64::NAN), json!(null));
        assert_eq!(number_to_json(9_007_199_254_740_992.0), json!(9_007_199_254_740_992_i64));
    }

    #[test]
    fn test_describe_truncates_long_values() {
        // Arrange
        let long = json!("x".repeat(100));

        // Act
        let text = describe(&long);

        // Assert
        assert!(text.starts_with("string \""));
        assert!(text.ends_with("..."));
        assert!(text.len() < 60);
    }

    #[test]
    fn test_scalar_numbers_compare_numerically() {
        // Arrange
        let int = Scalar::natural(&json!(10));
        let float = Scalar::natural(&json!(10.0));

        // Act & Assert
        assert_eq!(int, float);
        assert_eq!(
            Scalar::natural(&json!(2)).try_cmp(&Scalar::natural(&json!(10))),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn test_scalar_large_integers_stay_distinct() {
        // Arrange
        let ids: Vec<Scalar> = [9_007_199_254_740_992_u64, 9_007_199_254_740_993, 9_007_199_254_740_994]
            .iter()
            .map(|id| Scalar::natural(&json!(id)))
            .collect();

        // Act
        let distinct: HashSet<&Scalar> = ids.iter().collect();

        // Assert
        assert_eq!(distinct.len(), 3);
        assert_ne!(ids[0], ids[1]);
        assert_eq!(ids[0].try_cmp(&ids[1]), Some(Ordering::Less));
        assert_eq!(ids[1].to_json(), json!(9_007_199_254_740_993_u64));
    }

    #[test]
    fn test_scalar_u64_range_compares_exactly() {
        // Arrange
        let big = Scalar::natural(&json!(u64::MAX));
        let below = Scalar::natural(&json!(u64::MAX - 1));
        let negative = Scalar::natural(&json!(-1));

        // Act & Assert
        assert!(matches!(big, Scalar::UInt(_)));
        assert_ne!(big, below);
        assert_eq!(below.try_cmp(&big), Some(Ordering::Less));
        assert_eq!(negative.try_cmp(&big), Some(Ordering::Less));
        assert_eq!(big.to_json(), json!(u64::MAX));
    }

    #[test]
    fn test_scalar_integral_float_matches_integer() {
        // Arrange
        let as_int = Scalar::natural(&json!(9_007_199_254_740_992_i64));
        let as_float = Scalar::natural(&json!(9_007_199_254_740_992.0));
        let mut hashes = HashSet::new();

        // Act
        hashes.insert(as_int.clone());
        hashes.insert(as_float.clone());

        // Assert
        assert_eq!(as_int, as_float);
        assert_eq!(hashes.len(), 1);
        assert_eq!(Scalar::natural(&json!(2.5)).try_cmp(&as_int), Some(Ordering::Less));
    }

    #[test]
    fn test_scalar_cross_type_is_incomparable() {
        assert_eq!(Scalar::from(1).try_cmp(&Scalar::from("1")), None);
        assert_ne!(Scalar::Null, Scalar::from("null"));
        assert_eq!(Scalar::Null, Scalar::Null);
    }

    #[test]
    fn test_scalar_negative_zero_equals_zero() {
        assert_eq!(Scalar::from(-0.0), Scalar::from(0.0));
    }

    #[test]
    fn test_field_type_conversions() {
        assert_eq!(
            Scalar::from_json(&json!(" 42 "), FieldType::Numeric),
            Scalar::Int(42)
        );
        assert_eq!(
            Scalar::from_json(&json!("9007199254740993"), FieldType::Numeric),
            Scalar::Int(9_007_199_254_740_993)
        );
        assert_eq!(
            Scalar::from_json(&json!(42), FieldType::String),
            Scalar::String("42".to_string())
        );
        assert_eq!(
            Scalar::from_json(&json!("not a number"), FieldType::Numeric),
            Scalar::String("not a number".to_string())
        );
    }

    #[test]
    fn test_date_formats_parse_to_same_instant() {
        // Arrange
        let formats = [
            "2024-03-01",
            "2024-03-01 00:00:00",
            "2024-03-01T00:00:00",
            "2024-03-01T01:00:00+01:00",
        ];

        // Act
        let parsed: Vec<Scalar> = formats
            .iter()
            .map(|text| Scalar::from_json(&json!(text), FieldType::Date))
            .collect();

        // Assert
        assert!(matches!(parsed[0], Scalar::Date(_)));
        assert!(parsed.iter().all(|scalar| *scalar == parsed[0]));
    }

    #[test]
    fn test_date_renders_as_rfc3339() {
        // Arrange
        let date = Scalar::from_json(&json!("2024-03-01"), FieldType::Date);

        // Act & Assert
        assert_eq!(date.to_json(), json!("2024-03-01T00:00:00.000Z"));
    }

    #[test]
    fn test_json_type_name() {
        assert_eq!(json_type_name(&json!({})), "object");
        assert_eq!(json_type_name(&json!([])), "array");
        assert_eq!(json_type_name(&json!(true)), "boolean");
    }
}
