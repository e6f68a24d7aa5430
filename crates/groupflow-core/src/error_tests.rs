//! Tests for error module

#[cfg(test)]
mod tests {
    use crate::error::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::QuerySource("x".into()).code(), "GFLOW-001");
        assert_eq!(Error::AggregationNotFound("x".into()).code(), "GFLOW-002");
        assert_eq!(Error::DoubleConsumption("x".into()).code(), "GFLOW-004");
        assert_eq!(Error::GroupLimitExceeded { limit: 1 }.code(), "GFLOW-007");
        assert_eq!(Error::Cancelled { records: 0 }.code(), "GFLOW-008");
    }

    #[test]
    fn test_display_carries_code() {
        // Arrange
        let err = Error::GroupLimitExceeded { limit: 10000 };

        // Act
        let text = err.to_string();

        // Assert
        assert_eq!(text, "[GFLOW-007] Too many groups (limit: 10000)");
    }

    #[test]
    fn test_fatality() {
        // Arrange
        let fold = FoldError::NotNumeric {
            target: "sum_amt".into(),
            field: "amt".into(),
            found: "string \"x\"".into(),
        };

        // Act & Assert
        assert!(Error::QuerySource("db down".into()).is_fatal());
        assert!(Error::DoubleConsumption("memory".into()).is_fatal());
        assert!(!Error::AggregationNotFound("A".into()).is_fatal());
        assert!(!Error::from(fold).is_fatal());
    }

    #[test]
    fn test_fold_error_target_and_message() {
        // Arrange
        let err = FoldError::Incomparable {
            target: "max_v".into(),
            current: "number".into(),
            found: "string".into(),
        };

        // Act & Assert
        assert_eq!(err.target(), "max_v");
        assert_eq!(err.to_string(), "'max_v' cannot compare number with string");
    }

    #[test]
    fn test_fold_error_serializes_tagged() {
        // Arrange
        let err = FoldError::Custom {
            target: "v".into(),
            name: "concat".into(),
            message: "boom".into(),
        };

        // Act
        let json = serde_json::to_value(&err).expect("serialize");

        // Assert
        assert_eq!(json["type"], "custom");
        assert_eq!(json["name"], "concat");
    }

    #[test]
    fn test_io_and_json_conversions() {
        // Arrange
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();

        // Act & Assert
        assert_eq!(Error::from(io).code(), "GFLOW-010");
        assert_eq!(Error::from(json).code(), "GFLOW-011");
    }
}
