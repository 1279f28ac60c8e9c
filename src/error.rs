//! Error types for the FRAM engine

use thiserror::Error;

/// Error number reported for a missing request or request parameter
pub const ERROR_NULL_ARGUMENT: i32 = 1001;
/// Error number reported for an out-of-domain parameter value
pub const ERROR_INVALID_VALUE: i32 = 1002;
/// Error number reported for inconsistent array lengths
pub const ERROR_INVALID_FORMAT: i32 = 1003;
/// Error number reported for any other failure
pub const ERROR_UNCLASSIFIED: i32 = 1004;

/// Errors that can occur during scoring
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("{0}")]
    NullArgument(String),

    #[error("InvalidDataValueException for parameter {field} at Index {index} contains Value {value}")]
    InvalidValue {
        field: String,
        index: usize,
        value: String,
    },

    #[error("{0}")]
    InvalidFormat(String),

    #[error("Invalid time value: {0}")]
    TimeFormat(String),

    #[error("Date parse error: {0}")]
    DateParseError(String),

    #[error("Sleep/wake simulation unsolvable in gap {gap} (grid {grid}): {filter}")]
    SimulationUnsolvable {
        gap: usize,
        grid: String,
        filter: String,
    },

    #[error("Internal computation error: {0}")]
    Internal(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl ComputeError {
    /// Numeric error code carried in the response contract
    pub fn error_number(&self) -> i32 {
        match self {
            ComputeError::NullArgument(_) => ERROR_NULL_ARGUMENT,
            ComputeError::InvalidValue { .. } => ERROR_INVALID_VALUE,
            ComputeError::InvalidFormat(_) => ERROR_INVALID_FORMAT,
            _ => ERROR_UNCLASSIFIED,
        }
    }

    pub(crate) fn unsolvable(gap: usize, grid: impl Into<String>, filter: impl Into<String>) -> Self {
        ComputeError::SimulationUnsolvable {
            gap,
            grid: grid.into(),
            filter: filter.into(),
        }
    }

    pub(crate) fn invalid_value(field: &str, index: usize, value: impl ToString) -> Self {
        ComputeError::InvalidValue {
            field: field.to_string(),
            index,
            value: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_error_numbers() {
        assert_eq!(ComputeError::NullArgument("x".into()).error_number(), 1001);
        assert_eq!(ComputeError::invalid_value("IdxInBlock", 0, 0).error_number(), 1002);
        assert_eq!(ComputeError::InvalidFormat("x".into()).error_number(), 1003);
        assert_eq!(ComputeError::unsolvable(1, "default", "length").error_number(), 1004);
        assert_eq!(ComputeError::TimeFormat("25".into()).error_number(), 1004);
    }

    #[test]
    fn test_invalid_value_message() {
        let err = ComputeError::invalid_value("IsaHomeStandbyFlag", 3, 2);
        assert_eq!(
            err.to_string(),
            "InvalidDataValueException for parameter IsaHomeStandbyFlag at Index 3 contains Value 2"
        );
    }
}
