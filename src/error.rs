use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    NotFound,
    Throttled,
    Service,
    Malformed,
    Oracle,
    InvalidInput,
    Cancelled,
    Io,
}

impl ErrorCode {
    pub fn label(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Throttled => "throttled",
            Self::Service => "service",
            Self::Malformed => "malformed",
            Self::Oracle => "oracle",
            Self::InvalidInput => "invalid_input",
            Self::Cancelled => "cancelled",
            Self::Io => "io",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code:?}: {message}")]
pub struct DesignError {
    pub code: ErrorCode,
    pub message: String,
}

impl DesignError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Malformed, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn oracle(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Oracle, message)
    }
}

impl From<std::io::Error> for DesignError {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorCode::Io, err.to_string())
    }
}

impl From<serde_json::Error> for DesignError {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed(format!("Invalid JSON: {err}"))
    }
}

impl From<csv::Error> for DesignError {
    fn from(err: csv::Error) -> Self {
        Self::new(ErrorCode::Io, format!("Could not write CSV: {err}"))
    }
}

pub type DesignResult<T> = Result<T, DesignError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_code_and_message() {
        let err = DesignError::not_found("Please verify if FOO1 exist for Homo sapiens");
        assert_eq!(
            err.to_string(),
            "NotFound: Please verify if FOO1 exist for Homo sapiens"
        );
        assert_eq!(err.code.label(), "not_found");
    }

    #[test]
    fn test_json_error_maps_to_malformed() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: DesignError = parse.unwrap_err().into();
        assert_eq!(err.code, ErrorCode::Malformed);
    }
}
