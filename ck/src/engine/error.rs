//! Engine error types

use std::time::Duration;

use thiserror::Error;

/// Errors returned across the engine contract
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A structured failure reported by the engine itself (bad source, failed build)
    #[error("{message}")]
    Failed {
        message: String,
        line: Option<u32>,
        column: Option<u32>,
    },

    /// Something the engine did not anticipate (a crash, a panic, a broken harness)
    #[error("Unexpected engine error: {0}")]
    Internal(String),

    /// The engine actor is gone or dropped the reply
    #[error("Engine is unreachable")]
    Unreachable,

    #[error("Engine call timed out after {0:?}")]
    Timeout(Duration),
}

impl EngineError {
    /// Structured failure without a source location
    pub fn failed(message: impl Into<String>) -> Self {
        EngineError::Failed {
            message: message.into(),
            line: None,
            column: None,
        }
    }

    /// Structured failure pointing at a line in the source
    pub fn failed_at(message: impl Into<String>, line: u32) -> Self {
        EngineError::Failed {
            message: message.into(),
            line: Some(line),
            column: None,
        }
    }

    /// Check if this error is an unstructured one (not a diagnostic the engine chose to report)
    pub fn is_unexpected(&self) -> bool {
        matches!(self, EngineError::Internal(_) | EngineError::Unreachable)
    }

    /// Source line, when the engine reported one
    pub fn line(&self) -> Option<u32> {
        match self {
            EngineError::Failed { line, .. } => *line,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_unexpected() {
        assert!(EngineError::Internal("boom".to_string()).is_unexpected());
        assert!(EngineError::Unreachable.is_unexpected());
        assert!(!EngineError::failed("syntax error").is_unexpected());
        assert!(!EngineError::Timeout(Duration::from_secs(1)).is_unexpected());
    }

    #[test]
    fn test_failed_at_line() {
        let err = EngineError::failed_at("Parser error", 12);
        assert_eq!(err.line(), Some(12));
        assert_eq!(err.to_string(), "Parser error");
    }
}
