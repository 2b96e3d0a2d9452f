// Engine Errors
// Top-level error type for scheduling, configuration, and script loading

use crate::script::{ParseError, ValidationError};

use std::io;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Errors surfaced by the scheduler control surface and the loaders
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Scheduler '{0}' is already started")]
    AlreadyStarted(String),

    #[error("Scheduler '{0}' is not started")]
    NotStarted(String),

    #[error("Invalid execution plan: {0}")]
    InvalidPlan(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Script error: {0}")]
    Script(#[from] ParseError),

    #[error("Script validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error("Run task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<Vec<ValidationError>> for EngineError {
    fn from(errors: Vec<ValidationError>) -> Self {
        EngineError::Validation(errors)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_listed() {
        let err = EngineError::from(vec![
            ValidationError::new("duplicate step 'A'", "steps[1]"),
            ValidationError::new("unknown step 'B'", "matrices[0].actions[0]"),
        ]);

        let output = err.to_string();
        assert!(output.contains("duplicate step 'A'"));
        assert!(output.contains("unknown step 'B'"));
    }

    #[test]
    fn test_already_started_message() {
        let err = EngineError::AlreadyStarted("nightly".to_string());
        assert_eq!(err.to_string(), "Scheduler 'nightly' is already started");
    }
}
