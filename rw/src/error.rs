//! Error taxonomy for the loop
//!
//! Configuration problems are caught before the first iteration. Collaborator failures
//! reach the controller only after the retry budget is spent. Malformed model output
//! never becomes an error; it is handled as "not completed" where it is parsed.

use std::path::PathBuf;

use thiserror::Error;

use crate::llm::LlmError;
use crate::prompts::PromptError;

/// Startup-time validation failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("LLM API key not found. Set the {0} environment variable.")]
    MissingCredential(String),

    #[error("Prompt must not be empty")]
    EmptyPrompt,

    #[error("Completion phrase must not be empty")]
    EmptyCompletionPhrase,

    #[error("max-iterations must be at least 1 (got {0})")]
    InvalidMaxIterations(u32),

    #[error("history-cap must be at least 1")]
    InvalidHistoryCap,

    #[error("segment-iterations must be at least 1")]
    InvalidSegmentIterations,

    #[error("Invalid config file: {0}")]
    InvalidFile(String),
}

/// Failure of one collaborator call, after the retry budget is spent
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Prompt(#[from] PromptError),
}

/// Errors raised by the loop controller and its checkpoint store
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("{operation} failed: {source}")]
    Collaborator {
        operation: &'static str,
        #[source]
        source: CollaboratorError,
    },

    #[error("Checkpoint I/O failed for {path}: {source}")]
    CheckpointIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Checkpoint encoding failed: {0}")]
    CheckpointFormat(#[from] serde_json::Error),

    #[error("No checkpoint found for run {0}")]
    UnknownRun(String),

    #[error("Run {0} already has a checkpoint; use `rw resume {0}` to continue it")]
    RunExists(String),
}

impl LoopError {
    pub fn collaborator(operation: &'static str, source: impl Into<CollaboratorError>) -> Self {
        LoopError::Collaborator {
            operation,
            source: source.into(),
        }
    }

    /// Whether this error should map to the configuration exit code
    pub fn is_configuration(&self) -> bool {
        matches!(self, LoopError::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_credential_names_variable() {
        let err = ConfigError::MissingCredential("ANTHROPIC_API_KEY".to_string());
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn test_configuration_conversion() {
        let err: LoopError = ConfigError::EmptyPrompt.into();
        assert!(err.is_configuration());

        let err = LoopError::collaborator("execute task", LlmError::InvalidResponse("nope".to_string()));
        assert!(!err.is_configuration());
        assert!(err.to_string().starts_with("execute task failed"));
    }

    #[test]
    fn test_run_exists_points_at_resume() {
        let err = LoopError::RunExists("ralph-loop-0000beef".to_string());
        assert!(!err.is_configuration());
        assert!(err.to_string().contains("rw resume ralph-loop-0000beef"));
    }
}
