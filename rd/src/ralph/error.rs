//! Ralph-Loop error types

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::domain::CorrectionAttempt;
use crate::llm::LlmError;

/// Failure to apply a correction plan; the target file is left untouched
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The search text is not present verbatim; the plan is stale
    #[error("Patch mismatch: search text not found in {path}")]
    PatchMismatch { path: PathBuf },

    #[error("Failed to write correction: {0}")]
    Store(#[from] specstore::StoreError),

    #[error("No backup recorded for {path}")]
    NoBackup { path: PathBuf },
}

/// Failure inside a correction generator
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("LLM request failed: {0}")]
    Llm(#[from] LlmError),

    #[error("Prompt template error: {0}")]
    Template(String),
}

/// A task ran out of correction attempts
///
/// Carries the full attempt history so the task can be resumed by hand.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[error("Task {task_id} blocked after {attempts} correction attempts")]
pub struct ExhaustionError {
    pub task_id: String,
    pub attempts: u32,
    pub history: Vec<CorrectionAttempt>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion_message() {
        let err = ExhaustionError {
            task_id: "A".to_string(),
            attempts: 3,
            history: Vec::new(),
        };
        assert_eq!(err.to_string(), "Task A blocked after 3 correction attempts");
    }

    #[test]
    fn test_patch_mismatch_message() {
        let err = ApplyError::PatchMismatch {
            path: PathBuf::from("src/a.js"),
        };
        assert!(err.to_string().contains("src/a.js"));
    }
}
