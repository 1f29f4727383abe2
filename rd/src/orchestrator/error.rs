//! Orchestrator error types

use thiserror::Error;

use crate::ralph::LoopError;
use crate::tasks::{StateError, StructuralError, TaskError};

/// Failures that abort a run
///
/// A blocked task is not one of these; it is reported in the RunReport.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error("Task lifecycle violation: {0}")]
    Task(#[from] TaskError),

    #[error("Execution state unavailable: {0}")]
    State(#[from] StateError),
}

impl From<LoopError> for OrchestratorError {
    fn from(err: LoopError) -> Self {
        match err {
            LoopError::Task(e) => Self::Task(e),
            LoopError::State(e) => Self::State(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_message_is_transparent() {
        let err = OrchestratorError::from(StructuralError::DuplicateTask { id: "A".to_string() });
        assert_eq!(err.to_string(), "Duplicate task id: A");
    }

    #[test]
    fn test_loop_error_maps_to_task() {
        let err = OrchestratorError::from(LoopError::Task(TaskError::NotFound { id: "X".to_string() }));
        assert!(matches!(err, OrchestratorError::Task(_)));
    }
}
