//! TaskManager error types

use thiserror::Error;

use crate::domain::TaskStatus;

/// Fatal problems with the declared task set, raised before execution begins
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StructuralError {
    #[error("Cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Duplicate task id: {id}")]
    DuplicateTask { id: String },

    #[error("Task {task} depends on unknown task {dep}")]
    UnknownDependency { task: String, dep: String },

    #[error("Malformed task descriptor: {0}")]
    MalformedDescriptor(String),
}

/// Violations of the task lifecycle rules
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("Task not found: {id}")]
    NotFound { id: String },

    #[error("Invalid transition for {id}: {from} -> {to}")]
    InvalidTransition { id: String, from: TaskStatus, to: TaskStatus },

    #[error("Cannot start {id}: {running} is already in progress")]
    AlreadyInProgress { id: String, running: String },

    #[error("Cannot start {id}: dependency {dep} is not completed")]
    DependencyPending { id: String, dep: String },
}

/// Failures reading or writing the persisted execution state
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Failed to write state: {0}")]
    Store(#[from] specstore::StoreError),

    #[error("Failed to read state file {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt state document: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_shows_path() {
        let err = StructuralError::CyclicDependency {
            cycle: vec!["A".to_string(), "B".to_string(), "A".to_string()],
        };
        assert_eq!(err.to_string(), "Cyclic dependency: A -> B -> A");
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = TaskError::InvalidTransition {
            id: "A".to_string(),
            from: TaskStatus::Completed,
            to: TaskStatus::InProgress,
        };
        assert!(err.to_string().contains("completed -> in_progress"));
    }
}
