//! Task domain type
//!
//! A Task is a unit of declared work created once from a parsed TaskDescriptor.
//! Only the TaskManager mutates its status.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Task status in the execution lifecycle
///
/// Transitions: NotStarted → Queued → InProgress → {Completed | failed}.
/// A failed run moves back to Queued while attempts remain, else to Blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Declared, never picked up
    #[default]
    NotStarted,
    /// Eligible to be (re)started
    Queued,
    /// Being executed by the single driver
    InProgress,
    /// Validation passed
    Completed,
    /// Correction attempts exhausted
    Blocked,
}

impl TaskStatus {
    /// Whether the status table allows `self → to`
    pub fn can_transition_to(self, to: TaskStatus) -> bool {
        use TaskStatus::{Blocked, Completed, InProgress, NotStarted, Queued};
        matches!(
            (self, to),
            (NotStarted, Queued)
                | (Queued, InProgress)
                | (InProgress, Completed)
                | (InProgress, Queued)
                | (InProgress, Blocked)
        )
    }

    /// Completed and Blocked never change again
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Blocked)
    }

    /// NotStarted or Queued
    pub fn is_pending(self) -> bool {
        matches!(self, TaskStatus::NotStarted | TaskStatus::Queued)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Queued => write!(f, "queued"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// Parsed task declaration, as produced by a SpecParser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Unique task identifier
    pub id: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Ids of tasks that must complete first
    #[serde(default, alias = "dependencies")]
    pub deps: Vec<String>,

    /// Whether the task is required for the spec to be satisfied; an optional
    /// task that blocks does not fail the run
    #[serde(default = "default_required")]
    pub required: bool,

    /// Validation command; a task without one completes on first execution
    #[serde(default)]
    pub command: Option<String>,
}

fn default_required() -> bool {
    true
}

impl TaskDescriptor {
    /// Create a descriptor with no dependencies and no command
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            deps: Vec::new(),
            required: true,
            command: None,
        }
    }

    /// Builder: set dependencies
    pub fn with_deps<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deps = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Builder: mark the task optional
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Builder: set the validation command
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }
}

/// A unit of declared work with lifecycle state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub deps: Vec<String>,
    pub required: bool,
    pub command: Option<String>,
    pub status: TaskStatus,

    /// Correction attempts consumed so far
    pub attempts: u32,

    pub last_error: Option<String>,
}

impl From<TaskDescriptor> for Task {
    fn from(desc: TaskDescriptor) -> Self {
        debug!(id = %desc.id, deps = ?desc.deps, "Task::from: called");
        Self {
            id: desc.id,
            description: desc.description,
            deps: desc.deps,
            required: desc.required,
            command: desc.command,
            status: TaskStatus::NotStarted,
            attempts: 0,
            last_error: None,
        }
    }
}

impl Task {
    /// Whether every dependency is reported completed by `is_completed`
    pub fn deps_satisfied(&self, mut is_completed: impl FnMut(&str) -> bool) -> bool {
        self.deps.iter().all(|d| is_completed(d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use TaskStatus::*;
        assert!(NotStarted.can_transition_to(Queued));
        assert!(Queued.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Queued));
        assert!(InProgress.can_transition_to(Blocked));

        assert!(!NotStarted.can_transition_to(InProgress));
        assert!(!NotStarted.can_transition_to(Completed));
        assert!(!Queued.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Queued));
        assert!(!Blocked.can_transition_to(Queued));
        assert!(!Blocked.can_transition_to(InProgress));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, r#""in_progress""#);
        assert_eq!(TaskStatus::NotStarted.to_string(), "not_started");
    }

    #[test]
    fn test_descriptor_defaults_from_yaml() {
        let yaml = "id: build\ndependencies: [fetch]\n";
        let desc: TaskDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(desc.id, "build");
        assert_eq!(desc.deps, vec!["fetch".to_string()]);
        assert!(desc.required);
        assert!(desc.command.is_none());
    }

    #[test]
    fn test_task_from_descriptor() {
        let task: Task = TaskDescriptor::new("A", "first")
            .with_deps(["B"])
            .with_command("node a.js")
            .into();
        assert_eq!(task.status, TaskStatus::NotStarted);
        assert_eq!(task.attempts, 0);
        assert_eq!(task.command.as_deref(), Some("node a.js"));
        assert!(!task.deps_satisfied(|_| false));
        assert!(task.deps_satisfied(|id| id == "B"));
    }
}
