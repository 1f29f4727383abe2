//! TaskManager - owns the in-memory task graph
//!
//! Selection and every status transition go through here. There is exactly one
//! driver, so the "at most one task in progress" rule is enforced by state
//! checks rather than locks.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::graph::topological_sort;
use super::{StateError, StructuralError, TaskError};
use crate::domain::{CorrectionAttempt, ExecutionState, StateSnapshot, Task, TaskDescriptor, TaskStatus};

/// Default maximum correction attempts per task
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// In-memory task graph with lifecycle enforcement
#[derive(Debug, Clone)]
pub struct TaskManager {
    /// Tasks in declaration order
    tasks: Vec<Task>,

    /// Task id -> position in `tasks`
    index: HashMap<String, usize>,

    /// Correction attempts per task id
    history: BTreeMap<String, Vec<CorrectionAttempt>>,

    max_attempts: u32,

    /// Revision of the last persisted ExecutionState
    version: u64,
}

impl TaskManager {
    /// Build the graph from parsed descriptors
    ///
    /// Fails with a StructuralError on cycles, duplicates or unknown
    /// dependencies; nothing can be scheduled from such a graph.
    pub fn load_graph(descriptors: Vec<TaskDescriptor>, max_attempts: u32) -> Result<Self, StructuralError> {
        debug!(task_count = descriptors.len(), max_attempts, "TaskManager::load_graph: called");
        let order = topological_sort(&descriptors)?;
        let planned: Vec<&str> = order.iter().map(|&i| descriptors[i].id.as_str()).collect();
        info!(task_count = descriptors.len(), ?planned, "Task graph loaded");

        let tasks: Vec<Task> = descriptors.into_iter().map(Task::from).collect();
        let index = tasks.iter().enumerate().map(|(i, t)| (t.id.clone(), i)).collect();

        Ok(Self {
            tasks,
            index,
            history: BTreeMap::new(),
            max_attempts: max_attempts.max(1),
            version: 0,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Tasks in declaration order
    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.index.get(id).map(|&i| &self.tasks[i])
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Task, TaskError> {
        match self.index.get(id) {
            Some(&i) => Ok(&mut self.tasks[i]),
            None => Err(TaskError::NotFound { id: id.to_string() }),
        }
    }

    fn is_completed(&self, id: &str) -> bool {
        self.get(id).is_some_and(|t| t.status == TaskStatus::Completed)
    }

    /// The task currently in progress, if any
    pub fn in_progress(&self) -> Option<&Task> {
        self.tasks.iter().find(|t| t.status == TaskStatus::InProgress)
    }

    /// First pending task (declaration order) whose dependencies are all completed
    ///
    /// Returns None while another task is in progress, when everything is
    /// completed, or when only blocked tasks (and their dependents) remain.
    pub fn select_next(&self) -> Option<&Task> {
        if let Some(running) = self.in_progress() {
            debug!(running = %running.id, "select_next: a task is already in progress");
            return None;
        }

        let next = self
            .tasks
            .iter()
            .find(|t| t.status.is_pending() && t.deps_satisfied(|d| self.is_completed(d)));
        debug!(next = ?next.map(|t| t.id.as_str()), "select_next: called");
        next
    }

    fn transition(&mut self, id: &str, to: TaskStatus) -> Result<(), TaskError> {
        let task = self.get_mut(id)?;
        if !task.status.can_transition_to(to) {
            debug!(%id, from = %task.status, %to, "transition: rejected");
            return Err(TaskError::InvalidTransition {
                id: id.to_string(),
                from: task.status,
                to,
            });
        }
        debug!(%id, from = %task.status, %to, "transition: applied");
        task.status = to;
        Ok(())
    }

    /// not_started → queued
    pub fn queue_task(&mut self, id: &str) -> Result<(), TaskError> {
        self.transition(id, TaskStatus::Queued)
    }

    /// (not_started →) queued → in_progress
    pub fn begin_task(&mut self, id: &str) -> Result<(), TaskError> {
        debug!(%id, "begin_task: called");
        if let Some(running) = self.in_progress()
            && running.id != id
        {
            return Err(TaskError::AlreadyInProgress {
                id: id.to_string(),
                running: running.id.clone(),
            });
        }

        let task = self.get(id).ok_or_else(|| TaskError::NotFound { id: id.to_string() })?;
        if let Some(dep) = task.deps.iter().find(|d| !self.is_completed(d)) {
            return Err(TaskError::DependencyPending {
                id: id.to_string(),
                dep: dep.clone(),
            });
        }

        if task.status == TaskStatus::NotStarted {
            self.queue_task(id)?;
        }
        self.transition(id, TaskStatus::InProgress)?;
        info!(%id, "Task started");
        Ok(())
    }

    /// in_progress → completed
    pub fn complete_task(&mut self, id: &str) -> Result<(), TaskError> {
        debug!(%id, "complete_task: called");
        self.transition(id, TaskStatus::Completed)?;
        info!(%id, "Task completed");
        Ok(())
    }

    /// Consume one attempt: in_progress → queued, or → blocked once the maximum is reached
    pub fn fail_task(&mut self, id: &str, error: impl Into<String>) -> Result<TaskStatus, TaskError> {
        let error = error.into();
        debug!(%id, %error, "fail_task: called");
        let max_attempts = self.max_attempts;

        let task = self.get_mut(id)?;
        if task.status != TaskStatus::InProgress {
            return Err(TaskError::InvalidTransition {
                id: id.to_string(),
                from: task.status,
                to: TaskStatus::Queued,
            });
        }
        task.attempts = (task.attempts + 1).min(max_attempts);
        task.last_error = Some(error);
        let attempts = task.attempts;

        let next = if attempts >= max_attempts {
            TaskStatus::Blocked
        } else {
            TaskStatus::Queued
        };
        self.transition(id, next)?;

        if next == TaskStatus::Blocked {
            warn!(%id, attempts, "Task blocked after exhausting correction attempts");
        } else {
            info!(%id, attempts, max_attempts, "Task failed, queued for retry");
        }
        Ok(next)
    }

    /// Record the latest failure text without consuming an attempt
    pub fn record_error(&mut self, id: &str, error: impl Into<String>) -> Result<(), TaskError> {
        self.get_mut(id)?.last_error = Some(error.into());
        Ok(())
    }

    /// Attempts left before the task blocks
    pub fn remaining_attempts(&self, id: &str) -> u32 {
        self.get(id)
            .map(|t| self.max_attempts.saturating_sub(t.attempts))
            .unwrap_or(0)
    }

    /// Append a correction attempt to the task's history
    pub fn record_attempt(&mut self, attempt: CorrectionAttempt) {
        debug!(task_id = %attempt.task_id, attempt = attempt.attempt, outcome = %attempt.outcome, "record_attempt: called");
        self.history.entry(attempt.task_id.clone()).or_default().push(attempt);
    }

    /// Correction history for a task (empty if it never failed)
    pub fn history(&self, id: &str) -> &[CorrectionAttempt] {
        self.history.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Completed task ids in declaration order
    pub fn completed_ids(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.id.clone())
            .collect()
    }

    pub fn blocked(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|t| t.status == TaskStatus::Blocked)
    }

    /// Current ExecutionState (not yet persisted)
    pub fn execution_state(&self) -> ExecutionState {
        ExecutionState {
            version: self.version,
            completed_task_ids: self.completed_ids(),
            current_task_id: self.in_progress().map(|t| t.id.clone()),
            updated_at: Utc::now(),
        }
    }

    /// Full graph plus ExecutionState
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            execution: self.execution_state(),
            tasks: self.tasks.clone(),
            history: self.history.clone(),
        }
    }

    /// Atomically write the snapshot to `path`, bumping the version
    pub fn persist(&mut self, path: &Path) -> Result<ExecutionState, StateError> {
        self.version += 1;
        let snapshot = self.snapshot();
        debug!(path = %path.display(), version = self.version, "persist: called");

        let mut json = serde_json::to_string_pretty(&snapshot)?;
        json.push('\n');
        specstore::atomic_write(path, json)?;
        Ok(snapshot.execution)
    }

    /// Read a persisted snapshot; Ok(None) when no state has been written yet
    pub fn load_snapshot(path: &Path) -> Result<Option<StateSnapshot>, StateError> {
        debug!(path = %path.display(), "load_snapshot: called");
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StateError::Read {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Overlay persisted task state onto the freshly loaded graph
    ///
    /// Tasks are matched by id; persisted tasks no longer declared are dropped.
    /// Returns the ids that were in progress when the snapshot was written.
    pub fn restore(&mut self, snapshot: StateSnapshot) -> Vec<String> {
        debug!(version = snapshot.execution.version, "restore: called");
        let mut interrupted = Vec::new();

        for saved in snapshot.tasks {
            let Some(&i) = self.index.get(&saved.id) else {
                warn!(id = %saved.id, "restore: persisted task no longer declared, dropping");
                continue;
            };
            let task = &mut self.tasks[i];
            task.status = saved.status;
            task.attempts = saved.attempts.min(self.max_attempts);
            task.last_error = saved.last_error;
            if task.status == TaskStatus::InProgress {
                interrupted.push(task.id.clone());
            }
        }

        for (id, attempts) in snapshot.history {
            if self.index.contains_key(&id) {
                self.history.insert(id, attempts);
            }
        }

        self.version = snapshot.execution.version;
        info!(
            version = self.version,
            completed = self.completed_ids().len(),
            interrupted = interrupted.len(),
            "Execution state restored"
        );
        interrupted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CorrectionOutcome, ErrorAnalysis};
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn task(id: &str, deps: &[&str]) -> TaskDescriptor {
        TaskDescriptor::new(id, id).with_deps(deps.iter().copied())
    }

    fn abc() -> TaskManager {
        TaskManager::load_graph(vec![task("A", &[]), task("B", &[]), task("C", &["A", "B"])], 3).unwrap()
    }

    #[test]
    fn test_cyclic_graph_is_rejected() {
        let result = TaskManager::load_graph(vec![task("A", &["B"]), task("B", &["A"])], 3);
        assert!(matches!(result, Err(StructuralError::CyclicDependency { .. })));
    }

    #[test]
    fn test_select_next_follows_declaration_order() {
        let mut mgr = abc();
        assert_eq!(mgr.select_next().unwrap().id, "A");

        mgr.begin_task("A").unwrap();
        assert!(mgr.select_next().is_none(), "nothing selectable while A runs");

        mgr.complete_task("A").unwrap();
        assert_eq!(mgr.select_next().unwrap().id, "B");

        mgr.begin_task("B").unwrap();
        mgr.complete_task("B").unwrap();
        assert_eq!(mgr.select_next().unwrap().id, "C");

        mgr.begin_task("C").unwrap();
        mgr.complete_task("C").unwrap();
        assert!(mgr.select_next().is_none());
        assert_eq!(mgr.completed_ids(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_select_next_prefers_earlier_declared_ready_task() {
        let mut mgr = TaskManager::load_graph(vec![task("C", &["A"]), task("A", &[]), task("B", &[])], 3).unwrap();
        assert_eq!(mgr.select_next().unwrap().id, "A");

        mgr.begin_task("A").unwrap();
        mgr.complete_task("A").unwrap();
        assert_eq!(mgr.select_next().unwrap().id, "C", "C is declared before B and now ready");
    }

    #[test]
    fn test_begin_rejects_second_in_progress() {
        let mut mgr = abc();
        mgr.begin_task("A").unwrap();
        assert_eq!(
            mgr.begin_task("B"),
            Err(TaskError::AlreadyInProgress {
                id: "B".to_string(),
                running: "A".to_string()
            })
        );
    }

    #[test]
    fn test_begin_rejects_pending_dependency() {
        let mut mgr = abc();
        assert!(matches!(mgr.begin_task("C"), Err(TaskError::DependencyPending { .. })));
    }

    #[test]
    fn test_complete_requires_in_progress() {
        let mut mgr = abc();
        assert!(matches!(mgr.complete_task("A"), Err(TaskError::InvalidTransition { .. })));
    }

    #[test]
    fn test_fail_task_requeues_then_blocks() {
        let mut mgr = abc();
        for expected_attempts in 1..3 {
            mgr.begin_task("A").unwrap();
            assert_eq!(mgr.fail_task("A", "boom").unwrap(), TaskStatus::Queued);
            assert_eq!(mgr.get("A").unwrap().attempts, expected_attempts);
            assert_eq!(mgr.remaining_attempts("A"), 3 - expected_attempts);
        }
        mgr.begin_task("A").unwrap();
        assert_eq!(mgr.fail_task("A", "boom").unwrap(), TaskStatus::Blocked);
        assert_eq!(mgr.get("A").unwrap().attempts, 3);
        assert_eq!(mgr.remaining_attempts("A"), 0);

        // Blocked is terminal
        assert!(mgr.begin_task("A").is_err());
    }

    #[test]
    fn test_blocked_dependency_leaves_dependents_pending() {
        let mut mgr = TaskManager::load_graph(vec![task("A", &[]), task("B", &["A"]), task("C", &[])], 1).unwrap();
        mgr.begin_task("A").unwrap();
        assert_eq!(mgr.fail_task("A", "boom").unwrap(), TaskStatus::Blocked);

        // Independent C still runs, B never becomes selectable
        assert_eq!(mgr.select_next().unwrap().id, "C");
        mgr.begin_task("C").unwrap();
        mgr.complete_task("C").unwrap();
        assert!(mgr.select_next().is_none());
        assert_eq!(mgr.get("B").unwrap().status, TaskStatus::NotStarted);
    }

    #[test]
    fn test_persist_and_restore() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("state.json");

        let mut mgr = abc();
        mgr.begin_task("A").unwrap();
        mgr.complete_task("A").unwrap();
        mgr.begin_task("B").unwrap();
        mgr.record_attempt(CorrectionAttempt::new("B", 1, &ErrorAnalysis::default()));
        let state = mgr.persist(&path).unwrap();
        assert_eq!(state.version, 1);
        assert_eq!(state.completed_task_ids, vec!["A"]);
        assert_eq!(state.current_task_id.as_deref(), Some("B"));

        let snapshot = TaskManager::load_snapshot(&path).unwrap().unwrap();
        let mut fresh = abc();
        let interrupted = fresh.restore(snapshot);

        assert_eq!(interrupted, vec!["B"]);
        assert_eq!(fresh.get("A").unwrap().status, TaskStatus::Completed);
        assert_eq!(fresh.history("B").len(), 1);
        assert_eq!(fresh.history("B")[0].outcome, CorrectionOutcome::NoActionableFix);

        // Version keeps counting from the restored revision
        assert_eq!(fresh.persist(&path).unwrap().version, 2);
    }

    #[test]
    fn test_load_snapshot_missing_file() {
        let temp = tempdir().unwrap();
        assert!(TaskManager::load_snapshot(&temp.path().join("none.json")).unwrap().is_none());
    }

    #[test]
    fn test_load_snapshot_corrupt_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("state.json");
        fs::write(&path, "{ half").unwrap();
        assert!(matches!(TaskManager::load_snapshot(&path), Err(StateError::Json(_))));
    }

    /// Random DAG: each task may depend on any earlier-declared task
    fn arb_dag() -> impl Strategy<Value = Vec<TaskDescriptor>> {
        (1usize..10).prop_flat_map(|n| {
            proptest::collection::vec(proptest::collection::vec(any::<bool>(), n), n).prop_map(move |edges| {
                (0..n)
                    .map(|i| {
                        let deps: Vec<String> = (0..i).filter(|&j| edges[i][j]).map(|j| format!("t{}", j)).collect();
                        TaskDescriptor::new(format!("t{}", i), "").with_deps(deps)
                    })
                    .rev()
                    .collect::<Vec<_>>()
            })
        })
    }

    proptest! {
        #[test]
        fn prop_selection_respects_dependencies(descriptors in arb_dag(), failures in proptest::collection::vec(any::<bool>(), 0..40)) {
            let mut mgr = TaskManager::load_graph(descriptors, 3).unwrap();
            let mut order: Vec<String> = Vec::new();
            let mut coin = failures.into_iter();

            while let Some(next) = mgr.select_next() {
                let id = next.id.clone();
                for dep in &next.deps {
                    prop_assert_eq!(mgr.get(dep).unwrap().status, TaskStatus::Completed);
                }
                mgr.begin_task(&id).unwrap();
                let running = mgr.tasks().iter().filter(|t| t.status == TaskStatus::InProgress).count();
                prop_assert_eq!(running, 1);

                if coin.next().unwrap_or(false) {
                    mgr.fail_task(&id, "random failure").unwrap();
                } else {
                    mgr.complete_task(&id).unwrap();
                    order.push(id);
                }
                for t in mgr.tasks() {
                    prop_assert!(t.attempts <= mgr.max_attempts());
                }
            }

            // Completed order is a valid topological order
            for (pos, id) in order.iter().enumerate() {
                for dep in &mgr.get(id).unwrap().deps {
                    let dep_pos = order.iter().position(|o| o == dep);
                    prop_assert!(dep_pos.is_some_and(|p| p < pos));
                }
            }
        }
    }
}
