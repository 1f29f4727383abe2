//! Orchestrator - the single driver loop

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::hooks::CompletionHook;
use super::{OrchestratorError, recovery};
use crate::domain::{TaskDescriptor, TaskStatus};
use crate::exec::TestRunner;
use crate::ralph::{ExhaustionError, LoopOutcome, LoopTask, RalphLoop};
use crate::tasks::TaskManager;

/// Aggregate result of one `run`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,

    /// Previously completed tasks, then those completed by this run in order
    pub completed: Vec<String>,

    /// Required tasks neither completed nor blocked (dependents of a blocked task)
    pub pending: Vec<String>,

    /// First blocked required task with its full correction history
    pub blocked: Option<ExhaustionError>,

    /// Optional tasks left unfinished, blocked or never reached
    pub skipped: Vec<String>,

    pub duration_ms: u64,
}

impl RunReport {
    /// Every required task completed
    pub fn is_success(&self) -> bool {
        self.blocked.is_none() && self.pending.is_empty()
    }
}

/// Drives one task at a time from selection to completion or exhaustion
pub struct Orchestrator {
    runner: Arc<dyn TestRunner>,
    ralph: RalphLoop,
    hooks: Vec<Box<dyn CompletionHook>>,
    state_path: PathBuf,
    max_attempts: u32,
}

impl Orchestrator {
    pub fn new(runner: Arc<dyn TestRunner>, ralph: RalphLoop, state_path: impl Into<PathBuf>, max_attempts: u32) -> Self {
        Self {
            runner,
            ralph,
            hooks: Vec::new(),
            state_path: state_path.into(),
            max_attempts,
        }
    }

    pub fn with_hook(mut self, hook: Box<dyn CompletionHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Execute the task graph to completion
    ///
    /// Only structural problems and internal failures are errors; a task that
    /// runs out of attempts is reported in `RunReport::blocked`.
    pub async fn run(&self, descriptors: Vec<TaskDescriptor>) -> Result<RunReport, OrchestratorError> {
        let started = Instant::now();
        let run_id = Uuid::now_v7();
        info!(%run_id, tasks = descriptors.len(), state = %self.state_path.display(), "Run starting");

        let mut manager = TaskManager::load_graph(descriptors, self.max_attempts)?;
        let stats = recovery::recover(&mut manager, &self.state_path)?;
        debug!(%stats, "Orchestrator::run: recovery done");

        let mut completed = manager.completed_ids();
        let mut first_blocked: Option<ExhaustionError> = None;

        while let Some(task) = manager.select_next().cloned() {
            manager.begin_task(&task.id)?;
            manager.persist(&self.state_path)?;

            let Some(command) = task.command.as_deref() else {
                debug!(task_id = %task.id, "Orchestrator::run: no command, completing");
                manager.complete_task(&task.id)?;
                manager.persist(&self.state_path)?;
                completed.push(task.id.clone());
                continue;
            };

            let outcome = self.runner.run(command).await;
            if outcome.passed {
                manager.complete_task(&task.id)?;
                manager.persist(&self.state_path)?;
                completed.push(task.id.clone());
                continue;
            }

            let first_failure = outcome
                .failures
                .first()
                .cloned()
                .unwrap_or_else(|| format!("exit code {}", outcome.output.exit_code));
            warn!(task_id = %task.id, failure = %first_failure, "Task failed, entering correction loop");
            manager.record_error(&task.id, first_failure)?;
            manager.persist(&self.state_path)?;

            let loop_task = LoopTask {
                id: &task.id,
                description: &task.description,
                command,
            };
            match self.ralph.run(&mut manager, loop_task, outcome, &self.state_path).await? {
                LoopOutcome::Completed { attempts } => {
                    debug!(task_id = %task.id, attempts, "Orchestrator::run: corrected");
                    completed.push(task.id.clone());
                }
                LoopOutcome::Exhausted(exhaustion) if !task.required => {
                    info!(task_id = %exhaustion.task_id, "Optional task blocked, continuing");
                }
                LoopOutcome::Exhausted(exhaustion) => {
                    if first_blocked.is_none() {
                        first_blocked = Some(exhaustion);
                    }
                }
            }
        }

        // A task blocked by an earlier run still blocks this one
        let blocked = first_blocked.or_else(|| {
            manager.blocked().find(|t| t.required).map(|t| ExhaustionError {
                task_id: t.id.clone(),
                attempts: t.attempts,
                history: manager.history(&t.id).to_vec(),
            })
        });

        let (required, optional): (Vec<_>, Vec<_>) = manager
            .tasks()
            .iter()
            .filter(|t| t.status != TaskStatus::Completed)
            .partition(|t| t.required);
        let pending = required
            .into_iter()
            .filter(|t| t.status != TaskStatus::Blocked)
            .map(|t| t.id.clone())
            .collect();
        let skipped = optional.into_iter().map(|t| t.id.clone()).collect();

        let report = RunReport {
            run_id,
            completed,
            pending,
            blocked,
            skipped,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        for hook in &self.hooks {
            hook.on_complete(&report).await;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CorrectionPlan, ErrorAnalysis};
    use crate::exec::{CommandOutput, TestOutcome};
    use crate::ralph::{
        AtomicApplier, CorrectionContext, CorrectionGenerator, GeneratorError, PatternAnalyzer,
    };
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Pass/fail per command, with a log of what ran
    struct TableRunner {
        results: HashMap<String, bool>,
        ran: Mutex<Vec<String>>,
    }

    impl TableRunner {
        fn new(results: &[(&str, bool)]) -> Arc<Self> {
            Arc::new(Self {
                results: results.iter().map(|(c, p)| (c.to_string(), *p)).collect(),
                ran: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TestRunner for TableRunner {
        async fn run(&self, command: &str) -> TestOutcome {
            self.ran.lock().unwrap().push(command.to_string());
            let passed = self.results.get(command).copied().unwrap_or(false);
            TestOutcome {
                passed,
                failures: if passed { Vec::new() } else { vec!["failed".to_string()] },
                output: CommandOutput {
                    exit_code: if passed { 0 } else { 1 },
                    ..Default::default()
                },
            }
        }
    }

    struct NoPlan;

    #[async_trait]
    impl CorrectionGenerator for NoPlan {
        fn name(&self) -> &str {
            "none"
        }

        async fn generate(
            &self,
            _analysis: &ErrorAnalysis,
            _context: &CorrectionContext,
        ) -> Result<Option<CorrectionPlan>, GeneratorError> {
            Ok(None)
        }
    }

    fn orchestrator(runner: Arc<TableRunner>, state: &Path) -> Orchestrator {
        let ralph = RalphLoop::new(
            Arc::new(PatternAnalyzer),
            Arc::new(NoPlan),
            Arc::new(AtomicApplier::default()),
            runner.clone(),
            ".",
        );
        Orchestrator::new(runner, ralph, state, 3)
    }

    #[tokio::test]
    async fn test_all_tasks_complete_in_dependency_order() {
        let temp = tempdir().unwrap();
        let runner = TableRunner::new(&[("check-a", true), ("check-c", true)]);
        let report = orchestrator(runner.clone(), &temp.path().join("state.json"))
            .run(vec![
                TaskDescriptor::new("C", "c").with_deps(["A", "B"]).with_command("check-c"),
                TaskDescriptor::new("A", "a").with_command("check-a"),
                TaskDescriptor::new("B", "b"),
            ])
            .await
            .unwrap();

        assert_eq!(report.completed, vec!["A", "B", "C"]);
        assert!(report.is_success());
        assert_eq!(*runner.ran.lock().unwrap(), vec!["check-a", "check-c"]);
    }

    #[tokio::test]
    async fn test_blocked_task_leaves_dependents_pending() {
        let temp = tempdir().unwrap();
        let runner = TableRunner::new(&[("ok", true)]);
        let report = orchestrator(runner.clone(), &temp.path().join("state.json"))
            .run(vec![
                TaskDescriptor::new("A", "a").with_command("broken"),
                TaskDescriptor::new("B", "b").with_deps(["A"]).with_command("ok"),
                TaskDescriptor::new("D", "d").with_command("ok"),
            ])
            .await
            .unwrap();

        let blocked = report.blocked.as_ref().unwrap();
        assert_eq!(blocked.task_id, "A");
        assert_eq!(blocked.history.len(), 3);
        assert_eq!(report.completed, vec!["D"]);
        assert_eq!(report.pending, vec!["B"]);
        assert!(!report.is_success());
        // The dependent never ran
        assert_eq!(runner.ran.lock().unwrap().iter().filter(|c| *c == "ok").count(), 1);
    }

    #[tokio::test]
    async fn test_optional_task_block_does_not_fail_run() {
        let temp = tempdir().unwrap();
        let runner = TableRunner::new(&[("ok", true)]);
        let report = orchestrator(runner.clone(), &temp.path().join("state.json"))
            .run(vec![
                TaskDescriptor::new("lint", "lint").with_command("broken").optional(),
                TaskDescriptor::new("fmt", "fmt").with_deps(["lint"]).optional(),
                TaskDescriptor::new("build", "build").with_command("ok"),
            ])
            .await
            .unwrap();

        assert!(report.blocked.is_none());
        assert_eq!(report.completed, vec!["build"]);
        assert!(report.pending.is_empty());
        assert_eq!(report.skipped, vec!["lint", "fmt"]);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_required_dependent_of_optional_block_stays_pending() {
        let temp = tempdir().unwrap();
        let report = orchestrator(TableRunner::new(&[]), &temp.path().join("state.json"))
            .run(vec![
                TaskDescriptor::new("lint", "lint").with_command("broken").optional(),
                TaskDescriptor::new("release", "release").with_deps(["lint"]),
            ])
            .await
            .unwrap();

        assert!(report.blocked.is_none());
        assert_eq!(report.skipped, vec!["lint"]);
        assert_eq!(report.pending, vec!["release"]);
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_rerun_reports_previous_block_and_completions() {
        let temp = tempdir().unwrap();
        let state = temp.path().join("state.json");
        let tasks = || {
            vec![
                TaskDescriptor::new("A", "a"),
                TaskDescriptor::new("B", "b").with_command("broken"),
            ]
        };

        let first = orchestrator(TableRunner::new(&[]), &state).run(tasks()).await.unwrap();
        assert_eq!(first.blocked.as_ref().unwrap().task_id, "B");

        let runner = TableRunner::new(&[]);
        let second = orchestrator(runner.clone(), &state).run(tasks()).await.unwrap();
        assert_eq!(second.completed, vec!["A"]);
        assert_eq!(second.blocked.unwrap().history.len(), 3);
        assert!(runner.ran.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cyclic_graph_is_structural_error() {
        let temp = tempdir().unwrap();
        let runner = TableRunner::new(&[]);
        let err = orchestrator(runner.clone(), &temp.path().join("state.json"))
            .run(vec![
                TaskDescriptor::new("A", "a").with_deps(["B"]),
                TaskDescriptor::new("B", "b").with_deps(["A"]),
            ])
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::Structural(_)));
        assert!(runner.ran.lock().unwrap().is_empty());
        assert!(!temp.path().join("state.json").exists());
    }
}
