//! Ralph-Loop driver - bounded analyze → generate → apply → re-execute cycle
//!
//! Every cycle consumes exactly one attempt and leaves one CorrectionAttempt
//! in the task's history. A cycle that cannot apply anything (no actionable
//! analysis, no plan, stale patch) skips the re-execution but still counts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::activity::{ActivityEntry, ActivityLog};
use super::{ApplyError, CorrectionApplier, CorrectionContext, CorrectionGenerator, ErrorAnalyzer, ExhaustionError};
use crate::domain::{CorrectionAttempt, CorrectionOutcome, ErrorAnalysis, TaskStatus};
use crate::exec::{TestOutcome, TestRunner};
use crate::tasks::{StateError, TaskError, TaskManager};

/// How the loop ended for one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    /// Re-execution passed; `attempts` is the number of cycles run
    Completed { attempts: u32 },
    /// Attempts exhausted; the task is blocked
    Exhausted(ExhaustionError),
}

/// Failures the loop cannot absorb
#[derive(Debug, Error)]
pub enum LoopError {
    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    State(#[from] StateError),
}

/// The failing task the loop is working on
#[derive(Debug, Clone)]
pub struct LoopTask<'a> {
    pub id: &'a str,
    pub description: &'a str,
    pub command: &'a str,
}

pub struct RalphLoop {
    analyzer: Arc<dyn ErrorAnalyzer>,
    generator: Arc<dyn CorrectionGenerator>,
    applier: Arc<dyn CorrectionApplier>,
    runner: Arc<dyn TestRunner>,
    activity: Option<ActivityLog>,
    cwd: PathBuf,
}

impl RalphLoop {
    pub fn new(
        analyzer: Arc<dyn ErrorAnalyzer>,
        generator: Arc<dyn CorrectionGenerator>,
        applier: Arc<dyn CorrectionApplier>,
        runner: Arc<dyn TestRunner>,
        cwd: impl Into<PathBuf>,
    ) -> Self {
        Self {
            analyzer,
            generator,
            applier,
            runner,
            activity: None,
            cwd: cwd.into(),
        }
    }

    /// Also append every attempt to an activity log
    pub fn with_activity_log(mut self, log: ActivityLog) -> Self {
        self.activity = Some(log);
        self
    }

    /// Drive `task` (currently in progress, last run failed with `initial`)
    /// until it passes or runs out of attempts
    ///
    /// State is persisted to `state_path` after every transition.
    pub async fn run(
        &self,
        manager: &mut TaskManager,
        task: LoopTask<'_>,
        initial: TestOutcome,
        state_path: &Path,
    ) -> Result<LoopOutcome, LoopError> {
        debug!(task_id = %task.id, command = %task.command, "RalphLoop::run: called");
        let mut last = initial;
        let mut cycles = 0;

        loop {
            let consumed = manager.get(task.id).map(|t| t.attempts).unwrap_or(0);
            let attempt_no = consumed + 1;
            cycles += 1;
            info!(
                task_id = %task.id,
                attempt = attempt_no,
                max = manager.max_attempts(),
                remaining = manager.remaining_attempts(task.id),
                "Correction attempt started"
            );

            let analysis = self.analyzer.analyze(&last.output, task.command, &self.cwd);
            let (record, rerun) = self.cycle(&task, attempt_no, &analysis, &last).await;
            let outcome = record.outcome;
            self.log_activity(&record);
            manager.record_attempt(record);

            if outcome == CorrectionOutcome::Success {
                manager.complete_task(task.id)?;
                manager.persist(state_path)?;
                info!(task_id = %task.id, attempts = cycles, "Task corrected");
                return Ok(LoopOutcome::Completed { attempts: cycles });
            }

            if let Some(rerun) = rerun {
                last = rerun;
            }

            let status = manager.fail_task(task.id, failure_summary(&last, &analysis, outcome))?;
            manager.persist(state_path)?;

            if status == TaskStatus::Blocked {
                let attempts = manager.get(task.id).map(|t| t.attempts).unwrap_or(attempt_no);
                let exhaustion = ExhaustionError {
                    task_id: task.id.to_string(),
                    attempts,
                    history: manager.history(task.id).to_vec(),
                };
                warn!(task_id = %task.id, attempts, "Correction attempts exhausted");
                return Ok(LoopOutcome::Exhausted(exhaustion));
            }

            manager.begin_task(task.id)?;
            manager.persist(state_path)?;
        }
    }

    /// One analyze → generate → apply → re-execute pass
    ///
    /// Returns the attempt record and, when the command was re-run, its outcome.
    async fn cycle(
        &self,
        task: &LoopTask<'_>,
        attempt_no: u32,
        analysis: &ErrorAnalysis,
        last: &TestOutcome,
    ) -> (CorrectionAttempt, Option<TestOutcome>) {
        let mut record = CorrectionAttempt::new(task.id, attempt_no, analysis);

        if !analysis.is_actionable() {
            debug!(task_id = %task.id, "RalphLoop::cycle: analysis not actionable");
            return (record, None);
        }

        let context = CorrectionContext {
            task_id: task.id.to_string(),
            description: task.description.to_string(),
            command: task.command.to_string(),
            cwd: self.cwd.clone(),
            attempt: attempt_no,
            output: last.output.combined(),
        };

        let plan = match self.generator.generate(analysis, &context).await {
            Ok(Some(plan)) if !plan.is_noop() => plan,
            Ok(Some(_)) => {
                debug!(task_id = %task.id, "RalphLoop::cycle: generator proposed a no-op plan");
                return (record, None);
            }
            Ok(None) => {
                debug!(task_id = %task.id, "RalphLoop::cycle: no plan");
                return (record, None);
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Correction generator failed");
                return (record, None);
            }
        };
        record.proposed_diff = Some(plan.to_diff());

        match self.applier.apply(&plan) {
            Ok(backup) => {
                record.applied = true;
                record.backup_id = Some(backup.0);
            }
            Err(ApplyError::PatchMismatch { path }) => {
                info!(task_id = %task.id, path = %path.display(), "Stale patch, re-analysing next attempt");
                record.outcome = CorrectionOutcome::PatchMismatch;
                return (record, None);
            }
            Err(e) => {
                error!(task_id = %task.id, error = %e, "Failed to apply correction");
                record.outcome = CorrectionOutcome::ApplyFailed;
                return (record, None);
            }
        }

        let rerun = self.runner.run(task.command).await;
        record.outcome = if rerun.passed {
            CorrectionOutcome::Success
        } else {
            CorrectionOutcome::StillFailing
        };
        debug!(task_id = %task.id, outcome = %record.outcome, "RalphLoop::cycle: re-executed");
        (record, Some(rerun))
    }

    fn log_activity(&self, record: &CorrectionAttempt) {
        if let Some(log) = &self.activity
            && let Err(e) = log.append(&ActivityEntry::from(record))
        {
            error!(path = %log.path().display(), error = %e, "Failed to append activity entry");
        }
    }
}

fn failure_summary(last: &TestOutcome, analysis: &ErrorAnalysis, outcome: CorrectionOutcome) -> String {
    let detail = last
        .failures
        .first()
        .cloned()
        .unwrap_or_else(|| analysis.message.clone());
    format!("{}: {}", outcome, detail)
}
