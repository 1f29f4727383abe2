//! Completion callbacks run once a run has finished

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use super::RunReport;

/// How long a shell hook may run before it is killed
const HOOK_TIMEOUT: Duration = Duration::from_secs(30);

#[async_trait]
pub trait CompletionHook: Send + Sync {
    async fn on_complete(&self, report: &RunReport);
}

/// Logs the run summary
#[derive(Debug, Clone, Copy, Default)]
pub struct LogHook;

#[async_trait]
impl CompletionHook for LogHook {
    async fn on_complete(&self, report: &RunReport) {
        match &report.blocked {
            None => info!(
                run_id = %report.run_id,
                completed = report.completed.len(),
                pending = report.pending.len(),
                skipped = report.skipped.len(),
                duration_ms = report.duration_ms,
                "Run finished"
            ),
            Some(blocked) => warn!(
                run_id = %report.run_id,
                completed = report.completed.len(),
                blocked = %blocked.task_id,
                attempts = blocked.attempts,
                "Run finished with a blocked task"
            ),
        }
    }
}

/// Runs a user command with the outcome in its environment
///
/// Variables: `RALPHD_RUN_ID`, `RALPHD_COMPLETED` (comma separated ids) and
/// `RALPHD_BLOCKED` (empty when nothing blocked).
#[derive(Debug, Clone)]
pub struct ShellHook {
    command: String,
    cwd: PathBuf,
    timeout: Duration,
}

impl ShellHook {
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
            timeout: HOOK_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl CompletionHook for ShellHook {
    async fn on_complete(&self, report: &RunReport) {
        debug!(command = %self.command, "ShellHook::on_complete: called");
        let blocked = report.blocked.as_ref().map(|b| b.task_id.as_str()).unwrap_or("");

        let child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.cwd)
            .env("RALPHD_RUN_ID", report.run_id.to_string())
            .env("RALPHD_COMPLETED", report.completed.join(","))
            .env("RALPHD_BLOCKED", blocked)
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) if output.status.success() => debug!("ShellHook::on_complete: hook succeeded"),
            Ok(Ok(output)) => warn!(
                command = %self.command,
                code = ?output.status.code(),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Completion hook failed"
            ),
            Ok(Err(e)) => error!(command = %self.command, error = %e, "Failed to spawn completion hook"),
            Err(_) => warn!(command = %self.command, timeout = ?self.timeout, "Completion hook timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ralph::ExhaustionError;
    use std::fs;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn report(blocked: Option<&str>) -> RunReport {
        RunReport {
            run_id: Uuid::now_v7(),
            completed: vec!["A".to_string(), "B".to_string()],
            pending: Vec::new(),
            skipped: Vec::new(),
            blocked: blocked.map(|id| ExhaustionError {
                task_id: id.to_string(),
                attempts: 3,
                history: Vec::new(),
            }),
            duration_ms: 5,
        }
    }

    #[tokio::test]
    async fn test_shell_hook_receives_environment() {
        let temp = tempdir().unwrap();
        let hook = ShellHook::new(
            r#"printf '%s|%s' "$RALPHD_COMPLETED" "$RALPHD_BLOCKED" > hook.out"#,
            temp.path(),
        );
        hook.on_complete(&report(Some("C"))).await;

        let written = fs::read_to_string(temp.path().join("hook.out")).unwrap();
        assert_eq!(written, "A,B|C");
    }

    #[tokio::test]
    async fn test_failing_hook_is_absorbed() {
        let temp = tempdir().unwrap();
        ShellHook::new("exit 3", temp.path()).on_complete(&report(None)).await;
        LogHook.on_complete(&report(None)).await;
    }

    #[tokio::test]
    async fn test_slow_hook_times_out() {
        let temp = tempdir().unwrap();
        let started = std::time::Instant::now();
        ShellHook::new("sleep 10", temp.path())
            .with_timeout(Duration::from_millis(100))
            .on_complete(&report(None))
            .await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
