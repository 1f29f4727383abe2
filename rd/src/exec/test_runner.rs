//! TestRunner - turns a validation command into a pass/fail verdict

use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use super::command::{CommandOutput, CommandRequest, CommandRunner};

/// Cap on failure lines kept per outcome
const MAX_FAILURE_LINES: usize = 20;

static FAILURE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(error|fail|panic|assert|exception|timed out)")
        .expect("failure regex is valid")
});

/// Verdict of one validation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestOutcome {
    pub passed: bool,

    /// Output lines that look like failures, in order of appearance
    pub failures: Vec<String>,

    /// Raw command output, fed to the ErrorAnalyzer on failure
    pub output: CommandOutput,
}

impl TestOutcome {
    /// Outcome for a command that could not be launched at all
    pub fn launch_failure(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            passed: false,
            failures: vec![message.clone()],
            output: CommandOutput {
                stderr: message,
                exit_code: -1,
                ..Default::default()
            },
        }
    }
}

#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Run `command` and report whether it passed; never errors
    async fn run(&self, command: &str) -> TestOutcome;
}

/// Runs validation commands through a CommandRunner in a fixed directory
pub struct ShellTestRunner {
    runner: Arc<dyn CommandRunner>,
    cwd: PathBuf,
    timeout_ms: u64,
}

impl ShellTestRunner {
    pub fn new(runner: Arc<dyn CommandRunner>, cwd: impl Into<PathBuf>, timeout_ms: u64) -> Self {
        Self {
            runner,
            cwd: cwd.into(),
            timeout_ms,
        }
    }

    fn failure_lines(&self, output: &CommandOutput) -> Vec<String> {
        output
            .combined()
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && FAILURE_LINE.is_match(l))
            .take(MAX_FAILURE_LINES)
            .map(String::from)
            .collect()
    }
}

#[async_trait]
impl TestRunner for ShellTestRunner {
    async fn run(&self, command: &str) -> TestOutcome {
        debug!(%command, cwd = %self.cwd.display(), "ShellTestRunner::run: called");
        let request = CommandRequest::new(command, &self.cwd, self.timeout_ms);

        let output = match self.runner.run(&request).await {
            Ok(output) => output,
            Err(e) => {
                debug!(error = %e, "ShellTestRunner::run: launch failed");
                return TestOutcome::launch_failure(e.to_string());
            }
        };

        let passed = output.success();
        let mut failures = if passed { Vec::new() } else { self.failure_lines(&output) };
        if !passed && failures.is_empty() {
            // Nothing matched; keep the last non-empty line so there is something to show
            if let Some(last) = output.combined().lines().rev().find(|l| !l.trim().is_empty()) {
                failures.push(last.trim().to_string());
            } else {
                failures.push(format!("exit code {}", output.exit_code));
            }
        }

        debug!(passed, failure_count = failures.len(), "ShellTestRunner::run: complete");
        TestOutcome {
            passed,
            failures,
            output,
        }
    }
}
