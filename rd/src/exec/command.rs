//! Shell command execution with a hard timeout
//!
//! Both the direct path and the gateway worker call [`execute_command`], so a
//! command's observable result does not depend on where it ran.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Default command timeout (2 minutes)
pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;

/// Bytes kept from the end of each output stream (512 KiB)
///
/// Even fully JSON-escaped, both streams fit in one gateway response.
pub const MAX_OUTPUT_BYTES: usize = 512 * 1024;

/// Errors launching a command (a non-zero exit is not an error)
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// A command to run through `sh -c`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: String,
    pub cwd: PathBuf,
    pub timeout_ms: u64,
}

impl CommandRequest {
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>, timeout_ms: u64) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
            timeout_ms,
        }
    }
}

/// Captured result of a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,

    /// Process exit code (-1 when killed or terminated by a signal)
    pub exit_code: i32,

    pub timed_out: bool,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// stdout and stderr joined, for error analysis
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (true, _) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Anything that can execute a CommandRequest
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, request: &CommandRequest) -> Result<CommandOutput, ExecError>;
}

/// Spawns a fresh process per command
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectRunner;

#[async_trait]
impl CommandRunner for DirectRunner {
    async fn run(&self, request: &CommandRequest) -> Result<CommandOutput, ExecError> {
        execute_command(request).await
    }
}

/// Run `request.command` via `sh -c`, killing the whole process group on timeout
pub async fn execute_command(request: &CommandRequest) -> Result<CommandOutput, ExecError> {
    debug!(command = %request.command, cwd = ?request.cwd, timeout_ms = request.timeout_ms, "execute_command: called");
    let start = Instant::now();

    let mut cmd = tokio::process::Command::new("sh");
    cmd.arg("-c")
        .arg(&request.command)
        .current_dir(&request.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let child = cmd.spawn().map_err(|e| ExecError::Spawn {
        command: request.command.clone(),
        source: e,
    })?;
    let pid = child.id();

    match tokio::time::timeout(Duration::from_millis(request.timeout_ms), child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let duration_ms = start.elapsed().as_millis() as u64;
            let exit_code = output.status.code().unwrap_or(-1);
            debug!(exit_code, duration_ms, "execute_command: completed");
            Ok(CommandOutput {
                stdout: cap_output(&output.stdout),
                stderr: cap_output(&output.stderr),
                exit_code,
                timed_out: false,
                duration_ms,
            })
        }
        Ok(Err(e)) => {
            debug!(error = %e, "execute_command: wait failed");
            Err(ExecError::Spawn {
                command: request.command.clone(),
                source: e,
            })
        }
        Err(_) => {
            warn!(command = %request.command, timeout_ms = request.timeout_ms, "Command timed out, killing");
            kill_process_group(pid);
            Ok(CommandOutput {
                stdout: String::new(),
                stderr: format!("Command timed out after {}ms", request.timeout_ms),
                exit_code: -1,
                timed_out: true,
                duration_ms: start.elapsed().as_millis() as u64,
            })
        }
    }
}

/// Decode a stream, keeping only its last MAX_OUTPUT_BYTES
fn cap_output(bytes: &[u8]) -> String {
    if bytes.len() <= MAX_OUTPUT_BYTES {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let dropped = bytes.len() - MAX_OUTPUT_BYTES;
    debug!(dropped, "cap_output: truncating");
    format!(
        "[... {} bytes truncated ...]\n{}",
        dropped,
        String::from_utf8_lossy(&bytes[dropped..])
    )
}

/// SIGKILL every process spawned under the command's group
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if let Some(pid) = pid
        && let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL)
    {
        debug!(pid, error = %e, "kill_process_group: group already gone");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_execute_success() {
        let temp = tempdir().unwrap();
        let out = execute_command(&CommandRequest::new("echo ok", temp.path(), 30_000))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "ok");
    }

    #[tokio::test]
    async fn test_execute_failure_keeps_stderr() {
        let temp = tempdir().unwrap();
        let out = execute_command(&CommandRequest::new("echo bad >&2; exit 3", temp.path(), 30_000))
            .await
            .unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stderr.trim(), "bad");
        assert_eq!(out.combined().trim(), "bad");
    }

    #[tokio::test]
    async fn test_execute_runs_in_cwd() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("marker.txt"), "here").unwrap();
        let out = execute_command(&CommandRequest::new("cat marker.txt", temp.path(), 30_000))
            .await
            .unwrap();
        assert_eq!(out.stdout, "here");
    }

    #[tokio::test]
    async fn test_execute_timeout_is_reported_not_raised() {
        let temp = tempdir().unwrap();
        let out = execute_command(&CommandRequest::new("sleep 10", temp.path(), 100))
            .await
            .unwrap();
        assert!(out.timed_out);
        assert!(!out.success());
        assert!(out.duration_ms < 5_000);
    }

    #[tokio::test]
    async fn test_missing_cwd_is_spawn_error() {
        let result = execute_command(&CommandRequest::new("true", "/nonexistent/dir/for/sure", 1_000)).await;
        assert!(matches!(result, Err(ExecError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_large_output_keeps_tail() {
        let temp = tempdir().unwrap();
        let out = execute_command(&CommandRequest::new(
            "head -c 900000 /dev/zero | tr '\\0' a; echo END",
            temp.path(),
            30_000,
        ))
        .await
        .unwrap();
        assert!(out.success());
        assert!(out.stdout.starts_with("[... 375716 bytes truncated ...]\n"));
        assert!(out.stdout.ends_with("aaaaEND\n"));
    }

    #[test]
    fn test_cap_output_passes_small_streams() {
        assert_eq!(cap_output(b"short"), "short");
        let capped = cap_output(&vec![b'x'; MAX_OUTPUT_BYTES + 3]);
        assert!(capped.starts_with("[... 3 bytes truncated ...]\n"));
        assert_eq!(capped.len() - capped.find('\n').unwrap() - 1, MAX_OUTPUT_BYTES);
    }

    #[test]
    fn test_combined_output() {
        let out = CommandOutput {
            stdout: "a".to_string(),
            stderr: "b".to_string(),
            ..Default::default()
        };
        assert_eq!(out.combined(), "a\nb");
    }
}
