//! Background gateway process management
//!
//! PID file and port file live side by side under [`super::runtime_dir`].
//! The PID file is written by whoever launches the server; the port file is
//! written by the server once its listener is bound.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use eyre::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::{Gateway, GatewayClient, pid_file_path, port_file_path};
use crate::config::GatewayConfig;

/// How long `start` waits for a freshly spawned server to answer Health
const STARTUP_WAIT: Duration = Duration::from_secs(5);

/// How long `stop` waits for the process to exit before escalating
const STOP_WAIT: Duration = Duration::from_secs(5);

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Snapshot of what is known about the background gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayStatus {
    pub pid: Option<u32>,
    pub port: Option<u16>,
    pub healthy: bool,
    pub version: Option<String>,
    pub served: Option<u64>,
}

/// Result of `GatewayProcess::start`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A healthy gateway was already listening
    AlreadyRunning { pid: Option<u32>, port: u16 },
    /// A new background server was launched
    Started { pid: u32, port: u16 },
}

/// Manages the gateway's PID and port files and its lifecycle
#[derive(Debug, Clone)]
pub struct GatewayProcess {
    pid_file: PathBuf,
    port_file: PathBuf,
    config: GatewayConfig,
}

impl GatewayProcess {
    /// Manager using the default runtime paths
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_paths(pid_file_path(), port_file_path(), config)
    }

    /// Manager with explicit paths (for testing)
    pub fn with_paths(pid_file: PathBuf, port_file: PathBuf, config: GatewayConfig) -> Self {
        debug!(?pid_file, ?port_file, "GatewayProcess::with_paths: called");
        Self {
            pid_file,
            port_file,
            config,
        }
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    pub fn port_file(&self) -> &Path {
        &self.port_file
    }

    /// Client for the port recorded in the port file
    pub fn client(&self) -> Option<GatewayClient> {
        GatewayClient::from_port_file(&self.port_file, self.config.host.clone()).map(|c| {
            c.with_timeout(self.config.health_timeout())
                .with_request_slack(self.config.request_slack())
        })
    }

    /// PID from the PID file, if that process is alive
    pub fn running_pid(&self) -> Option<u32> {
        self.read_pid().filter(|&pid| is_process_running(pid))
    }

    fn read_pid(&self) -> Option<u32> {
        let pid = fs::read_to_string(&self.pid_file).ok()?.trim().parse().ok();
        debug!(?pid, "GatewayProcess::read_pid: returning");
        pid
    }

    fn write_pid(&self, pid: u32) -> Result<()> {
        debug!(pid, ?self.pid_file, "GatewayProcess::write_pid: called");
        if let Some(parent) = self.pid_file.parent() {
            fs::create_dir_all(parent).context("Failed to create PID file directory")?;
        }
        fs::write(&self.pid_file, pid.to_string()).context("Failed to write PID file")?;
        Ok(())
    }

    /// Record the current process as the gateway (foreground and `gateway:serve`)
    pub fn register_self(&self) -> Result<()> {
        let pid = std::process::id();
        self.write_pid(pid)?;
        info!(pid, "Gateway registered");
        Ok(())
    }

    /// Remove PID and port files, ignoring ones already gone
    pub fn cleanup(&self) {
        for path in [&self.pid_file, &self.port_file] {
            if path.exists()
                && let Err(e) = fs::remove_file(path)
            {
                warn!(?path, error = %e, "Failed to remove gateway file");
            }
        }
    }

    /// Ask the recorded gateway whether it is healthy
    pub async fn status(&self) -> GatewayStatus {
        debug!("GatewayProcess::status: called");
        let pid = self.running_pid();
        let client = self.client();
        let port = client.as_ref().map(GatewayClient::port);

        let (healthy, version, served) = match &client {
            Some(client) => match client.status().await {
                Ok((version, served)) => (true, Some(version), Some(served)),
                Err(e) => {
                    debug!(error = %e, "GatewayProcess::status: health check failed");
                    (false, None, None)
                }
            },
            None => (false, None, None),
        };

        GatewayStatus {
            pid,
            port,
            healthy,
            version,
            served,
        }
    }

    /// Launch `exe gateway:serve` in the background unless a healthy gateway exists
    pub async fn start(&self, exe: &Path, extra_args: &[String]) -> Result<StartOutcome> {
        debug!(?exe, ?extra_args, "GatewayProcess::start: called");
        if let Some(client) = self.client()
            && client.health().await
        {
            let port = client.port();
            info!(port, "Gateway already running");
            return Ok(StartOutcome::AlreadyRunning {
                pid: self.running_pid(),
                port,
            });
        }

        // Stale files from a crashed server would mislead the readiness wait
        self.cleanup();

        info!("Starting gateway...");
        let child = Command::new(exe)
            .arg("gateway:serve")
            .args(extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn gateway process")?;

        let pid = child.id();
        self.write_pid(pid)?;

        let mut waited = Duration::ZERO;
        while waited < STARTUP_WAIT {
            if let Some(client) = self.client()
                && client.health().await
            {
                let port = client.port();
                info!(pid, port, "Gateway started");
                return Ok(StartOutcome::Started { pid, port });
            }
            if !is_process_running(pid) {
                self.cleanup();
                return Err(eyre::eyre!("Gateway process {} exited during startup", pid));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
            waited += POLL_INTERVAL;
        }

        Err(eyre::eyre!(
            "Gateway process {} did not become healthy within {:?}",
            pid,
            STARTUP_WAIT
        ))
    }

    /// Stop the gateway: Shutdown RPC first, SIGTERM if that fails, SIGKILL last
    ///
    /// Returns false when nothing was running.
    pub async fn stop(&self) -> Result<bool> {
        debug!("GatewayProcess::stop: called");
        let pid = self.running_pid();
        let client = self.client();

        if pid.is_none() && client.is_none() {
            debug!("GatewayProcess::stop: nothing recorded");
            self.cleanup();
            return Ok(false);
        }

        let mut rpc_ok = false;
        if let Some(client) = &client {
            match client.shutdown().await {
                Ok(()) => {
                    info!(port = client.port(), "Gateway acknowledged shutdown");
                    rpc_ok = true;
                }
                Err(e) => debug!(error = %e, "GatewayProcess::stop: shutdown RPC failed"),
            }
        }

        if let Some(pid) = pid {
            if rpc_ok && wait_for_exit(pid, STOP_WAIT).await {
                debug!(pid, "GatewayProcess::stop: exited after RPC");
            } else {
                info!(pid, "Sending SIGTERM to gateway");
                send_signal(pid, false).context("Failed to send SIGTERM")?;
                if !wait_for_exit(pid, STOP_WAIT).await {
                    warn!(pid, "Gateway did not stop gracefully, sending SIGKILL");
                    let _ = send_signal(pid, true);
                }
            }
        }

        self.cleanup();
        info!(?pid, "Gateway stopped");
        Ok(rpc_ok || pid.is_some())
    }
}

async fn wait_for_exit(pid: u32, limit: Duration) -> bool {
    let mut waited = Duration::ZERO;
    while is_process_running(pid) && waited < limit {
        tokio::time::sleep(POLL_INTERVAL).await;
        waited += POLL_INTERVAL;
    }
    !is_process_running(pid)
}

/// Check if a process with the given PID is running
#[cfg(unix)]
fn is_process_running(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    // Signal 0 checks existence without affecting the process
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
fn is_process_running(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn send_signal(pid: u32, force: bool) -> Result<()> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
    kill(Pid::from_raw(pid as i32), signal)?;
    Ok(())
}

#[cfg(not(unix))]
fn send_signal(pid: u32, _force: bool) -> Result<()> {
    Err(eyre::eyre!("Cannot signal process {} on this platform", pid))
}
