//! Gateway-first command execution with transparent direct fallback

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::command::{CommandOutput, CommandRequest, CommandRunner, ExecError, execute_command};
use crate::gateway::{Gateway, GatewayError};

/// Routes commands through a gateway when it answers a health check in time,
/// otherwise spawns them directly
///
/// The gateway only affects latency: both paths end in the same
/// `execute_command`, so the observable result is the same either way.
pub struct FallbackRunner<G: Gateway> {
    gateway: Option<G>,
    health_timeout: Duration,
}

impl<G: Gateway> FallbackRunner<G> {
    pub fn new(gateway: G, health_timeout: Duration) -> Self {
        Self {
            gateway: Some(gateway),
            health_timeout,
        }
    }

    /// A runner that never consults a gateway
    pub fn direct_only() -> Self {
        Self {
            gateway: None,
            health_timeout: Duration::ZERO,
        }
    }

    async fn try_gateway(&self, gateway: &G, request: &CommandRequest) -> Result<CommandOutput, GatewayError> {
        match tokio::time::timeout(self.health_timeout, gateway.health()).await {
            Ok(true) => {}
            Ok(false) => return Err(GatewayError::Unavailable("health check failed".to_string())),
            Err(_) => {
                return Err(GatewayError::Timeout {
                    operation: "health",
                    timeout: self.health_timeout,
                });
            }
        }
        gateway.run(request).await
    }
}

#[async_trait]
impl<G: Gateway> CommandRunner for FallbackRunner<G> {
    async fn run(&self, request: &CommandRequest) -> Result<CommandOutput, ExecError> {
        debug!(command = %request.command, "FallbackRunner::run: called");
        if let Some(gateway) = &self.gateway {
            match self.try_gateway(gateway, request).await {
                Ok(output) => {
                    debug!(exit_code = output.exit_code, "FallbackRunner::run: served by gateway");
                    return Ok(output);
                }
                Err(e) if e.is_dispatched() => {
                    // The command may already have run
                    warn!(error = %e, "Gateway failed after accepting the command, not re-running");
                    return Ok(dispatch_failure(&e));
                }
                Err(e) => warn!(error = %e, "Gateway unavailable, running command directly"),
            }
        }
        execute_command(request).await
    }
}

/// Failed outcome for a command whose gateway result was lost
fn dispatch_failure(error: &GatewayError) -> CommandOutput {
    CommandOutput {
        stderr: error.to_string(),
        exit_code: -1,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Scriptable in-process gateway
    struct FakeGateway {
        healthy: bool,
        health_delay: Duration,
        lose_result: bool,
        runs: AtomicUsize,
    }

    impl FakeGateway {
        fn new(healthy: bool) -> Self {
            Self {
                healthy,
                health_delay: Duration::ZERO,
                lose_result: false,
                runs: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Gateway for FakeGateway {
        async fn health(&self) -> bool {
            tokio::time::sleep(self.health_delay).await;
            self.healthy
        }

        async fn run(&self, request: &CommandRequest) -> Result<CommandOutput, GatewayError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let output = execute_command(request)
                .await
                .map_err(|e| GatewayError::Protocol(e.to_string()))?;
            if self.lose_result {
                return Err(GatewayError::Dispatched(Box::new(GatewayError::Protocol(
                    "Response too large".to_string(),
                ))));
            }
            Ok(output)
        }

        async fn shutdown(&self) -> Result<(), GatewayError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_healthy_gateway_serves_request() {
        let temp = tempdir().unwrap();
        let runner = FallbackRunner::new(FakeGateway::new(true), Duration::from_millis(500));
        let out = runner
            .run(&CommandRequest::new("echo via", temp.path(), 5_000))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "via");
        assert_eq!(runner.gateway.as_ref().unwrap().runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unhealthy_gateway_falls_back() {
        let temp = tempdir().unwrap();
        let runner = FallbackRunner::new(FakeGateway::new(false), Duration::from_millis(500));
        let out = runner
            .run(&CommandRequest::new("echo direct; exit 4", temp.path(), 5_000))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "direct");
        assert_eq!(out.exit_code, 4);
        assert_eq!(runner.gateway.as_ref().unwrap().runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_slow_health_check_falls_back() {
        let temp = tempdir().unwrap();
        let gateway = FakeGateway {
            health_delay: Duration::from_secs(5),
            ..FakeGateway::new(true)
        };
        let runner = FallbackRunner::new(gateway, Duration::from_millis(50));
        let out = runner
            .run(&CommandRequest::new("echo direct", temp.path(), 5_000))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "direct");
        assert_eq!(runner.gateway.as_ref().unwrap().runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_lost_result_is_not_rerun() {
        let temp = tempdir().unwrap();
        let gateway = FakeGateway {
            lose_result: true,
            ..FakeGateway::new(true)
        };
        let runner = FallbackRunner::new(gateway, Duration::from_millis(500));
        let out = runner
            .run(&CommandRequest::new("echo run >> runs.log", temp.path(), 5_000))
            .await
            .unwrap();

        assert!(!out.success());
        assert!(out.stderr.contains("Response too large"));
        let runs = std::fs::read_to_string(temp.path().join("runs.log")).unwrap();
        assert_eq!(runs.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_direct_only() {
        let temp = tempdir().unwrap();
        let runner: FallbackRunner<FakeGateway> = FallbackRunner::direct_only();
        let out = runner.run(&CommandRequest::new("echo x", temp.path(), 5_000)).await.unwrap();
        assert_eq!(out.stdout.trim(), "x");
    }
}
