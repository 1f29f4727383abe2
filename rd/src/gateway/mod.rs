//! Gateway: a long-lived warm process that runs validation commands
//!
//! Callers couple to the [`Gateway`] trait. [`GatewayClient`] speaks the
//! JSON-over-newline protocol to a [`GatewayServer`] on a local TCP port;
//! [`GatewayProcess`] manages the background server's PID and port files.
//! Nothing depends on the gateway being up: see [`crate::exec::FallbackRunner`].

use std::path::PathBuf;

use async_trait::async_trait;

use crate::exec::{CommandOutput, CommandRequest};

pub mod client;
pub mod error;
pub mod messages;
pub mod process;
pub mod server;

pub use client::GatewayClient;
pub use error::GatewayError;
pub use messages::{GatewayRequest, GatewayResponse, MAX_MESSAGE_SIZE};
pub use process::{GatewayProcess, GatewayStatus, StartOutcome};
pub use server::GatewayServer;

/// Capability interface for the warm execution host
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Liveness check; must be checked before routing work
    async fn health(&self) -> bool;

    /// Execute a command with the same timeout/kill semantics as direct execution
    async fn run(&self, request: &CommandRequest) -> Result<CommandOutput, GatewayError>;

    /// Ask the gateway to drain and stop
    async fn shutdown(&self) -> Result<(), GatewayError>;
}

/// Directory holding the gateway's PID and port files
pub fn runtime_dir() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("ralphd")
}

/// Default PID file location
pub fn pid_file_path() -> PathBuf {
    runtime_dir().join("gateway.pid")
}

/// Default port file location (written once the listener is bound)
pub fn port_file_path() -> PathBuf {
    runtime_dir().join("gateway.port")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_share_runtime_dir() {
        assert!(pid_file_path().ends_with("ralphd/gateway.pid"));
        assert!(port_file_path().ends_with("ralphd/gateway.port"));
        assert_eq!(pid_file_path().parent(), port_file_path().parent());
    }
}
