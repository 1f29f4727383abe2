//! Gateway wire messages
//!
//! JSON-over-newline: one request line, one response line, one connection per request.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::exec::{CommandOutput, CommandRequest};

/// Largest accepted line in either direction (8 MiB)
pub const MAX_MESSAGE_SIZE: usize = 8 * 1024 * 1024;

/// Requests from a caller to the gateway
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum GatewayRequest {
    /// Liveness check
    Health,

    /// Execute a command inside the warm process
    Run {
        command: String,
        cwd: PathBuf,
        timeout_ms: u64,
    },

    /// Finish the in-flight request and close the listener
    Shutdown,
}

impl From<&CommandRequest> for GatewayRequest {
    fn from(req: &CommandRequest) -> Self {
        GatewayRequest::Run {
            command: req.command.clone(),
            cwd: req.cwd.clone(),
            timeout_ms: req.timeout_ms,
        }
    }
}

/// Responses from the gateway
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum GatewayResponse {
    /// Answer to Health
    Healthy { version: String, served: u64 },

    /// Answer to Run
    RunResult { output: CommandOutput },

    /// Acknowledgment
    Ok,

    /// Error response
    Error { message: String },
}
