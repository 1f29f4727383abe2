//! Gateway client
//!
//! One TCP connection per request: write a JSON line, read a JSON line.

use std::fs;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use super::messages::{GatewayRequest, GatewayResponse, MAX_MESSAGE_SIZE};
use super::{Gateway, GatewayError};
use crate::exec::{CommandOutput, CommandRequest};

/// Default timeout for connect and health checks
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Default slack on top of a Run request's own timeout
const DEFAULT_REQUEST_SLACK: Duration = Duration::from_secs(5);

/// Client for a gateway listening on `host:port`
#[derive(Debug, Clone)]
pub struct GatewayClient {
    host: String,
    port: u16,
    timeout: Duration,
    request_slack: Duration,
}

impl GatewayClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: DEFAULT_TIMEOUT,
            request_slack: DEFAULT_REQUEST_SLACK,
        }
    }

    /// Build a client from a port file written by a running server
    ///
    /// Returns None when the file is missing or unreadable.
    pub fn from_port_file(path: &Path, host: impl Into<String>) -> Option<Self> {
        debug!(?path, "GatewayClient::from_port_file: called");
        let port = fs::read_to_string(path).ok()?.trim().parse().ok()?;
        Some(Self::new(host, port))
    }

    /// Timeout for connecting and for Health/Shutdown round trips
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Extra time allowed on top of a Run request's command timeout
    pub fn with_request_slack(mut self, slack: Duration) -> Self {
        self.request_slack = slack;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Ask the gateway for its version and served-request count
    pub async fn status(&self) -> Result<(String, u64), GatewayError> {
        debug!(port = self.port, "GatewayClient::status: called");
        match self.send(GatewayRequest::Health, self.timeout).await? {
            GatewayResponse::Healthy { version, served } => Ok((version, served)),
            other => Err(unexpected(other)),
        }
    }

    /// Send a request and wait up to `deadline` for the response
    ///
    /// Failures after the request line was written come back as
    /// `GatewayError::Dispatched`.
    pub async fn send(&self, request: GatewayRequest, deadline: Duration) -> Result<GatewayResponse, GatewayError> {
        debug!(host = %self.host, port = self.port, ?request, "GatewayClient::send: called");

        let mut stream = tokio::time::timeout(self.timeout, TcpStream::connect((self.host.as_str(), self.port)))
            .await
            .map_err(|_| GatewayError::Timeout {
                operation: "connect",
                timeout: self.timeout,
            })?
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        tokio::time::timeout(self.timeout, write_request(&mut stream, &request))
            .await
            .map_err(|_| GatewayError::Timeout {
                operation: "send",
                timeout: self.timeout,
            })??;

        let response = tokio::time::timeout(deadline, read_response(&mut stream))
            .await
            .map_err(|_| GatewayError::Timeout {
                operation: "request",
                timeout: deadline,
            })
            .and_then(|r| r);
        response.map_err(|e| GatewayError::Dispatched(Box::new(e)))
    }
}

async fn write_request(stream: &mut TcpStream, request: &GatewayRequest) -> Result<(), GatewayError> {
    let json = serde_json::to_string(request)?;
    if json.len() > MAX_MESSAGE_SIZE {
        return Err(GatewayError::Protocol(format!("Message too large: {} bytes", json.len())));
    }

    stream.write_all(json.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.flush().await?;
    Ok(())
}

async fn read_response(stream: &mut TcpStream) -> Result<GatewayResponse, GatewayError> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let bytes_read = reader.read_line(&mut line).await?;
    if bytes_read == 0 {
        return Err(GatewayError::Protocol("Connection closed before response".to_string()));
    }
    if bytes_read > MAX_MESSAGE_SIZE {
        return Err(GatewayError::Protocol(format!("Response too large: {} bytes", bytes_read)));
    }

    let response: GatewayResponse = serde_json::from_str(line.trim())?;
    debug!(?response, "GatewayClient: received response");
    Ok(response)
}

fn unexpected(response: GatewayResponse) -> GatewayError {
    match response {
        GatewayResponse::Error { message } => GatewayError::Protocol(format!("Gateway error: {}", message)),
        other => GatewayError::Protocol(format!("Unexpected response: {:?}", other)),
    }
}

#[async_trait]
impl Gateway for GatewayClient {
    async fn health(&self) -> bool {
        match self.status().await {
            Ok((version, served)) => {
                debug!(%version, served, "GatewayClient::health: healthy");
                true
            }
            Err(e) => {
                debug!(error = %e, "GatewayClient::health: unhealthy");
                false
            }
        }
    }

    async fn run(&self, request: &CommandRequest) -> Result<CommandOutput, GatewayError> {
        debug!(command = %request.command, "GatewayClient::run: called");
        let deadline = Duration::from_millis(request.timeout_ms) + self.request_slack;
        match self.send(GatewayRequest::from(request), deadline).await? {
            GatewayResponse::RunResult { output } => Ok(output),
            other => Err(GatewayError::Dispatched(Box::new(unexpected(other)))),
        }
    }

    async fn shutdown(&self) -> Result<(), GatewayError> {
        debug!(port = self.port, "GatewayClient::shutdown: called");
        match self.send(GatewayRequest::Shutdown, self.timeout).await? {
            GatewayResponse::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}
