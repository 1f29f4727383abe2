//! Gateway server
//!
//! Serves one connection at a time. A request that is being handled always
//! finishes before a shutdown (RPC or signal) takes effect, so shutdown drains
//! in-flight work before the listener closes.

use std::fs;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use super::GatewayError;
use super::messages::{GatewayRequest, GatewayResponse, MAX_MESSAGE_SIZE};
use crate::VERSION;
use crate::exec::{CommandRequest, execute_command};

/// How long a connected client gets to send its request line
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound listener plus bookkeeping for the serve loop
#[derive(Debug)]
pub struct GatewayServer {
    listener: TcpListener,
    port: u16,
    port_file: Option<PathBuf>,
}

impl GatewayServer {
    /// Bind `host:preferred_port`, moving up one port at a time while occupied
    ///
    /// Port 0 asks the OS for any free port.
    pub async fn bind(host: &str, preferred_port: u16, port_attempts: u16) -> Result<Self, GatewayError> {
        debug!(%host, preferred_port, port_attempts, "GatewayServer::bind: called");
        let attempts = if preferred_port == 0 { 1 } else { port_attempts.max(1) };

        for offset in 0..attempts {
            let Some(port) = preferred_port.checked_add(offset) else {
                break;
            };
            match TcpListener::bind((host, port)).await {
                Ok(listener) => {
                    let port = listener.local_addr()?.port();
                    if offset > 0 {
                        info!(preferred_port, port, "Preferred gateway port busy, using fallback");
                    }
                    return Ok(Self {
                        listener,
                        port,
                        port_file: None,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                    debug!(port, "GatewayServer::bind: port in use");
                }
                Err(e) => return Err(GatewayError::Io(e)),
            }
        }

        Err(GatewayError::Unavailable(format!(
            "no free port in {}..{}",
            preferred_port,
            preferred_port.saturating_add(attempts)
        )))
    }

    /// Publish the bound port in `path` while serving
    pub fn with_port_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.port_file = Some(path.into());
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve until a Shutdown request arrives or `shutdown` resolves
    ///
    /// Returns the number of Run requests served.
    pub async fn serve<F>(self, shutdown: F) -> Result<u64, GatewayError>
    where
        F: Future<Output = ()>,
    {
        debug!(port = self.port, "GatewayServer::serve: called");
        if let Some(path) = &self.port_file {
            write_port_file(path, self.port)?;
        }
        info!(port = self.port, version = VERSION, "Gateway listening");

        let mut served: u64 = 0;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Gateway received shutdown signal");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            debug!(%peer, "GatewayServer::serve: connection accepted");
                            if handle_connection(stream, &mut served).await {
                                info!("Gateway shutdown requested over RPC");
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "Gateway accept failed"),
                    }
                }
            }
        }

        drop(self.listener);
        if let Some(path) = &self.port_file {
            remove_port_file(path);
        }
        info!(served, "Gateway stopped");
        Ok(served)
    }
}

/// Handle one request; returns true when the caller asked for shutdown
async fn handle_connection(mut stream: TcpStream, served: &mut u64) -> bool {
    let request = match tokio::time::timeout(READ_TIMEOUT, read_request(&mut stream)).await {
        Ok(Ok(request)) => request,
        Ok(Err(e)) => {
            debug!(error = %e, "handle_connection: bad request");
            send_response(&mut stream, GatewayResponse::Error { message: e.to_string() }).await;
            return false;
        }
        Err(_) => {
            debug!("handle_connection: client sent nothing before timeout");
            return false;
        }
    };

    let (response, stop) = match request {
        GatewayRequest::Health => (
            GatewayResponse::Healthy {
                version: VERSION.to_string(),
                served: *served,
            },
            false,
        ),
        GatewayRequest::Run {
            command,
            cwd,
            timeout_ms,
        } => {
            let request = CommandRequest::new(command, cwd, timeout_ms);
            let response = match execute_command(&request).await {
                Ok(output) => GatewayResponse::RunResult { output },
                Err(e) => GatewayResponse::Error { message: e.to_string() },
            };
            *served += 1;
            (response, false)
        }
        GatewayRequest::Shutdown => (GatewayResponse::Ok, true),
    };

    send_response(&mut stream, response).await;
    stop
}

async fn read_request(stream: &mut TcpStream) -> Result<GatewayRequest, GatewayError> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let bytes_read = reader.read_line(&mut line).await?;

    if bytes_read > MAX_MESSAGE_SIZE {
        return Err(GatewayError::Protocol(format!("Message too large: {} bytes", bytes_read)));
    }
    if line.trim().is_empty() {
        return Err(GatewayError::Protocol("Empty message received".to_string()));
    }

    let request: GatewayRequest = serde_json::from_str(line.trim())?;
    debug!(?request, "read_request: parsed request");
    Ok(request)
}

async fn send_response(stream: &mut TcpStream, response: GatewayResponse) {
    let result = async {
        let mut json = serde_json::to_string(&response)?;
        if json.len() > MAX_MESSAGE_SIZE {
            warn!(bytes = json.len(), "Gateway response too large, sending error instead");
            json = serde_json::to_string(&GatewayResponse::Error {
                message: format!("Response too large: {} bytes", json.len()),
            })?;
        }
        stream.write_all(json.as_bytes()).await?;
        stream.write_all(b"\n").await?;
        stream.flush().await?;
        Ok::<_, GatewayError>(())
    }
    .await;

    if let Err(e) = result {
        warn!(error = %e, "Failed to send gateway response");
    }
}

fn write_port_file(path: &PathBuf, port: u16) -> Result<(), GatewayError> {
    debug!(?path, port, "write_port_file: called");
    // Polled by GatewayProcess::start; never visible half-written
    specstore::atomic_write(path, port.to_string())
        .map_err(|e| GatewayError::Unavailable(format!("cannot write port file: {}", e)))
}

fn remove_port_file(path: &PathBuf) {
    if path.exists()
        && let Err(e) = fs::remove_file(path)
    {
        warn!(?path, error = %e, "Failed to remove port file");
    }
}

/// Resolves on SIGTERM or SIGINT
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut sigint, mut sigterm) = match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
        (Ok(i), Ok(t)) => (i, t),
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "Failed to install signal handlers, waiting for ctrl-c only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigint.recv() => warn!("SIGINT received"),
        _ = sigterm.recv() => warn!("SIGTERM received"),
    }
}

/// Resolves on ctrl-c
#[cfg(not(unix))]
pub async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
