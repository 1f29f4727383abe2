//! Gateway error types

use std::time::Duration;

use thiserror::Error;

/// Anything that stops a request from reaching or being answered by the gateway
///
/// Every variant except `Dispatched` means the request never reached the
/// gateway, so the caller may run the command itself.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request was delivered but no usable answer came back; the
    /// command may already have run
    #[error("Gateway accepted the request but failed: {0}")]
    Dispatched(Box<GatewayError>),

    #[error("Gateway unavailable: {0}")]
    Unavailable(String),

    #[error("Gateway {operation} timed out after {timeout:?}")]
    Timeout { operation: &'static str, timeout: Duration },

    #[error("Gateway protocol error: {0}")]
    Protocol(String),

    #[error("Gateway I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// True when the request may have been executed
    pub fn is_dispatched(&self) -> bool {
        matches!(self, GatewayError::Dispatched(_))
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Protocol(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message() {
        let err = GatewayError::Timeout {
            operation: "connect",
            timeout: Duration::from_millis(500),
        };
        assert_eq!(err.to_string(), "Gateway connect timed out after 500ms");
    }

    #[test]
    fn test_dispatched_wraps_cause() {
        let err = GatewayError::Dispatched(Box::new(GatewayError::Protocol("Response too large".to_string())));
        assert!(err.is_dispatched());
        assert!(err.to_string().contains("Response too large"));
        assert!(!GatewayError::Unavailable("refused".to_string()).is_dispatched());
    }

    #[test]
    fn test_json_error_is_protocol() {
        let err: GatewayError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(matches!(err, GatewayError::Protocol(_)));
    }
}
