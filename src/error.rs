//! Error types for the audio gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Error types that can occur while serving a request
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("Missing audio ID")]
    MissingIdentifier,

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Client disconnected after {bytes} bytes")]
    RelayInterrupted { bytes: u64 },

    #[error("Relay error: {0}")]
    RelayError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::IoError(err.to_string())
    }
}

impl GatewayError {
    /// Convert error to HTTP status code
    ///
    /// - Missing identifier: 400, the client must supply one
    /// - Upstream unreachable (refused, DNS, timeout): 502
    /// - Everything else produced by the gateway itself: 500
    pub fn to_http_status(&self) -> u16 {
        match self {
            GatewayError::MissingIdentifier => 400,
            GatewayError::MethodNotAllowed(_) => 405,
            GatewayError::UpstreamUnreachable(_) => 502,

            GatewayError::CacheError(_) => 500,
            GatewayError::RelayInterrupted { .. } => 500,
            GatewayError::RelayError(_) => 500,
            GatewayError::ConfigError(_) => 500,
            GatewayError::IoError(_) => 500,
            GatewayError::InternalError(_) => 500,
        }
    }

    /// Message placed in the `{"message": ...}` body of gateway-generated errors
    ///
    /// Upstream failure details stay in the logs; clients only see a stable text.
    pub fn client_message(&self) -> String {
        match self {
            GatewayError::MissingIdentifier => "Missing audio ID".to_string(),
            GatewayError::MethodNotAllowed(_) => "Method not allowed".to_string(),
            GatewayError::UpstreamUnreachable(_) => "Proxy fetch failed".to_string(),
            _ => "Internal gateway error".to_string(),
        }
    }

    /// Whether the request continues after this error (cache failures only)
    pub fn is_degradable(&self) -> bool {
        matches!(self, GatewayError::CacheError(_))
    }

    /// Whether this error belongs in the error-level log stream
    ///
    /// A client hanging up mid-stream is a normal early termination.
    pub fn is_severe(&self) -> bool {
        !matches!(
            self,
            GatewayError::RelayInterrupted { .. }
                | GatewayError::MissingIdentifier
                | GatewayError::MethodNotAllowed(_)
        )
    }
}
