use crate::transport::TransportError;
use thiserror::Error;

/// Main error type for API client operations
#[derive(Debug, Error)]
pub enum ApiError {
    /// Caller supplied a missing or malformed required input; no request was sent
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A grant was answered but the token is unusable (auth error or insufficient scope)
    #[error("invalid token (HTTP {status}): {message}")]
    InvalidToken { status: u16, message: String },

    /// The response could not be interpreted; the raw body is kept for diagnosis
    #[error("unexpected response (HTTP {status}): {body}")]
    ApiResponse { status: u16, body: String },

    /// Resolution of a permalink or stream did not yield a redirect
    #[error("resolver error (HTTP {status}): {message}")]
    Resolver { status: u16, message: String },

    /// The underlying HTTP client failed in a way that indicates it is broken
    #[error("HTTP transport broken after {attempts} attempt(s): {source}")]
    BrokenTransport {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// Operation preconditions on the current token were violated
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// Ordinary transport failure (timeout, connection refused, ...)
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// HTTP client construction error
    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Create an invalid-token error
    pub fn invalid_token(status: u16, message: impl Into<String>) -> Self {
        ApiError::InvalidToken {
            status,
            message: message.into(),
        }
    }

    /// Create a resolver error
    pub fn resolver(status: u16, message: impl Into<String>) -> Self {
        ApiError::Resolver {
            status,
            message: message.into(),
        }
    }

    /// Check if this error carries a 404 status
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    /// Check if this error means the transport can no longer be trusted
    pub fn is_fatal(&self) -> bool {
        matches!(self, ApiError::BrokenTransport { .. })
    }

    /// Get the HTTP status code if the error came from a response
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::InvalidToken { status, .. }
            | ApiError::ApiResponse { status, .. }
            | ApiError::Resolver { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for API client operations
pub type Result<T> = std::result::Result<T, ApiError>;
