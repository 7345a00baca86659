//! Session error taxonomy.

use std::time::Duration;

use pagesync_core::{CoreError, RequestId};
use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced by the collaborative session client.
///
/// Transport failures (`Connection`, `Auth`) are retried transparently and
/// only reported to listeners; the rest reject the specific caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    /// Socket-level failure. Triggers a backoff reconnect.
    #[error("connection error: {0}")]
    Connection(String),

    /// Token fetch failed. Triggers a backoff reconnect.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A request got no response within its deadline.
    #[error("request {request_id} timed out after {after:?}")]
    Timeout {
        /// The request that timed out.
        request_id: RequestId,
        /// The deadline that elapsed.
        after: Duration,
    },

    /// The server answered with an `error` envelope.
    #[error("server error: {message}")]
    Server {
        /// Server-provided reason.
        message: String,
        /// Optional machine-readable code.
        code: Option<String>,
    },

    /// Denied locally by the token bucket before transmission.
    #[error("rate limited: too many requests")]
    RateLimited,

    /// The session was torn down while the request was outstanding.
    #[error("connection closed: {0}")]
    Closed(String),

    /// A frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server answered with an envelope of the wrong type.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// The configured endpoint is not a usable WebSocket URL.
    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(String),

    /// The configuration is unusable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SessionError {
    /// Returns true if the failure is transient and handled by reconnecting.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Auth(_))
    }
}

impl From<CoreError> for SessionError {
    fn from(e: CoreError) -> Self {
        Self::Protocol(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connection(e.to_string())
    }
}

impl From<url::ParseError> for SessionError {
    fn from(e: url::ParseError) -> Self {
        Self::InvalidUrl(e.to_string())
    }
}
