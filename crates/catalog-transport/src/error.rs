//! Error taxonomy for authenticated requests

use std::time::Duration;

/// Errors from `Transport::send`.
///
/// Every variant is a distinct, inspectable failure class. The enum is
/// `Clone` so one refresh failure can be handed to every queued waiter and
/// one shared fetch result to every subscriber.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Request never reached the server or the response never arrived.
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// 401 that was not (or could no longer be) recovered by a refresh.
    #[error("unauthorized: {body}")]
    Unauthorized { body: String },

    /// The refresh call itself failed; credentials have been cleared.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// Any other non-2xx response, body passed through untouched.
    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request cancelled")]
    Cancelled,

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Unauthorized { .. } => Some(401),
            Error::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }

    /// Whether the caller must log in again.
    pub fn requires_login(&self) -> bool {
        matches!(self, Error::Unauthorized { .. } | Error::RefreshFailed(_))
    }

    /// Map a reqwest failure onto the taxonomy.
    pub(crate) fn from_reqwest(e: reqwest::Error, timeout: Duration) -> Self {
        if e.is_timeout() {
            Error::Timeout(timeout)
        } else if e.is_decode() {
            Error::Decode(e.to_string())
        } else if e.is_builder() {
            Error::InvalidRequest(e.to_string())
        } else {
            Error::Network(e.to_string())
        }
    }

    /// Label used for the `error_type` metric dimension.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Error::Network(_) => "network",
            Error::Timeout(_) => "timeout",
            Error::Unauthorized { .. } => "unauthorized",
            Error::RefreshFailed(_) => "refresh_failed",
            Error::Status { .. } => "status",
            Error::Cancelled => "cancelled",
            Error::Decode(_) => "decode",
            Error::InvalidRequest(_) => "invalid_request",
        }
    }
}

/// Result alias for transport operations.
pub type Result<T> = std::result::Result<T, Error>;
