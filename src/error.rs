//! Completion client error types.

use thiserror::Error as ThisError;

/// Feature label attached to rate-limit errors, used by callers to pick a
/// user-facing message.
pub const RATE_LIMIT_FEATURE: &str = "chat messages and commands";

#[derive(Debug, ThisError)]
pub enum Error {
    /// Any non-2xx response not otherwise classified. The body has been
    /// drained in full before this is raised.
    #[error("HTTP {status} {status_text} at {url}: {message}")]
    Network {
        url: String,
        status: u16,
        status_text: String,
        message: String,
        trace_id: Option<String>,
    },

    /// A 429 response. `retry_after` and `limit` are taken from the response
    /// headers; `retry_after` is kept as the raw header value.
    #[error("rate limited for {feature}: {message}")]
    RateLimit {
        feature: String,
        message: String,
        upgrade_available: bool,
        limit: Option<u32>,
        retry_after: Option<String>,
    },

    /// The server answered with a custom authentication challenge. Detected
    /// from the response headers before any body is read.
    #[error("authentication challenge required")]
    NeedsAuthChallenge,

    /// Socket-level failures, premature close, malformed chunk framing.
    #[error("{0}")]
    Connection(String),

    /// The request could not be assembled (e.g. an invalid custom header).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// HTTP status associated with this error, when one exists.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Network { status, .. } => Some(*status),
            Error::RateLimit { .. } => Some(429),
            Error::NeedsAuthChallenge => Some(401),
            Error::Connection(_) | Error::InvalidRequest(_) => None,
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Error::RateLimit { .. })
    }

    /// Classify a reqwest transport failure. A refused connection is
    /// rewritten into a user-facing message; everything else passes through
    /// as a connection error.
    pub(crate) fn from_transport(e: reqwest::Error, endpoint: &str) -> Self {
        if e.is_connect() {
            Error::Connection(format!(
                "could not connect to {endpoint}: please ensure the server is reachable"
            ))
        } else {
            Error::Connection(e.to_string())
        }
    }
}
