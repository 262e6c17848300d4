//! Failure classes for the proxy and the lookup client.
//!
//! The `Display` text of each variant is exactly what ends up in the
//! `error` field of the response envelope (or in front of the user), so
//! keep it human-readable.

use lambda_http::http::StatusCode;
use thiserror::Error;

pub const TIMEOUT_MESSAGE: &str =
    "The lead certification service took too long to respond. Please try again.";

pub const TRANSPORT_MESSAGE: &str =
    "Unable to reach the lead certification service. Please check your connection and try again.";

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Query parameter is required")]
    MissingQuery,

    #[error("ArcGIS API returned {status}: {reason}")]
    UpstreamHttp { status: u16, reason: String },

    #[error("ArcGIS API Error: {0}")]
    UpstreamData(String),

    #[error("ArcGIS API returned an unreadable response")]
    UpstreamUnreadable(#[source] serde_json::Error),

    #[error("{}", TIMEOUT_MESSAGE)]
    Timeout,

    /// The detail is logged but not shown to the caller.
    #[error("{}", TRANSPORT_MESSAGE)]
    Transport(#[source] reqwest::Error),

    #[error("Internal server error")]
    Internal(String),
}

impl ProxyError {
    /// Classify a failure from the HTTP client. Timeouts raised by reqwest
    /// itself are treated the same as our own bounded wait.
    pub fn from_transport(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProxyError::Timeout
        } else {
            ProxyError::Transport(e)
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::MissingQuery => StatusCode::BAD_REQUEST,
            ProxyError::UpstreamHttp { .. }
            | ProxyError::UpstreamData(_)
            | ProxyError::UpstreamUnreadable(_)
            | ProxyError::Transport(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub const INVALID_ACCOUNT_MESSAGE: &str = "Please enter a valid OPA number (8-10 digits).";

pub const LOOKUP_TIMEOUT_MESSAGE: &str = "Search timed out - please try again.";

pub const LOOKUP_CANCELLED_MESSAGE: &str = "Search was cancelled - please try again.";

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("{}", INVALID_ACCOUNT_MESSAGE)]
    Validation,

    #[error("{}", LOOKUP_TIMEOUT_MESSAGE)]
    Timeout,

    /// The search was dropped before it finished.
    #[error("{}", LOOKUP_CANCELLED_MESSAGE)]
    Cancelled,

    /// The proxy (or ArcGIS, for direct lookups) answered, but not with data.
    #[error("{0}")]
    Proxy(String),

    #[error("Failed to connect to the lead certification service: {0}")]
    Transport(#[source] reqwest::Error),
}

/// Direct lookups reuse the upstream client; its failures keep their
/// message, except that timeouts and transport problems keep their kind.
impl From<ProxyError> for LookupError {
    fn from(e: ProxyError) -> Self {
        match e {
            ProxyError::Timeout => LookupError::Timeout,
            ProxyError::Transport(e) => LookupError::Transport(e),
            other => LookupError::Proxy(other.to_string()),
        }
    }
}
