//! Error types for the push connection.

/// Errors returned by the connection manager's public API.
///
/// Transport failures never show up here: they are retried and surface only
/// as status changes.
#[derive(Debug, thiserror::Error)]
pub enum LiveError {
    #[error("no Tokio runtime available to drive the connection")]
    NoRuntime,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors reported by a transport through [`TransportEvent::Error`](crate::TransportEvent::Error).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP status {0}")]
    Status(reqwest::StatusCode),

    #[error("transport error: {0}")]
    Other(String),
}
