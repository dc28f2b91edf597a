//! Error types for the client and the transports.
//!
//! # Design
//! Only local validation and resource acquisition produce `Err`. HTTP error
//! statuses are data: the executor logs them through a `DiagnosticSink` and
//! keeps going, so they never appear here.

/// Errors returned while building requests or encoding bodies.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The descriptor can never be sent (empty url, malformed header).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A header line without a `name: value` shape.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// Reading a file for a multipart body failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Failures of one transport operation, or of the transport itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The request could not be completed (connect, DNS, protocol).
    #[error("request failed: {0}")]
    Request(String),

    /// The per-request timeout elapsed.
    #[error("request timed out")]
    Timeout,

    /// A worker for the operation could not be started.
    #[error("failed to start operation: {0}")]
    Spawn(String),

    /// Completions can no longer be received.
    #[error("completion channel disconnected")]
    Disconnected,
}
