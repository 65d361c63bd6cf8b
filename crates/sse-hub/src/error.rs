//! Error types for SSE Hub

use thiserror::Error;

/// Failures reported by a transport handle
#[derive(Error, Debug)]
pub enum SinkError {
    /// The stream was already terminated by the server side
    #[error("stream already ended")]
    Ended,

    /// The peer went away before the frame could be queued
    #[error("peer closed the stream")]
    Closed,

    /// The outbound buffer has no room for another frame
    #[error("outbound buffer is full")]
    Full,

    /// The handle cannot report peer closure
    #[error("close notification not supported by this handle")]
    ListenerUnsupported,
}

/// Failures decoding a `data:` payload on the consumer side
#[cfg(feature = "client")]
#[derive(Error, Debug)]
pub enum PayloadError {
    /// Text was not valid JSON
    #[error("invalid JSON payload: {source}")]
    InvalidJson {
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    /// Text decoded to something other than a JSON object (including null)
    #[error("payload is not a JSON object: {raw}")]
    NotAnObject { raw: String },
}

/// Errors reported by a stream subscription
#[cfg(feature = "client")]
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered the subscription with a non-success status
    #[error("Unexpected status: {0}")]
    Status(u16),
}
