//! Transport error taxonomy.
//!
//! # Responsibilities
//! - One error type for everything that can end a request cycle
//! - Classify errors for the retry decision (timeout vs. retryable fault)
//!
//! # Design Decisions
//! - Timeouts are terminal and never retried
//! - Aborts are terminal and surfaced as their own request state
//! - Protocol-level non-2xx statuses are not errors of this layer

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Errors that can end a request/response cycle.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer closed the connection before the response completed.
    #[error("connection closed before the response completed")]
    ConnectionClosed,

    /// Socket-level I/O failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The status line could not be parsed.
    #[error("malformed status line: {0:?}")]
    MalformedStatusLine(String),

    /// A header line had no `:` separator or was not valid text.
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    /// A chunk-length line was not valid hexadecimal.
    #[error("malformed chunk length: {0:?}")]
    MalformedChunkLength(String),

    /// Connect or request deadline elapsed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the request.
    #[error("request aborted")]
    Aborted,

    /// Content decoding failed.
    #[error("decompression failed: {0}")]
    Decompress(io::Error),

    /// The request URL cannot be used for HTTP/1.1.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The application-supplied upload source failed.
    #[error("upload source failed: {0}")]
    Upload(io::Error),

    /// Redirect budget exhausted.
    #[error("too many redirects (limit {0})")]
    TooManyRedirects(u32),

    /// The transport was shut down while the request was pending.
    #[error("transport shut down")]
    Shutdown,
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

impl TransportError {
    /// Timeouts are surfaced as a distinct request state.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout(_))
    }

    /// Whether a fresh connection could plausibly succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            TransportError::Timeout(_)
                | TransportError::Aborted
                | TransportError::InvalidUrl(_)
                | TransportError::Upload(_)
                | TransportError::TooManyRedirects(_)
                | TransportError::Shutdown
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransportError::MalformedChunkLength("zz".into());
        assert_eq!(err.to_string(), "malformed chunk length: \"zz\"");

        let err = TransportError::TooManyRedirects(10);
        assert!(err.to_string().contains("10"));
    }

    #[test]
    fn test_classification() {
        assert!(TransportError::Timeout(Duration::from_secs(1)).is_timeout());
        assert!(!TransportError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(TransportError::ConnectionClosed.is_retryable());
        assert!(TransportError::MalformedStatusLine("x".into()).is_retryable());
        assert!(!TransportError::Aborted.is_retryable());
    }
}
