//! Outcome classification for a finished request cycle.
//!
//! # Responsibilities
//! - Decide between success, resend and terminal failure
//! - Enforce the per-request retry budget
//!
//! # Design Decisions
//! - A response that parsed to completion wins over any fault seen on the way
//! - Timeouts and aborts are terminal, never retried
//! - Retried faults always cost the connection; only the request survives

use crate::error::TransportError;

#[derive(Debug)]
pub enum Verdict {
    /// The response completed; any pending fault is discarded.
    Success,
    /// Resend on a fresh connection.
    Retry(TransportError),
    /// Terminal failure.
    Fail(TransportError),
}

/// Classify the end of one request/response cycle.
///
/// `can_resend` is false once a streamed upload body was consumed.
pub fn classify(
    finished: bool,
    error: Option<TransportError>,
    retries: u32,
    max_retries: u32,
    can_resend: bool,
) -> Verdict {
    if finished {
        return Verdict::Success;
    }
    match error {
        None => Verdict::Fail(TransportError::ConnectionClosed),
        Some(err) if err.is_retryable() && can_resend && retries < max_retries => Verdict::Retry(err),
        Some(err) => Verdict::Fail(err),
    }
}
