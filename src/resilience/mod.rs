//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Cycle ends (response finished, fault, timeout, abort)
//!     → retries.rs classifies: Success / Retry / Fail
//!     → On Retry: backoff.rs picks the delay before the request re-enters the queue
//! ```
//!
//! # Design Decisions
//! - Retries are invisible to the caller except through the retry counter
//! - Jittered backoff keeps resends from many connections apart

pub mod backoff;
pub mod retries;

pub use backoff::{calculate_backoff, retry_delay};
pub use retries::{classify, Verdict};
