//! HTTP/1.1 request and response handling.
//!
//! # Data Flow
//! ```text
//! Request (builder)
//!     → request.rs (RequestEntry: state, body slot, retry/redirect counters)
//!     → host pool dispatch
//!     → driver.rs (connect, write via writer.rs, parse via parser/)
//!     → response.rs (Response, BodyStream, UpgradedStream)
//!     → RequestHandle::response
//! ```
//!
//! # Design Decisions
//! - One request per connection at a time; no pipelining
//! - Status codes are data, only transport faults are errors

pub(crate) mod driver;
pub mod headers;
pub mod request;
pub mod response;
pub(crate) mod writer;

pub use headers::HeaderMap;
pub use request::{CancelToken, Request, RequestHandle, RequestId, RequestState, UploadBody};
pub use response::{BodyStream, Response, UpgradedStream};
