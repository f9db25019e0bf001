//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Transport::with_connector
//!     → subscribe: pool event loop, buffer maintenance, config reload
//! Transport::shutdown / Drop
//!     → Shutdown::trigger → every subscribed task exits
//!     → host pools abort queued requests and close connections
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
