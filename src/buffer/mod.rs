//! Buffer allocation subsystem.
//!
//! # Data Flow
//! ```text
//! socket reader / request writer / upload streamer
//!     → BufferPool::get (size class lookup, or fresh allocation on miss)
//!     → buffer used for one I/O operation
//!     → BufferPool::release (stored under the ceiling, otherwise dropped)
//!
//! Transport maintenance task (fixed cadence):
//!     → BufferPool::maintain (evict entries older than max age)
//! ```

pub mod pool;

pub use pool::{Buffer, BufferPool, PoolStats};
