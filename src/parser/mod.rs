//! Incremental HTTP/1.1 response parsing.
//!
//! # Data Flow
//! ```text
//! socket bytes
//!     → inbound.rs (append-only buffer the reader fills)
//!     → machine.rs (status line → headers → body framing → content)
//!     → decompress.rs (gzip / deflate, when requested)
//!     → sink.rs (decoded body chunks, bounded for streaming consumers)
//! ```
//!
//! # Design Decisions
//! - The parser never blocks: it consumes what is buffered and reports its phase
//! - A full sink stops consumption; freed space re-enters the parser
//! - Parsing a response split at any byte boundary gives the same result

pub mod decompress;
pub mod inbound;
pub mod machine;
pub mod sink;

pub use inbound::InboundBuffer;
pub use machine::{DeliveryMode, NoEvents, ParsePhase, ParserOptions, ResponseEvents, ResponseParser, StatusLine};
pub use sink::DownloadSink;
