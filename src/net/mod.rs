//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! HostPool creates a Connection (Initial)
//!     → first request: connector.rs establishes the byte stream
//!     → connection.rs tracks state (Processing → Free / Closed)
//!     → the protocol handler reads and writes the stream
//!     → gate.rs keeps one parse pass running per connection
//! ```
//!
//! # Design Decisions
//! - Connections connect lazily, on the request that first needs them
//! - The socket belongs to the protocol handler; the pool only sees state
//! - TLS and DNS sit behind the `Connector` trait

pub mod connection;
pub mod connector;
pub mod gate;

pub(crate) use connection::{Connection, ProtocolHandler};
pub use connection::{ConnectionId, ConnectionState};
pub use connector::{BoxedStream, Connector, DuplexStream, TcpConnector};
pub use gate::ProcessGate;
