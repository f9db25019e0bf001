//! HTTP/1.1 Client Transport Library

// Core subsystems
pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod host;
pub mod http;
pub mod net;
pub mod parser;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use client::Transport;
pub use config::TransportConfig;
pub use error::{TransportError, TransportResult};
pub use host::HostKey;
pub use http::{BodyStream, CancelToken, HeaderMap, Request, RequestHandle, RequestId, RequestState, Response, UpgradedStream};
pub use lifecycle::Shutdown;
pub use net::{BoxedStream, ConnectionId, Connector, TcpConnector};
