//! Byte-stream establishment.
//!
//! The transport only needs an opaque duplex stream per connection. TLS,
//! DNS caching and proxy negotiation live behind the [`Connector`] trait.

use std::io;

use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::host::HostKey;

/// Duplex byte stream the driver reads from and writes to.
pub trait DuplexStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> DuplexStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

pub type BoxedStream = Box<dyn DuplexStream>;

pub trait Connector: Send + Sync + 'static {
    fn connect<'a>(&'a self, host: &'a HostKey) -> BoxFuture<'a, io::Result<BoxedStream>>;
}

/// Plain TCP with `TCP_NODELAY`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect<'a>(&'a self, host: &'a HostKey) -> BoxFuture<'a, io::Result<BoxedStream>> {
        Box::pin(async move {
            if host.is_secure() && host.proxy().is_none() {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("{host} requires a TLS connector"),
                ));
            }
            let stream = TcpStream::connect(host.dial_address()).await?;
            stream.set_nodelay(true)?;
            tracing::debug!(host = %host, peer = ?stream.peer_addr().ok(), "TCP connection established");
            Ok(Box::new(stream) as BoxedStream)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tcp_connect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let key = HostKey::new("http", "127.0.0.1", port);

        let connected = TcpConnector.connect(&key).await;
        assert!(connected.is_ok());
    }

    #[tokio::test]
    async fn test_https_needs_tls_connector() {
        let key = HostKey::new("https", "127.0.0.1", 1);
        let err = TcpConnector.connect(&key).await.err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }
}
