//! Completed responses, streamed bodies and upgraded connections.

use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use url::Url;

use crate::http::headers::HeaderMap;
use crate::net::{BoxedStream, ConnectionId};
use crate::parser::sink::DownloadSink;

pub(crate) type SharedWriter = Arc<Mutex<Option<WriteHalf<BoxedStream>>>>;

/// A finished HTTP response.
///
/// Non-2xx statuses are ordinary responses; interpreting them is up to the caller.
#[derive(Debug)]
pub struct Response {
    pub(crate) version: (u8, u8),
    pub(crate) status: u16,
    pub(crate) reason: String,
    pub(crate) headers: HeaderMap,
    pub(crate) trailers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) downloaded: u64,
    pub(crate) url: Url,
    pub(crate) connection_id: ConnectionId,
    pub(crate) retries: u32,
    pub(crate) upgraded: bool,
    pub(crate) upgrade_stream: Option<UpgradedStream>,
}

impl Response {
    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Trailer fields of a chunked body.
    pub fn trailers(&self) -> &HeaderMap {
        &self.trailers
    }

    /// Decoded body. Empty for streamed downloads, whose chunks went to the body stream.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Body bytes received off the wire, before decoding.
    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    /// Final URL after redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The connection that carried the final attempt.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_upgraded(&self) -> bool {
        self.upgraded
    }

    /// The raw stream after a protocol switch, unless an upgrade callback took it.
    pub fn take_upgraded(&mut self) -> Option<UpgradedStream> {
        self.upgrade_stream.take()
    }
}

/// Byte stream left after a `101 Switching Protocols` handshake.
pub struct UpgradedStream {
    connection_id: ConnectionId,
    leftover: Option<Bytes>,
    inbound: mpsc::UnboundedReceiver<Bytes>,
    writer: SharedWriter,
}

impl UpgradedStream {
    pub(crate) fn new(
        connection_id: ConnectionId,
        leftover: Bytes,
        inbound: mpsc::UnboundedReceiver<Bytes>,
        writer: SharedWriter,
    ) -> Self {
        Self {
            connection_id,
            leftover: (!leftover.is_empty()).then_some(leftover),
            inbound,
            writer,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Next bytes from the peer, `None` once it closed.
    pub async fn read(&mut self) -> Option<Bytes> {
        if let Some(bytes) = self.leftover.take() {
            return Some(bytes);
        }
        self.inbound.recv().await
    }

    pub async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        let stream = writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "upgraded stream closed"))?;
        stream.write_all(data).await?;
        stream.flush().await
    }

    pub async fn shutdown(&self) -> io::Result<()> {
        match self.writer.lock().await.take() {
            Some(mut stream) => stream.shutdown().await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for UpgradedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpgradedStream")
            .field("connection_id", &self.connection_id)
            .finish()
    }
}

/// Body chunks of a streamed download in arrival order.
#[derive(Debug, Clone)]
pub struct BodyStream {
    sink: Arc<DownloadSink>,
}

impl BodyStream {
    pub(crate) fn new(sink: Arc<DownloadSink>) -> Self {
        Self { sink }
    }

    /// Next chunk, `None` at the end of the body.
    pub async fn next(&mut self) -> Option<Bytes> {
        self.sink.next_chunk().await
    }

    /// Whether the body ended because the request failed.
    pub fn is_failed(&self) -> bool {
        self.sink.is_failed()
    }
}
