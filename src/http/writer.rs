//! Request serialization onto the wire.
//!
//! # Responsibilities
//! - Fill in the headers the transport owns (Host, framing, Accept-Encoding, Expect)
//! - Write the request line and headers through a pooled staging buffer
//! - Stream upload bodies in bounded chunks, chunk-framed when required
//!
//! # Design Decisions
//! - Headers with empty values are skipped, never sent as `Name: `
//! - Upload progress fires only after a chunk was handed to the socket
//! - Reader bodies are pulled synchronously; the driver runs such requests
//!   on a blocking-capable worker
//! - A body stops between chunks, and mid-chunk, once the connection's halt
//!   token fires

use std::io::{self, Read};

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::buffer::{Buffer, BufferPool};
use crate::error::{TransportError, TransportResult};
use crate::host::HostKey;
use crate::http::headers::HeaderMap;
use crate::http::request::{CancelToken, ProgressCallback, RequestHead, UploadBody};
use crate::parser::decompress::ACCEPT_ENCODING;

const CRLF: &[u8] = b"\r\n";

/// How the request body is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyFraming {
    None,
    Length(u64),
    Chunked,
}

impl BodyFraming {
    /// `length` is `None` without a body and `Some(None)` for a body of unknown length.
    pub(crate) fn for_body(length: Option<Option<u64>>, force_chunked: bool) -> Self {
        match length {
            None => Self::None,
            Some(_) if force_chunked => Self::Chunked,
            Some(Some(len)) => Self::Length(len),
            Some(None) => Self::Chunked,
        }
    }
}

/// Add the headers derived from the connection and body.
pub(crate) fn apply_default_headers(
    headers: &mut HeaderMap,
    key: &HostKey,
    framing: BodyFraming,
    decompress: bool,
    expect_continue: bool,
) {
    if !headers.contains("host") {
        headers.insert("Host", key.authority());
    }
    match framing {
        BodyFraming::None => {}
        BodyFraming::Length(len) => {
            headers.remove("transfer-encoding");
            headers.insert("Content-Length", len.to_string());
        }
        BodyFraming::Chunked => {
            headers.remove("content-length");
            headers.insert("Transfer-Encoding", "chunked");
        }
    }
    if decompress && !headers.contains("accept-encoding") {
        headers.insert("Accept-Encoding", ACCEPT_ENCODING);
    }
    if expect_continue && framing != BodyFraming::None {
        headers.insert("Expect", "100-continue");
    }
}

/// Origin-form target, or absolute-form when talking plain HTTP through a proxy.
pub(crate) fn request_target(head: &RequestHead, key: &HostKey) -> String {
    if key.proxy().is_some() && !key.is_secure() {
        return head.url.as_str().to_string();
    }
    let mut target = head.url.path().to_string();
    if target.is_empty() {
        target.push('/');
    }
    if let Some(query) = head.url.query() {
        target.push('?');
        target.push_str(query);
    }
    target
}

/// Buffered writer over one connection's write half.
pub(crate) struct RequestWriter<'a, W> {
    out: &'a mut W,
    pool: &'a BufferPool,
    staging: Buffer,
    filled: usize,
}

impl<'a, W: AsyncWrite + Unpin> RequestWriter<'a, W> {
    pub(crate) fn new(out: &'a mut W, pool: &'a BufferPool, staging_size: usize) -> Self {
        Self {
            out,
            pool,
            staging: pool.get(staging_size.max(64), true),
            filled: 0,
        }
    }

    async fn put(&mut self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            if self.filled == self.staging.len() {
                self.flush_staging().await?;
            }
            let n = (self.staging.len() - self.filled).min(data.len());
            self.staging[self.filled..self.filled + n].copy_from_slice(&data[..n]);
            self.filled += n;
            data = &data[n..];
        }
        Ok(())
    }

    async fn flush_staging(&mut self) -> io::Result<()> {
        if self.filled > 0 {
            self.out.write_all(&self.staging[..self.filled]).await?;
            self.filled = 0;
        }
        Ok(())
    }

    pub(crate) async fn flush(&mut self) -> io::Result<()> {
        self.flush_staging().await?;
        self.out.flush().await
    }

    /// Request line, headers and the blank line.
    pub(crate) async fn write_head(&mut self, head: &RequestHead, key: &HostKey) -> io::Result<()> {
        let line = format!("{} {} HTTP/1.1\r\n", head.method, request_target(head, key));
        self.put(line.as_bytes()).await?;
        for (name, value) in head.headers.iter() {
            if value.trim().is_empty() {
                tracing::debug!(header = name, "Skipping request header with empty value");
                continue;
            }
            self.put(name.as_bytes()).await?;
            self.put(b": ").await?;
            self.put(value.as_bytes()).await?;
            self.put(CRLF).await?;
        }
        self.put(CRLF).await
    }

    /// Stream `body` until done or until `halt` fires. Returns the number of
    /// payload bytes sent.
    pub(crate) async fn write_body(
        &mut self,
        body: UploadBody,
        chunked: bool,
        chunk_size: usize,
        progress: Option<&ProgressCallback>,
        halt: &CancelToken,
    ) -> TransportResult<u64> {
        let chunk_size = chunk_size.max(1);
        let total = body.length();
        let mut sent = 0u64;

        match body {
            UploadBody::Bytes(bytes) => {
                for chunk in bytes.chunks(chunk_size) {
                    self.write_chunk(chunk, chunked, halt).await?;
                    sent += chunk.len() as u64;
                    if let Some(cb) = progress {
                        cb(sent, total);
                    }
                }
            }
            UploadBody::Reader { mut reader, length } => {
                let mut buf = self.pool.get(chunk_size, true);
                let result = self
                    .pump_reader(&mut *reader, &mut buf, chunk_size, length, chunked, progress, halt, &mut sent)
                    .await;
                self.pool.release(buf);
                result?;
            }
        }

        if chunked {
            self.put(b"0\r\n\r\n").await?;
        }
        self.flush().await?;
        Ok(sent)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pump_reader(
        &mut self,
        reader: &mut (dyn Read + Send),
        buf: &mut Buffer,
        chunk_size: usize,
        length: Option<u64>,
        chunked: bool,
        progress: Option<&ProgressCallback>,
        halt: &CancelToken,
        sent: &mut u64,
    ) -> TransportResult<()> {
        loop {
            if halt.is_cancelled() {
                return Err(TransportError::ConnectionClosed);
            }
            let want = match length {
                Some(len) if !chunked => {
                    let remaining = len - *sent;
                    if remaining == 0 {
                        return Ok(());
                    }
                    usize::try_from(remaining).unwrap_or(usize::MAX).min(chunk_size)
                }
                _ => chunk_size,
            };
            let n = reader.read(&mut buf[..want]).map_err(TransportError::Upload)?;
            if n == 0 {
                return match length {
                    Some(len) if !chunked && *sent < len => Err(TransportError::Upload(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("upload source ended after {sent} of {len} bytes"),
                    ))),
                    _ => Ok(()),
                };
            }
            self.write_chunk(&buf[..n], chunked, halt).await?;
            *sent += n as u64;
            if let Some(cb) = progress {
                cb(*sent, length);
            }
        }
    }

    async fn write_chunk(&mut self, data: &[u8], chunked: bool, halt: &CancelToken) -> TransportResult<()> {
        if halt.is_cancelled() {
            return Err(TransportError::ConnectionClosed);
        }
        tokio::select! {
            written = self.put_chunk(data, chunked) => Ok(written?),
            _ = halt.cancelled() => Err(TransportError::ConnectionClosed),
        }
    }

    async fn put_chunk(&mut self, data: &[u8], chunked: bool) -> io::Result<()> {
        if chunked {
            self.put(format!("{:X}\r\n", data.len()).as_bytes()).await?;
            self.put(data).await?;
            self.put(CRLF).await?;
        } else {
            self.put(data).await?;
        }
        self.flush_staging().await
    }
}

impl<W> Drop for RequestWriter<'_, W> {
    fn drop(&mut self) {
        self.pool.release(std::mem::replace(&mut self.staging, Buffer::empty()));
    }
}
