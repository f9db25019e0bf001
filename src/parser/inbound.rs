//! Peekable inbound byte source.
//!
//! Bytes arrive from the socket reader and wait here until the parser
//! consumes them. The parser looks ahead for line boundaries without
//! committing, so a line split across reads is simply re-examined later.

use bytes::{Buf, Bytes, BytesMut};

#[derive(Debug, Default)]
pub struct InboundBuffer {
    buf: BytesMut,
    closed: bool,
}

impl InboundBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly received bytes.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Mark that the peer will send nothing more.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn peek(&self) -> &[u8] {
        &self.buf
    }

    /// Length of the next complete line including its `\n`, without consuming it.
    pub fn peek_line(&self) -> Option<usize> {
        self.buf.iter().position(|&b| b == b'\n').map(|i| i + 1)
    }

    /// Consume the next complete line, returning it without the line terminator.
    pub fn take_line(&mut self) -> Option<Bytes> {
        let len = self.peek_line()?;
        let mut line = self.buf.split_to(len);
        line.truncate(len - 1);
        if line.last() == Some(&b'\r') {
            line.truncate(len - 2);
        }
        Some(line.freeze())
    }

    /// Consume up to `n` bytes without copying.
    pub fn take(&mut self, n: usize) -> Bytes {
        let n = n.min(self.buf.len());
        self.buf.split_to(n).freeze()
    }

    /// Consume everything buffered.
    pub fn take_all(&mut self) -> Bytes {
        self.buf.split().freeze()
    }

    pub fn skip(&mut self, n: usize) {
        let n = n.min(self.buf.len());
        self.buf.advance(n);
    }

    /// Forget buffered bytes and the closed mark.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.closed = false;
    }
}
