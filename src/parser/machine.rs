//! Incremental HTTP/1.1 response parser.
//!
//! # Phases
//! ```text
//! StatusLine → Headers → PrepareForContent → ContentSetup → Content → Finished
//!                              │
//!                              └─ 100 Continue → WaitForContentSent → StatusLine
//! ```
//!
//! # Design Decisions
//! - Every call consumes as much as the buffered bytes allow, then returns
//!   the current phase; nothing is consumed until a whole line is present
//! - `process` takes `&mut self`: one pass at a time is enforced by the
//!   borrow checker, and the driver's gate decides who gets to make the call
//! - Body bytes are moved out of the inbound buffer without copying, decoded
//!   if needed, and appended to the download sink

use bytes::Bytes;

use crate::error::{TransportError, TransportResult};
use crate::http::headers::HeaderMap;
use crate::parser::decompress::{self, Decompressor};
use crate::parser::inbound::InboundBuffer;
use crate::parser::sink::DownloadSink;

/// Longest status or header line accepted before the response is rejected.
const MAX_LINE_LENGTH: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsePhase {
    StatusLine,
    Headers,
    WaitForContentSent,
    PrepareForContent,
    ContentSetup,
    Content,
    Finished,
}

/// How the body length is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// No body by definition (1xx, 204, 304, HEAD).
    None,
    /// Fixed length from `Content-Length` or `Content-Range`.
    Raw,
    /// Read until the connection closes.
    UnknownLength,
    Chunked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    ReadChunkLength,
    ReadChunk,
    ReadTrailingCrlf,
    ReadTrailingHeaders,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub major: u8,
    pub minor: u8,
    pub status: u16,
    pub reason: String,
}

impl StatusLine {
    pub fn parse(line: &[u8]) -> TransportResult<Self> {
        let malformed = || TransportError::MalformedStatusLine(String::from_utf8_lossy(line).into_owned());
        let text = std::str::from_utf8(line).map_err(|_| malformed())?;

        let mut parts = text.splitn(3, ' ');
        let version = parts.next().ok_or_else(malformed)?;
        let (major, minor) = version
            .strip_prefix("HTTP/")
            .and_then(|v| v.split_once('.'))
            .and_then(|(ma, mi)| Some((ma.parse().ok()?, mi.parse().ok()?)))
            .ok_or_else(malformed)?;

        let code = parts.next().ok_or_else(malformed)?;
        if code.len() != 3 {
            return Err(malformed());
        }
        let status: u16 = code.parse().map_err(|_| malformed())?;
        let reason = parts.next().unwrap_or("").trim().to_string();

        Ok(Self {
            major,
            minor,
            status,
            reason,
        })
    }

    pub fn is_http10(&self) -> bool {
        self.major == 1 && self.minor == 0
    }
}

/// Per-request parser options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParserOptions {
    /// The request was `HEAD`, so the response has no body.
    pub head_request: bool,
    /// Decode `Content-Encoding` when a decoder exists.
    pub decompress: bool,
    /// The caller registered an upgrade handler.
    pub accepts_upgrade: bool,
}

/// Hooks the parser fires while it advances.
pub trait ResponseEvents {
    fn on_headers(&mut self, _status: &StatusLine, _headers: &HeaderMap) {}
    fn on_download_progress(&mut self, _downloaded: u64, _total: Option<u64>) {}
}

/// Events sink that ignores everything.
pub struct NoEvents;

impl ResponseEvents for NoEvents {}

pub struct ResponseParser {
    options: ParserOptions,
    phase: ParsePhase,
    status: Option<StatusLine>,
    headers: HeaderMap,
    trailers: HeaderMap,
    mode: DeliveryMode,
    expected: Option<u64>,
    downloaded: u64,
    chunk_state: ChunkState,
    chunk_remaining: u64,
    decoder: Option<Box<dyn Decompressor>>,
    upgraded: bool,
}

impl ResponseParser {
    pub fn new(options: ParserOptions) -> Self {
        Self {
            options,
            phase: ParsePhase::StatusLine,
            status: None,
            headers: HeaderMap::new(),
            trailers: HeaderMap::new(),
            mode: DeliveryMode::None,
            expected: None,
            downloaded: 0,
            chunk_state: ChunkState::ReadChunkLength,
            chunk_remaining: 0,
            decoder: None,
            upgraded: false,
        }
    }

    pub fn phase(&self) -> ParsePhase {
        self.phase
    }

    pub fn is_finished(&self) -> bool {
        self.phase == ParsePhase::Finished
    }

    pub fn status(&self) -> Option<&StatusLine> {
        self.status.as_ref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn trailers(&self) -> &HeaderMap {
        &self.trailers
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        self.mode
    }

    pub fn expected_length(&self) -> Option<u64> {
        self.expected
    }

    /// Body bytes taken off the wire so far (before decoding).
    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    /// The response switched protocols and the remaining bytes belong to the upgrade handler.
    pub fn is_upgraded(&self) -> bool {
        self.upgraded
    }

    /// Leave `WaitForContentSent` once the request body is on the wire.
    pub fn content_sent(&mut self) {
        if self.phase == ParsePhase::WaitForContentSent {
            self.phase = ParsePhase::StatusLine;
        }
    }

    /// Start over for a new response on the same connection.
    pub fn reset(&mut self, options: ParserOptions) {
        *self = Self::new(options);
    }

    /// Consume what `src` allows and report the phase reached.
    ///
    /// Returns early without consuming when a line is incomplete, when the
    /// sink is full, or while waiting for the request body to be sent.
    pub fn process(
        &mut self,
        src: &mut InboundBuffer,
        sink: &DownloadSink,
        events: &mut dyn ResponseEvents,
    ) -> TransportResult<ParsePhase> {
        loop {
            let progressed = match self.phase {
                ParsePhase::StatusLine => self.read_status_line(src)?,
                ParsePhase::Headers => self.read_headers(src, events)?,
                ParsePhase::WaitForContentSent | ParsePhase::Finished => false,
                ParsePhase::PrepareForContent => {
                    self.prepare_for_content(sink);
                    true
                }
                ParsePhase::ContentSetup => {
                    self.setup_content(sink)?;
                    true
                }
                ParsePhase::Content => self.read_content(src, sink, events)?,
            };
            if !progressed {
                return Ok(self.phase);
            }
        }
    }

    fn read_status_line(&mut self, src: &mut InboundBuffer) -> TransportResult<bool> {
        let Some(line) = take_line(src)? else {
            return Ok(false);
        };
        // Tolerate stray blank lines between responses.
        if line.is_empty() {
            return Ok(true);
        }
        self.status = Some(StatusLine::parse(&line)?);
        self.headers.clear();
        self.phase = ParsePhase::Headers;
        Ok(true)
    }

    fn read_headers(&mut self, src: &mut InboundBuffer, events: &mut dyn ResponseEvents) -> TransportResult<bool> {
        let Some(done) = read_header_block(src, &mut self.headers)? else {
            return Ok(false);
        };
        if done {
            if let Some(status) = &self.status {
                if status.status != 100 {
                    events.on_headers(status, &self.headers);
                }
            }
            self.phase = ParsePhase::PrepareForContent;
        }
        Ok(true)
    }

    fn prepare_for_content(&mut self, sink: &DownloadSink) {
        let status = self.status.as_ref().map_or(0, |s| s.status);

        if status == 100 {
            self.status = None;
            self.headers.clear();
            self.phase = ParsePhase::WaitForContentSent;
            return;
        }

        if status == 101
            && self.options.accepts_upgrade
            && self.headers.contains("upgrade")
            && self.headers.has_token("connection", "upgrade")
        {
            self.upgraded = true;
            self.finish_without_body(sink);
            return;
        }

        if (100..200).contains(&status) || status == 204 || status == 304 || self.options.head_request {
            self.finish_without_body(sink);
            return;
        }

        self.phase = ParsePhase::ContentSetup;
    }

    fn finish_without_body(&mut self, sink: &DownloadSink) {
        self.mode = DeliveryMode::None;
        self.expected = Some(0);
        sink.finish();
        self.phase = ParsePhase::Finished;
    }

    fn setup_content(&mut self, sink: &DownloadSink) -> TransportResult<()> {
        if self.headers.has_token("transfer-encoding", "chunked") {
            self.mode = DeliveryMode::Chunked;
            self.chunk_state = ChunkState::ReadChunkLength;
        } else {
            let content_length = match self.headers.get("content-length") {
                Some(v) => Some(
                    v.trim()
                        .parse::<u64>()
                        .map_err(|_| TransportError::MalformedHeader(format!("content-length: {v}")))?,
                ),
                None => None,
            };
            let range_length = self.headers.get("content-range").and_then(content_range_length);

            match content_length.or(range_length) {
                Some(len) => {
                    self.mode = DeliveryMode::Raw;
                    self.expected = Some(len);
                }
                None if self.headers.contains("content-range") => {
                    return Err(TransportError::MalformedHeader(format!(
                        "content-range: {}",
                        self.headers.get("content-range").unwrap_or_default()
                    )));
                }
                None => self.mode = DeliveryMode::UnknownLength,
            }
        }

        if self.options.decompress {
            self.decoder = self.headers.get("content-encoding").and_then(decompress::for_encoding);
        }

        self.phase = ParsePhase::Content;
        if self.mode == DeliveryMode::Raw && self.expected == Some(0) {
            self.finalize(sink)?;
        }
        Ok(())
    }

    fn read_content(
        &mut self,
        src: &mut InboundBuffer,
        sink: &DownloadSink,
        events: &mut dyn ResponseEvents,
    ) -> TransportResult<bool> {
        if sink.is_full() {
            return Ok(false);
        }
        match self.mode {
            DeliveryMode::Raw => self.read_raw(src, sink, events),
            DeliveryMode::UnknownLength => self.read_until_close(src, sink, events),
            DeliveryMode::Chunked => self.read_chunked(src, sink, events),
            DeliveryMode::None => {
                self.finalize(sink)?;
                Ok(true)
            }
        }
    }

    fn read_raw(
        &mut self,
        src: &mut InboundBuffer,
        sink: &DownloadSink,
        events: &mut dyn ResponseEvents,
    ) -> TransportResult<bool> {
        let expected = self.expected.unwrap_or(0);
        let remaining = expected.saturating_sub(self.downloaded);
        let n = usize::try_from(remaining).unwrap_or(usize::MAX).min(src.len());
        if n > 0 {
            let chunk = src.take(n);
            self.deliver(chunk, sink, events)?;
        }
        if self.downloaded >= expected {
            self.finalize(sink)?;
            return Ok(true);
        }
        Ok(n > 0)
    }

    fn read_until_close(
        &mut self,
        src: &mut InboundBuffer,
        sink: &DownloadSink,
        events: &mut dyn ResponseEvents,
    ) -> TransportResult<bool> {
        let mut progressed = false;
        if !src.is_empty() {
            let chunk = src.take_all();
            self.deliver(chunk, sink, events)?;
            progressed = true;
        }
        if src.is_closed() && src.is_empty() {
            self.finalize(sink)?;
            progressed = true;
        }
        Ok(progressed)
    }

    fn read_chunked(
        &mut self,
        src: &mut InboundBuffer,
        sink: &DownloadSink,
        events: &mut dyn ResponseEvents,
    ) -> TransportResult<bool> {
        match self.chunk_state {
            ChunkState::ReadChunkLength => {
                let Some(line) = take_line(src)? else {
                    return Ok(false);
                };
                let size = parse_chunk_length(&line)?;
                if size == 0 {
                    self.chunk_state = ChunkState::ReadTrailingHeaders;
                } else {
                    self.chunk_remaining = size;
                    self.chunk_state = ChunkState::ReadChunk;
                }
                Ok(true)
            }
            ChunkState::ReadChunk => {
                let n = usize::try_from(self.chunk_remaining)
                    .unwrap_or(usize::MAX)
                    .min(src.len());
                if n == 0 {
                    return Ok(false);
                }
                let chunk = src.take(n);
                self.chunk_remaining -= n as u64;
                self.deliver(chunk, sink, events)?;
                if self.chunk_remaining == 0 {
                    self.chunk_state = ChunkState::ReadTrailingCrlf;
                }
                Ok(true)
            }
            ChunkState::ReadTrailingCrlf => {
                let Some(line) = take_line(src)? else {
                    return Ok(false);
                };
                if !line.is_empty() {
                    return Err(TransportError::MalformedChunkLength(
                        String::from_utf8_lossy(&line).into_owned(),
                    ));
                }
                self.chunk_state = ChunkState::ReadChunkLength;
                Ok(true)
            }
            ChunkState::ReadTrailingHeaders => match read_header_block(src, &mut self.trailers)? {
                None => Ok(false),
                Some(false) => Ok(true),
                Some(true) => {
                    self.finalize(sink)?;
                    Ok(true)
                }
            },
        }
    }

    fn deliver(&mut self, chunk: Bytes, sink: &DownloadSink, events: &mut dyn ResponseEvents) -> TransportResult<()> {
        self.downloaded += chunk.len() as u64;
        let out = match self.decoder.as_mut() {
            Some(decoder) => decoder
                .decompress(&chunk, false)
                .map_err(TransportError::Decompress)?,
            None => chunk,
        };
        sink.push(out);
        let total = match self.mode {
            DeliveryMode::Raw => self.expected,
            _ => None,
        };
        events.on_download_progress(self.downloaded, total);
        Ok(())
    }

    fn finalize(&mut self, sink: &DownloadSink) -> TransportResult<()> {
        // An empty body never started a compressed stream, so there is nothing to flush.
        if let Some(mut decoder) = self.decoder.take().filter(|_| self.downloaded > 0) {
            let tail = decoder.decompress(&[], true).map_err(TransportError::Decompress)?;
            sink.push(tail);
        }
        sink.finish();
        self.phase = ParsePhase::Finished;
        Ok(())
    }
}

impl std::fmt::Debug for ResponseParser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseParser")
            .field("phase", &self.phase)
            .field("status", &self.status)
            .field("mode", &self.mode)
            .field("expected", &self.expected)
            .field("downloaded", &self.downloaded)
            .finish()
    }
}

/// Take one complete line, rejecting over-long partial lines.
fn take_line(src: &mut InboundBuffer) -> TransportResult<Option<Bytes>> {
    match src.take_line() {
        Some(line) => Ok(Some(line)),
        None if src.len() > MAX_LINE_LENGTH => Err(TransportError::MalformedHeader(format!(
            "line exceeds {MAX_LINE_LENGTH} bytes"
        ))),
        None => Ok(None),
    }
}

/// Read header lines into `headers`.
///
/// Returns `None` when no complete line is buffered, `Some(true)` once the
/// terminating blank line was consumed, `Some(false)` after consuming lines
/// without reaching it.
fn read_header_block(src: &mut InboundBuffer, headers: &mut HeaderMap) -> TransportResult<Option<bool>> {
    let mut consumed = false;
    while let Some(line) = take_line(src)? {
        consumed = true;
        if line.is_empty() {
            return Ok(Some(true));
        }
        let text = String::from_utf8_lossy(&line);
        if text.starts_with([' ', '\t']) {
            if !headers.extend_last(text.trim()) {
                return Err(TransportError::MalformedHeader(text.into_owned()));
            }
            continue;
        }
        let (name, value) = text
            .split_once(':')
            .ok_or_else(|| TransportError::MalformedHeader(text.to_string()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(TransportError::MalformedHeader(text.to_string()));
        }
        headers.append(name, value.trim());
    }
    Ok(consumed.then_some(false))
}

/// Hex chunk size; any `;extension` text is ignored.
fn parse_chunk_length(line: &[u8]) -> TransportResult<u64> {
    let malformed = || TransportError::MalformedChunkLength(String::from_utf8_lossy(line).into_owned());
    let text = std::str::from_utf8(line).map_err(|_| malformed())?;
    let size = text.split(';').next().unwrap_or("").trim();
    if size.is_empty() {
        return Err(malformed());
    }
    u64::from_str_radix(size, 16).map_err(|_| malformed())
}

/// Length implied by `Content-Range: bytes first-last/total`.
fn content_range_length(value: &str) -> Option<u64> {
    let range = value.trim().strip_prefix("bytes")?.trim();
    let (span, _total) = range.split_once('/')?;
    let (first, last) = span.split_once('-')?;
    let first: u64 = first.trim().parse().ok()?;
    let last: u64 = last.trim().parse().ok()?;
    last.checked_sub(first).map(|d| d + 1)
}
