//! HTTP/1.1 connection driver.
//!
//! # Responsibilities
//! - Establish the socket on first use and run its reader task
//! - Write one request at a time (request line, headers, body)
//! - Feed arriving bytes to the response parser under a single-entry gate
//! - Classify the end of each cycle and report it to the pool as one event
//!
//! # Data Flow
//! ```text
//! pool dispatch → process() → send task: connect → write head → (100-continue) → body
//! reader task → inbound buffer → on_content() → gate → parser.process()
//!     → Finished / fault / timeout / abort → complete()
//!     → PoolEvent (Recycle | Close | ClosedResendRequest | Resend | Upgraded)
//!     → terminal transition on the request (unless it is resent)
//! ```
//!
//! # Design Decisions
//! - Bodiless requests run on a short-lived task; uploads and upgrades run on
//!   a blocking-capable worker because the body source may block
//! - Faults are parked on the cycle and resolved by the next parse pass, so
//!   bytes already buffered are parsed before a fault is acted on
//! - Any fault discards the connection; its protocol state is unknown

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use url::Url;

use crate::client::TransportShared;
use crate::error::{TransportError, TransportResult};
use crate::host::{CloseReason, HostKey, PoolEvent};
use crate::http::headers::HeaderMap;
use crate::http::request::{CancelToken, RequestEntry};
use crate::http::response::{Response, SharedWriter, UpgradedStream};
use crate::http::writer::RequestWriter;
use crate::net::{BoxedStream, ConnectionId, ProcessGate, ProtocolHandler};
use crate::observability::metrics;
use crate::parser::{
    DeliveryMode, InboundBuffer, ParsePhase, ParserOptions, ResponseEvents, ResponseParser, StatusLine,
};
use crate::resilience::{classify, retry_delay, Verdict};

/// What happens to the connection after a response completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Disposition {
    Recycle,
    Close,
    /// Unsafe to reuse, and the request continues on another connection.
    CloseAndResend,
}

/// Reuse decision from the response and the request's bookkeeping.
pub(crate) fn connection_disposition(
    status: &StatusLine,
    headers: &HeaderMap,
    mode: DeliveryMode,
    body_pending: bool,
    remaining_requests: u32,
    resend: bool,
) -> Disposition {
    let close = headers.has_token("connection", "close")
        || (status.is_http10() && !headers.has_token("connection", "keep-alive"))
        || mode == DeliveryMode::UnknownLength
        || body_pending
        || remaining_requests == 0;
    match (close, resend) {
        (true, true) => Disposition::CloseAndResend,
        (true, false) => Disposition::Close,
        (false, _) => Disposition::Recycle,
    }
}

/// `Keep-Alive: timeout=N, max=M`.
pub(crate) fn parse_keep_alive(headers: &HeaderMap) -> (Option<Duration>, Option<u32>) {
    let mut timeout = None;
    let mut max = None;
    for param in headers.get_all("keep-alive").flat_map(|v| v.split(',')) {
        let Some((name, value)) = param.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "timeout" => timeout = value.parse().ok().map(Duration::from_secs),
            "max" => max = value.parse().ok(),
            _ => {}
        }
    }
    (timeout, max)
}

/// Where to go next, if this response is a redirect the request should follow.
pub(crate) fn redirect_target(
    current: &Url,
    status: u16,
    headers: &HeaderMap,
    redirects: u32,
    max_redirects: u32,
) -> TransportResult<Option<Url>> {
    if !matches!(status, 301 | 302 | 303 | 307 | 308) || max_redirects == 0 {
        return Ok(None);
    }
    let Some(location) = headers.get("location") else {
        return Ok(None);
    };
    if redirects >= max_redirects {
        return Err(TransportError::TooManyRedirects(max_redirects));
    }
    current
        .join(location.trim())
        .map(Some)
        .map_err(|e| TransportError::InvalidUrl(format!("redirect to {location:?}: {e}")))
}

/// One request/response cycle on this connection.
struct Cycle {
    seq: u64,
    entry: Arc<RequestEntry>,
    parser: ResponseParser,
    pending_error: Option<TransportError>,
    body_pending: bool,
    continue_signal: Arc<Notify>,
    done: Arc<Notify>,
}

/// Parser hooks routed to the request's callbacks.
struct EntryEvents<'a>(&'a RequestEntry);

impl ResponseEvents for EntryEvents<'_> {
    fn on_headers(&mut self, status: &StatusLine, headers: &HeaderMap) {
        if let Some(cb) = &self.0.callbacks().headers {
            cb(status.status, headers);
        }
    }

    fn on_download_progress(&mut self, downloaded: u64, total: Option<u64>) {
        if let Some(cb) = &self.0.callbacks().download_progress {
            cb(downloaded, total);
        }
    }
}

pub(crate) struct Http1Driver {
    id: ConnectionId,
    key: HostKey,
    shared: Arc<TransportShared>,
    me: Weak<Http1Driver>,
    gate: ProcessGate,
    inbound: Mutex<InboundBuffer>,
    /// Signalled after every parse pass so a throttled reader can resume.
    drained: Notify,
    cycle: Mutex<Option<Cycle>>,
    cycle_seq: AtomicU64,
    writer: SharedWriter,
    reader: Mutex<Option<JoinHandle<()>>>,
    connected: AtomicBool,
    /// Set once the pool was told this connection is gone (or it left pool management).
    closing: AtomicBool,
    torn_down: AtomicBool,
    /// Fired by teardown so an upload in flight stops feeding the socket.
    halt: CancelToken,
    /// Requests the server still allows on this connection (`Keep-Alive: max`).
    remaining: AtomicU32,
    upgrade_tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
}

impl Http1Driver {
    pub(crate) fn new(id: ConnectionId, key: HostKey, shared: Arc<TransportShared>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            id,
            key,
            shared,
            me: me.clone(),
            gate: ProcessGate::new(),
            inbound: Mutex::new(InboundBuffer::new()),
            drained: Notify::new(),
            cycle: Mutex::new(None),
            cycle_seq: AtomicU64::new(0),
            writer: Arc::new(tokio::sync::Mutex::new(None)),
            reader: Mutex::new(None),
            connected: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            halt: CancelToken::default(),
            remaining: AtomicU32::new(u32::MAX),
            upgrade_tx: Mutex::new(None),
        })
    }

    fn lock_cycle(&self) -> MutexGuard<'_, Option<Cycle>> {
        self.cycle.lock().expect("driver cycle mutex poisoned")
    }

    fn lock_inbound(&self) -> MutexGuard<'_, InboundBuffer> {
        self.inbound.lock().expect("driver inbound mutex poisoned")
    }

    fn inbound_len(&self) -> usize {
        self.lock_inbound().len()
    }

    /// New bytes are buffered (or a fault or close was recorded).
    pub(crate) fn on_content(&self) {
        self.gate.run(|| self.process_available());
        self.drained.notify_one();
    }

    /// The peer closed its side of the stream.
    pub(crate) fn on_connection_closed(&self) {
        self.lock_inbound().close();
        self.on_content();
    }

    /// A read or write failed. The stream is treated as ended.
    pub(crate) fn on_error(&self, err: TransportError) {
        if let Some(cycle) = self.lock_cycle().as_mut() {
            cycle.pending_error.get_or_insert(err);
        }
        self.lock_inbound().close();
        self.on_content();
    }

    /// Park `err` on cycle `seq`, if it is still the active one.
    fn fail_cycle(&self, seq: u64, err: TransportError) {
        {
            let mut slot = self.lock_cycle();
            match slot.as_mut() {
                Some(cycle) if cycle.seq == seq => {
                    cycle.pending_error.get_or_insert(err);
                }
                _ => return,
            }
        }
        self.on_content();
    }

    fn process_available(&self) {
        let ended = {
            let mut slot = self.lock_cycle();
            if slot.is_none() {
                drop(slot);
                self.process_idle();
                return;
            }
            let outcome = match slot.as_mut() {
                Some(cycle) => Self::advance(cycle, &mut self.lock_inbound()),
                None => None,
            };
            match outcome {
                Some(error) => slot.take().map(|cycle| (cycle, error)),
                None => None,
            }
        };
        if let Some((cycle, error)) = ended {
            self.complete(cycle, error);
        }
    }

    /// Run the parser as far as it goes. `None` means wait for more bytes;
    /// `Some(error)` ends the cycle, `Some(None)` being a clean finish.
    fn advance(cycle: &mut Cycle, inbound: &mut InboundBuffer) -> Option<Option<TransportError>> {
        loop {
            let step = cycle
                .parser
                .process(inbound, cycle.entry.sink(), &mut EntryEvents(&cycle.entry));
            return match step {
                Ok(ParsePhase::Finished) => Some(None),
                Ok(ParsePhase::WaitForContentSent) if !cycle.body_pending => {
                    cycle.parser.content_sent();
                    continue;
                }
                Ok(ParsePhase::WaitForContentSent) => {
                    cycle.continue_signal.notify_one();
                    match cycle.pending_error.take() {
                        Some(err) => Some(Some(err)),
                        None if inbound.is_closed() => Some(Some(TransportError::ConnectionClosed)),
                        None => None,
                    }
                }
                Ok(_) => match cycle.pending_error.take() {
                    Some(err) => Some(Some(err)),
                    None if inbound.is_closed() && !cycle.entry.sink().is_full() => {
                        Some(Some(TransportError::ConnectionClosed))
                    }
                    None => None,
                },
                Err(err) => Some(Some(err)),
            };
        }
    }

    /// Bytes or EOF while no request is active.
    fn process_idle(&self) {
        let upgrade = self
            .upgrade_tx
            .lock()
            .expect("driver upgrade mutex poisoned")
            .clone();
        let mut inbound = self.lock_inbound();

        if let Some(tx) = upgrade {
            if !inbound.is_empty() && tx.send(inbound.take_all()).is_err() {
                drop(inbound);
                tracing::debug!(connection_id = %self.id, "Upgraded stream dropped, closing socket");
                self.teardown();
                return;
            }
            if inbound.is_closed() {
                *self.upgrade_tx.lock().expect("driver upgrade mutex poisoned") = None;
            }
            return;
        }

        if inbound.is_empty() && !inbound.is_closed() {
            return;
        }
        let stray = inbound.len();
        inbound.reset();
        inbound.close();
        drop(inbound);

        if self.connected.load(Ordering::Acquire) && !self.closing.swap(true, Ordering::AcqRel) {
            tracing::debug!(
                connection_id = %self.id,
                host = %self.key,
                stray_bytes = stray,
                "Idle connection closed by peer"
            );
            self.teardown();
            self.shared.emit(PoolEvent::Close {
                key: self.key.clone(),
                id: self.id,
                reason: CloseReason::Peer,
            });
        }
    }

    fn complete(&self, cycle: Cycle, error: Option<TransportError>) {
        cycle.done.notify_one();
        // A writer still waiting for 100 Continue re-checks and drops the body.
        cycle.continue_signal.notify_one();
        let Cycle {
            entry,
            parser,
            body_pending,
            ..
        } = cycle;
        let max_retries = entry.options().max_retries;

        match classify(parser.is_finished(), error, entry.retries(), max_retries, entry.can_resend()) {
            Verdict::Success => self.finish_response(entry, parser, body_pending),
            Verdict::Retry(err) => {
                let attempt = entry.record_retry();
                tracing::info!(
                    request_id = %entry.id(),
                    connection_id = %self.id,
                    attempt,
                    max_retries,
                    error = %err,
                    "Transport fault, resending on a fresh connection"
                );
                entry.sink().reset();
                let delay = retry_delay(attempt, &self.shared.retries);
                self.close_connection(CloseReason::Error, Some((entry, delay)));
            }
            Verdict::Fail(err) => {
                if err.is_timeout() {
                    tracing::warn!(request_id = %entry.id(), connection_id = %self.id, error = %err, "Request timed out");
                } else {
                    tracing::debug!(request_id = %entry.id(), connection_id = %self.id, error = %err, "Request failed");
                }
                self.close_connection(CloseReason::Error, None);
                entry.fail(err);
            }
        }
    }

    fn finish_response(&self, entry: Arc<RequestEntry>, parser: ResponseParser, body_pending: bool) {
        let Some(status) = parser.status().cloned() else {
            self.close_connection(CloseReason::Error, None);
            entry.fail(TransportError::MalformedStatusLine(String::new()));
            return;
        };
        let headers = parser.headers().clone();

        let (keep_alive, max) = parse_keep_alive(&headers);
        let remaining = match max {
            Some(max) => max,
            None => match self.remaining.load(Ordering::Acquire) {
                u32::MAX => u32::MAX,
                n => n.saturating_sub(1),
            },
        };
        self.remaining.store(remaining, Ordering::Release);

        let head = entry.head();
        let response = Response {
            version: (status.major, status.minor),
            status: status.status,
            reason: status.reason.clone(),
            headers,
            trailers: parser.trailers().clone(),
            body: Bytes::new(),
            downloaded: parser.downloaded(),
            url: head.url.clone(),
            connection_id: self.id,
            retries: entry.retries(),
            upgraded: false,
            upgrade_stream: None,
        };

        if parser.is_upgraded() {
            self.finish_upgrade(entry, response);
            return;
        }

        let opts = *entry.options();
        let redirect = redirect_target(
            &head.url,
            status.status,
            &response.headers,
            entry.redirects(),
            opts.max_redirects,
        )
        .and_then(|target| match target {
            // A streamed body is gone once sent, so the 3xx goes back to the caller.
            Some(url) if entry.redirect_replays_body(status.status) && !entry.can_resend() => {
                tracing::debug!(
                    request_id = %entry.id(),
                    status = status.status,
                    location = %url,
                    "Redirect needs the consumed request body, returning response as-is"
                );
                Ok(None)
            }
            Some(url) => entry.redirect(status.status, url.clone()).map(|()| Some(url)),
            None => Ok(None),
        });

        let disposition = connection_disposition(
            &status,
            &response.headers,
            parser.delivery_mode(),
            body_pending,
            remaining,
            matches!(redirect, Ok(Some(_))),
        );

        match disposition {
            Disposition::Recycle => self.shared.emit(PoolEvent::Recycle {
                key: self.key.clone(),
                id: self.id,
                keep_alive,
            }),
            Disposition::Close => self.close_connection(CloseReason::Peer, None),
            Disposition::CloseAndResend => {}
        }

        match redirect {
            Ok(Some(url)) => {
                tracing::info!(
                    request_id = %entry.id(),
                    status = status.status,
                    location = %url,
                    "Following redirect"
                );
                entry.sink().reset();
                if disposition == Disposition::CloseAndResend {
                    self.close_connection(CloseReason::Peer, Some((entry, Duration::ZERO)));
                } else {
                    self.shared.emit(PoolEvent::Resend {
                        entry,
                        delay: Duration::ZERO,
                    });
                }
            }
            Ok(None) => {
                let mut response = response;
                if !opts.streaming {
                    response.body = entry.sink().collect();
                }
                entry.complete(Ok(response));
            }
            Err(err) => {
                entry.fail(err);
            }
        }
    }

    fn finish_upgrade(&self, entry: Arc<RequestEntry>, mut response: Response) {
        let leftover = self.lock_inbound().take_all();
        let (tx, rx) = mpsc::unbounded_channel();
        *self.upgrade_tx.lock().expect("driver upgrade mutex poisoned") = Some(tx);
        self.closing.store(true, Ordering::Release);
        self.shared.emit(PoolEvent::Upgraded {
            key: self.key.clone(),
            id: self.id,
        });
        tracing::debug!(connection_id = %self.id, request_id = %entry.id(), "Connection upgraded");

        let stream = UpgradedStream::new(self.id, leftover, rx, self.writer.clone());
        response.upgraded = true;
        match entry.take_upgrade_callback() {
            Some(callback) => callback(stream),
            None => response.upgrade_stream = Some(stream),
        }
        entry.complete(Ok(response));
    }

    /// Tear the socket down and tell the pool, once. A resend rides on the
    /// same event when the pool has not heard about the close yet.
    fn close_connection(&self, reason: CloseReason, resend: Option<(Arc<RequestEntry>, Duration)>) {
        let first = !self.closing.swap(true, Ordering::AcqRel);
        self.teardown();
        let event = match (first, resend) {
            (true, Some((entry, delay))) => PoolEvent::ClosedResendRequest {
                key: self.key.clone(),
                id: self.id,
                entry,
                delay,
            },
            (true, None) => PoolEvent::Close {
                key: self.key.clone(),
                id: self.id,
                reason,
            },
            (false, Some((entry, delay))) => PoolEvent::Resend { entry, delay },
            (false, None) => return,
        };
        self.shared.emit(event);
    }

    /// Abort the reader, drop the writer and end the inbound stream.
    fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.halt.cancel();
        if let Some(reader) = self.reader.lock().expect("driver reader mutex poisoned").take() {
            reader.abort();
        }
        let writer = self.writer.clone();
        self.shared.runtime.spawn(async move {
            if let Some(mut stream) = writer.lock().await.take() {
                let _ = stream.shutdown().await;
            }
        });
        self.lock_inbound().close();
        *self.upgrade_tx.lock().expect("driver upgrade mutex poisoned") = None;
        if self.connected.load(Ordering::Acquire) {
            tracing::debug!(connection_id = %self.id, host = %self.key, "Connection socket closed");
        }
    }

    fn install_cycle(&self, entry: &Arc<RequestEntry>) -> (u64, Arc<Notify>) {
        let seq = self.cycle_seq.fetch_add(1, Ordering::AcqRel) + 1;
        let opts = entry.options();
        let parser = ResponseParser::new(ParserOptions {
            head_request: entry.head().method == "HEAD",
            decompress: opts.decompress,
            accepts_upgrade: opts.accept_upgrade,
        });

        let me = self.me.clone();
        entry.sink().on_space_freed(Arc::new(move || {
            if let Some(driver) = me.upgrade() {
                driver.on_content();
            }
        }));

        let done = Arc::new(Notify::new());
        *self.lock_cycle() = Some(Cycle {
            seq,
            entry: entry.clone(),
            parser,
            pending_error: None,
            body_pending: entry.has_body(),
            continue_signal: Arc::new(Notify::new()),
            done: done.clone(),
        });
        (seq, done)
    }

    fn spawn_watchdog(&self, seq: u64, entry: Arc<RequestEntry>, done: Arc<Notify>, timeout: Duration) {
        let me = self.me.clone();
        self.shared.runtime.spawn(async move {
            let err = tokio::select! {
                _ = done.notified() => return,
                _ = tokio::time::sleep(timeout) => TransportError::Timeout(timeout),
                _ = entry.cancel_token().cancelled() => TransportError::Aborted,
            };
            if let Some(driver) = me.upgrade() {
                driver.fail_cycle(seq, err);
            }
        });
    }

    async fn send(self: Arc<Self>, entry: Arc<RequestEntry>) {
        let settings = self.shared.settings.lookup(self.key.host());
        let opts = *entry.options();
        let connect_timeout = opts.connect_timeout.unwrap_or_else(|| settings.connect_timeout());
        let request_timeout = opts.timeout.unwrap_or_else(|| settings.request_timeout());

        let (seq, done) = self.install_cycle(&entry);

        if entry.cancel_token().is_cancelled() {
            self.fail_cycle(seq, TransportError::Aborted);
            return;
        }
        if entry.queued_for() > connect_timeout {
            self.fail_cycle(seq, TransportError::Timeout(connect_timeout));
            return;
        }
        self.spawn_watchdog(seq, entry.clone(), done, request_timeout);

        if let Err(err) = self.ensure_connected(connect_timeout).await {
            self.fail_cycle(seq, err);
            return;
        }
        match self.write_request(seq, &entry).await {
            Ok(()) => self.on_content(),
            Err(err) => self.fail_cycle(seq, err),
        }
    }

    async fn ensure_connected(&self, timeout: Duration) -> TransportResult<()> {
        if self.connected.load(Ordering::Acquire) {
            return Ok(());
        }
        let Some(me) = self.me.upgrade() else {
            return Err(TransportError::ConnectionClosed);
        };
        let stream = match tokio::time::timeout(timeout, self.shared.connector.connect(&self.key)).await {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::Timeout(timeout)),
        };
        let (read, write) = tokio::io::split(stream);
        *self.writer.lock().await = Some(write);
        let reader = self.shared.runtime.spawn(me.read_loop(read));
        *self.reader.lock().expect("driver reader mutex poisoned") = Some(reader);
        self.connected.store(true, Ordering::Release);
        metrics::record_connection_opened();
        tracing::debug!(connection_id = %self.id, host = %self.key, "Connection opened");

        if self.torn_down.load(Ordering::Acquire) {
            // Disposed while connecting.
            self.torn_down.store(false, Ordering::Release);
            self.teardown();
            return Err(TransportError::ConnectionClosed);
        }
        Ok(())
    }

    async fn read_loop(self: Arc<Self>, mut read: ReadHalf<BoxedStream>) {
        let io = &self.shared.io;
        let mut buf = self.shared.buffers.get(io.read_buffer_size, true);
        loop {
            while self.inbound_len() >= io.max_inbound_buffer {
                self.drained.notified().await;
            }
            match read.read(&mut buf[..]).await {
                Ok(0) => {
                    self.on_connection_closed();
                    break;
                }
                Ok(n) => {
                    self.lock_inbound().append(&buf[..n]);
                    self.on_content();
                }
                Err(err) => {
                    self.on_error(TransportError::Io(err));
                    break;
                }
            }
        }
        self.shared.buffers.release(buf);
    }

    async fn write_request(&self, seq: u64, entry: &RequestEntry) -> TransportResult<()> {
        entry.prepare_headers();
        let head = entry.head();
        let io = &self.shared.io;

        let mut guard = self.writer.lock().await;
        let stream = guard.as_mut().ok_or(TransportError::ConnectionClosed)?;
        let mut writer = RequestWriter::new(stream, &self.shared.buffers, io.write_buffer_size);
        writer.write_head(&head, &self.key).await?;
        writer.flush().await?;

        if !entry.has_body() {
            return Ok(());
        }
        if entry.options().expect_continue {
            if let Some(signal) = self.continue_signal(seq) {
                let _ = tokio::time::timeout(io.expect_continue_timeout(), signal.notified()).await;
            }
            if !self.may_send_body(seq) {
                tracing::debug!(
                    request_id = %entry.id(),
                    connection_id = %self.id,
                    "Final response arrived before 100 Continue, body suppressed"
                );
                return Ok(());
            }
        }
        let Some(body) = entry.take_body() else {
            return Ok(());
        };
        let chunked = head.headers.has_token("transfer-encoding", "chunked");
        let progress = entry.callbacks().upload_progress.as_ref();
        writer
            .write_body(body, chunked, io.upload_chunk_size, progress, &self.halt)
            .await?;
        drop(writer);
        drop(guard);
        self.body_sent(seq);
        Ok(())
    }

    fn continue_signal(&self, seq: u64) -> Option<Arc<Notify>> {
        self.lock_cycle()
            .as_ref()
            .filter(|c| c.seq == seq)
            .map(|c| c.continue_signal.clone())
    }

    /// The body may still go out: no final response has started arriving.
    fn may_send_body(&self, seq: u64) -> bool {
        self.lock_cycle().as_ref().is_some_and(|c| {
            c.seq == seq
                && matches!(
                    c.parser.phase(),
                    ParsePhase::StatusLine | ParsePhase::Headers | ParsePhase::WaitForContentSent
                )
        })
    }

    fn body_sent(&self, seq: u64) {
        if let Some(cycle) = self.lock_cycle().as_mut().filter(|c| c.seq == seq) {
            cycle.body_pending = false;
            cycle.parser.content_sent();
        }
    }
}

impl ProtocolHandler for Http1Driver {
    fn process(&self, entry: Arc<RequestEntry>) {
        let Some(driver) = self.me.upgrade() else {
            entry.fail(TransportError::ConnectionClosed);
            return;
        };
        let long_lived = entry.has_body() || entry.options().accept_upgrade;
        let runtime = self.shared.runtime.clone();
        if long_lived {
            let handle = runtime.clone();
            runtime.spawn_blocking(move || handle.block_on(driver.send(entry)));
        } else {
            runtime.spawn(driver.send(entry));
        }
    }

    fn dispose(&self) {
        self.closing.store(true, Ordering::Release);
        self.teardown();
        // Fails an active cycle with ConnectionClosed.
        self.on_content();
    }
}

impl std::fmt::Debug for Http1Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Http1Driver")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish()
    }
}
