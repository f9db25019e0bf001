//! Requests, their lifecycle record and the caller's handle.
//!
//! # Responsibilities
//! - Build requests (method, URL, headers, upload body, per-request limits)
//! - Track lifecycle state: Queued → Processing → {Finished, Error, TimedOut, Aborted}
//! - Guarantee exactly one terminal transition per request, whatever retries happen
//! - Carry the cancellation signal checked at dispatch and at send time
//!
//! # Design Decisions
//! - A request ID (UUID v4) is assigned as early as possible for tracing
//! - The state mutex doubles as the once-guard for the terminal transition
//! - In-memory upload bodies are kept for resends; a reader body can only be sent once

use std::fmt;
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{oneshot, Notify};
use url::Url;
use uuid::Uuid;

use crate::error::{TransportError, TransportResult};
use crate::host::HostKey;
use crate::http::headers::HeaderMap;
use crate::http::response::{BodyStream, Response, UpgradedStream};
use crate::http::writer::{apply_default_headers, BodyFraming};
use crate::observability::metrics;
use crate::parser::sink::DownloadSink;

/// Unique request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Queued,
    Processing,
    Finished,
    Error,
    TimedOut,
    Aborted,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Error | Self::TimedOut | Self::Aborted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Finished => "finished",
            Self::Error => "error",
            Self::TimedOut => "timed_out",
            Self::Aborted => "aborted",
        }
    }

    /// Terminal state a failed request ends in.
    pub fn for_error(err: &TransportError) -> Self {
        match err {
            TransportError::Timeout(_) => Self::TimedOut,
            TransportError::Aborted => Self::Aborted,
            _ => Self::Error,
        }
    }
}

/// Request body source.
pub enum UploadBody {
    Bytes(Bytes),
    /// Streamed in bounded chunks. Without a length the upload is chunked.
    Reader {
        reader: Box<dyn Read + Send>,
        length: Option<u64>,
    },
}

impl UploadBody {
    pub fn length(&self) -> Option<u64> {
        match self {
            Self::Bytes(b) => Some(b.len() as u64),
            Self::Reader { length, .. } => *length,
        }
    }
}

impl fmt::Debug for UploadBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::Reader { length, .. } => f.debug_struct("Reader").field("length", length).finish(),
        }
    }
}

pub type StateCallback = Arc<dyn Fn(RequestId, RequestState) + Send + Sync>;
pub type ProgressCallback = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;
pub type HeadersCallback = Arc<dyn Fn(u16, &HeaderMap) + Send + Sync>;
pub type UpgradeCallback = Box<dyn FnOnce(UpgradedStream) + Send>;

#[derive(Default)]
pub(crate) struct Callbacks {
    pub(crate) state: Option<StateCallback>,
    pub(crate) upload_progress: Option<ProgressCallback>,
    pub(crate) download_progress: Option<ProgressCallback>,
    pub(crate) headers: Option<HeadersCallback>,
    pub(crate) upgrade: Mutex<Option<UpgradeCallback>>,
}

/// An HTTP/1.1 request under construction.
pub struct Request {
    pub(crate) method: String,
    pub(crate) url: Url,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Option<UploadBody>,
    pub(crate) chunked_upload: bool,
    pub(crate) expect_continue: bool,
    pub(crate) accept_upgrade: bool,
    pub(crate) decompress: bool,
    pub(crate) max_retries: Option<u32>,
    pub(crate) max_redirects: Option<u32>,
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) stream_buffer: Option<usize>,
    pub(crate) proxy: Option<String>,
    pub(crate) callbacks: Callbacks,
}

impl Request {
    pub fn new(method: impl Into<String>, url: Url) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            url,
            headers: HeaderMap::new(),
            body: None,
            chunked_upload: false,
            expect_continue: false,
            accept_upgrade: false,
            decompress: true,
            max_retries: None,
            max_redirects: None,
            connect_timeout: None,
            timeout: None,
            stream_buffer: None,
            proxy: None,
            callbacks: Callbacks::default(),
        }
    }

    /// Parse `url` and build a request for it.
    pub fn parse(method: impl Into<String>, url: &str) -> TransportResult<Self> {
        let url = Url::parse(url).map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;
        Ok(Self::new(method, url))
    }

    pub fn get(url: &str) -> TransportResult<Self> {
        Self::parse("GET", url)
    }

    pub fn post(url: &str) -> TransportResult<Self> {
        Self::parse("POST", url)
    }

    /// Append a header. Empty values are kept here but never written to the wire.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(UploadBody::Bytes(body.into()));
        self
    }

    /// Stream the body from `reader`. A `None` length forces a chunked upload.
    pub fn body_reader(mut self, reader: impl Read + Send + 'static, length: Option<u64>) -> Self {
        self.body = Some(UploadBody::Reader {
            reader: Box::new(reader),
            length,
        });
        self
    }

    /// Frame the upload with `Transfer-Encoding: chunked` even when its length is known.
    pub fn chunked(mut self) -> Self {
        self.chunked_upload = true;
        self
    }

    /// Send `Expect: 100-continue` and hold the body until the server agrees.
    pub fn expect_continue(mut self) -> Self {
        self.expect_continue = true;
        self
    }

    pub fn decompress(mut self, enabled: bool) -> Self {
        self.decompress = enabled;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Redirect budget; `0` returns redirect responses as they are.
    pub fn max_redirects(mut self, redirects: u32) -> Self {
        self.max_redirects = Some(redirects);
        self
    }

    /// Bounds connection setup and time spent waiting in the queue.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Bounds the whole request/response cycle on a connection.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Stream the body through a sink holding at most `max_buffered` bytes.
    pub fn streaming(mut self, max_buffered: usize) -> Self {
        self.stream_buffer = Some(max_buffered);
        self
    }

    pub fn proxy(mut self, address: impl Into<String>) -> Self {
        self.proxy = Some(address.into());
        self
    }

    pub fn on_state_change(mut self, f: impl Fn(RequestId, RequestState) + Send + Sync + 'static) -> Self {
        self.callbacks.state = Some(Arc::new(f));
        self
    }

    pub fn on_upload_progress(mut self, f: impl Fn(u64, Option<u64>) + Send + Sync + 'static) -> Self {
        self.callbacks.upload_progress = Some(Arc::new(f));
        self
    }

    pub fn on_download_progress(mut self, f: impl Fn(u64, Option<u64>) + Send + Sync + 'static) -> Self {
        self.callbacks.download_progress = Some(Arc::new(f));
        self
    }

    pub fn on_headers(mut self, f: impl Fn(u16, &HeaderMap) + Send + Sync + 'static) -> Self {
        self.callbacks.headers = Some(Arc::new(f));
        self
    }

    /// Accept a `101 Switching Protocols` answer. Without a callback the
    /// stream is returned on the [`Response`].
    pub fn upgrade(mut self) -> Self {
        self.accept_upgrade = true;
        self
    }

    pub fn on_upgrade(mut self, f: impl FnOnce(UpgradedStream) + Send + 'static) -> Self {
        self.accept_upgrade = true;
        self.callbacks.upgrade = Mutex::new(Some(Box::new(f)));
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body", &self.body)
            .finish()
    }
}

/// 303 always, and 301/302 for anything but GET and HEAD, turn into a bodiless GET.
fn redirect_switches_to_get(status: u16, method: &str) -> bool {
    status == 303 || (matches!(status, 301 | 302) && !matches!(method, "GET" | "HEAD"))
}

/// Cancellation signal shared between the handle and the driver.
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Method, target and headers as they go on the wire.
#[derive(Debug, Clone)]
pub(crate) struct RequestHead {
    pub(crate) method: String,
    pub(crate) url: Url,
    pub(crate) headers: HeaderMap,
}

enum BodySlot {
    Empty,
    Bytes(Bytes),
    Reader(Box<dyn Read + Send>, Option<u64>),
    Consumed,
}

/// Per-request options fixed at submission.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RequestOptions {
    pub(crate) chunked_upload: bool,
    pub(crate) expect_continue: bool,
    pub(crate) accept_upgrade: bool,
    pub(crate) decompress: bool,
    pub(crate) max_retries: u32,
    pub(crate) max_redirects: u32,
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) streaming: bool,
}

type Completion = oneshot::Sender<TransportResult<Response>>;

/// The queue entry: one request through its whole lifecycle, across retries
/// and redirects.
pub(crate) struct RequestEntry {
    id: RequestId,
    key: Mutex<HostKey>,
    head: Mutex<RequestHead>,
    body: Mutex<BodySlot>,
    options: RequestOptions,
    proxy: Option<String>,
    state: Mutex<RequestState>,
    retries: AtomicU32,
    redirects: AtomicU32,
    created: Instant,
    queued_at: Mutex<Instant>,
    cancel: CancelToken,
    sink: Arc<DownloadSink>,
    callbacks: Callbacks,
    completion: Mutex<Option<Completion>>,
}

impl RequestEntry {
    /// Build the entry and the caller's handle.
    pub(crate) fn new(
        request: Request,
        default_retries: u32,
        default_redirects: u32,
    ) -> TransportResult<(Arc<Self>, RequestHandle)> {
        let mut key = HostKey::from_url(&request.url)?;
        if let Some(proxy) = &request.proxy {
            key = key.with_proxy(proxy.clone());
        }
        let sink = Arc::new(match request.stream_buffer {
            Some(max) => DownloadSink::bounded(max),
            None => DownloadSink::unbounded(),
        });
        let options = RequestOptions {
            chunked_upload: request.chunked_upload,
            expect_continue: request.expect_continue && request.body.is_some(),
            accept_upgrade: request.accept_upgrade,
            decompress: request.decompress,
            max_retries: request.max_retries.unwrap_or(default_retries),
            max_redirects: request.max_redirects.unwrap_or(default_redirects),
            connect_timeout: request.connect_timeout,
            timeout: request.timeout,
            streaming: request.stream_buffer.is_some(),
        };
        let body = match request.body {
            None => BodySlot::Empty,
            Some(UploadBody::Bytes(b)) => BodySlot::Bytes(b),
            Some(UploadBody::Reader { reader, length }) => BodySlot::Reader(reader, length),
        };

        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        let entry = Arc::new(Self {
            id: RequestId::new(),
            key: Mutex::new(key),
            head: Mutex::new(RequestHead {
                method: request.method,
                url: request.url,
                headers: request.headers,
            }),
            body: Mutex::new(body),
            options,
            proxy: request.proxy,
            state: Mutex::new(RequestState::Queued),
            retries: AtomicU32::new(0),
            redirects: AtomicU32::new(0),
            created: now,
            queued_at: Mutex::new(now),
            cancel: CancelToken::default(),
            sink,
            callbacks: request.callbacks,
            completion: Mutex::new(Some(tx)),
        });
        let handle = RequestHandle {
            entry: entry.clone(),
            rx,
        };
        Ok((entry, handle))
    }

    fn lock_state(&self) -> MutexGuard<'_, RequestState> {
        self.state.lock().expect("request state mutex poisoned")
    }

    pub(crate) fn id(&self) -> RequestId {
        self.id
    }

    pub(crate) fn key(&self) -> HostKey {
        self.key.lock().expect("request key mutex poisoned").clone()
    }

    pub(crate) fn head(&self) -> RequestHead {
        self.head.lock().expect("request head mutex poisoned").clone()
    }

    pub(crate) fn with_head<R>(&self, f: impl FnOnce(&mut RequestHead) -> R) -> R {
        f(&mut self.head.lock().expect("request head mutex poisoned"))
    }

    pub(crate) fn options(&self) -> &RequestOptions {
        &self.options
    }

    pub(crate) fn state(&self) -> RequestState {
        *self.lock_state()
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub(crate) fn retries(&self) -> u32 {
        self.retries.load(Ordering::Acquire)
    }

    pub(crate) fn redirects(&self) -> u32 {
        self.redirects.load(Ordering::Acquire)
    }

    pub(crate) fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub(crate) fn sink(&self) -> &Arc<DownloadSink> {
        &self.sink
    }

    pub(crate) fn callbacks(&self) -> &Callbacks {
        &self.callbacks
    }

    /// Time since the request last entered the queue.
    pub(crate) fn queued_for(&self) -> Duration {
        self.queued_at.lock().expect("request queue mutex poisoned").elapsed()
    }

    pub(crate) fn has_body(&self) -> bool {
        !matches!(*self.body.lock().expect("request body mutex poisoned"), BodySlot::Empty)
    }

    /// Body length, `None` when unknown or the body is not in memory.
    pub(crate) fn body_length(&self) -> Option<Option<u64>> {
        match &*self.body.lock().expect("request body mutex poisoned") {
            BodySlot::Empty | BodySlot::Consumed => None,
            BodySlot::Bytes(b) => Some(Some(b.len() as u64)),
            BodySlot::Reader(_, length) => Some(*length),
        }
    }

    /// Body for one send attempt. In-memory bodies stay available for resends.
    pub(crate) fn take_body(&self) -> Option<UploadBody> {
        let mut slot = self.body.lock().expect("request body mutex poisoned");
        match std::mem::replace(&mut *slot, BodySlot::Consumed) {
            BodySlot::Empty => {
                *slot = BodySlot::Empty;
                None
            }
            BodySlot::Bytes(b) => {
                *slot = BodySlot::Bytes(b.clone());
                Some(UploadBody::Bytes(b))
            }
            BodySlot::Reader(reader, length) => Some(UploadBody::Reader { reader, length }),
            BodySlot::Consumed => None,
        }
    }

    /// Fill in Host, body framing, Accept-Encoding and Expect for the next attempt.
    pub(crate) fn prepare_headers(&self) {
        let framing = BodyFraming::for_body(self.body_length(), self.options.chunked_upload);
        let key = self.key();
        self.with_head(|head| {
            apply_default_headers(
                &mut head.headers,
                &key,
                framing,
                self.options.decompress,
                self.options.expect_continue,
            )
        });
    }

    /// A request whose streamed body was already consumed cannot be replayed.
    pub(crate) fn can_resend(&self) -> bool {
        !matches!(*self.body.lock().expect("request body mutex poisoned"), BodySlot::Consumed)
    }

    fn notify_state(&self, state: RequestState) {
        if let Some(cb) = &self.callbacks.state {
            cb(self.id, state);
        }
    }

    /// Queued → Processing. Fails when the request already moved on (aborted while queued).
    pub(crate) fn begin_processing(&self) -> bool {
        {
            let mut state = self.lock_state();
            if *state != RequestState::Queued {
                return false;
            }
            *state = RequestState::Processing;
        }
        self.notify_state(RequestState::Processing);
        true
    }

    /// Back to `Queued` for a resend. Silent: retries are only visible through the counter.
    pub(crate) fn requeue(&self) -> bool {
        let mut state = self.lock_state();
        if state.is_terminal() {
            return false;
        }
        *state = RequestState::Queued;
        *self.queued_at.lock().expect("request queue mutex poisoned") = Instant::now();
        true
    }

    pub(crate) fn record_retry(&self) -> u32 {
        metrics::record_retry();
        self.retries.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Point the request at a redirect target. 303, and 301/302 for methods
    /// other than GET and HEAD, continue as a bodiless GET.
    /// Whether following a `status` redirect would send the body again.
    pub(crate) fn redirect_replays_body(&self, status: u16) -> bool {
        let method = self.head.lock().expect("request head mutex poisoned").method.clone();
        !redirect_switches_to_get(status, &method) && self.has_body()
    }

    pub(crate) fn redirect(&self, status: u16, location: Url) -> TransportResult<()> {
        let mut key = HostKey::from_url(&location)?;
        if let Some(proxy) = &self.proxy {
            key = key.with_proxy(proxy.clone());
        }
        self.redirects.fetch_add(1, Ordering::AcqRel);

        let mut head = self.head.lock().expect("request head mutex poisoned");
        if redirect_switches_to_get(status, &head.method) {
            if head.method != "HEAD" {
                head.method = "GET".to_string();
            }
            *self.body.lock().expect("request body mutex poisoned") = BodySlot::Empty;
            for name in ["content-length", "transfer-encoding", "content-type", "expect"] {
                head.headers.remove(name);
            }
        }
        if location.host_str() != head.url.host_str() {
            head.headers.remove("authorization");
            head.headers.remove("cookie");
        }
        head.headers.remove("host");
        head.url = location;
        *self.key.lock().expect("request key mutex poisoned") = key;
        Ok(())
    }

    /// Deliver the terminal outcome. Only the first call has any effect.
    pub(crate) fn complete(&self, result: TransportResult<Response>) -> bool {
        let state = match &result {
            Ok(_) => RequestState::Finished,
            Err(err) => RequestState::for_error(err),
        };
        {
            let mut current = self.lock_state();
            if current.is_terminal() {
                return false;
            }
            *current = state;
        }
        if result.is_err() {
            self.sink.fail();
        }
        metrics::record_request(state.as_str(), self.created);
        match &result {
            Ok(response) => tracing::debug!(
                request_id = %self.id,
                status = response.status(),
                retries = self.retries(),
                "Request finished"
            ),
            Err(err) => tracing::debug!(
                request_id = %self.id,
                state = state.as_str(),
                error = %err,
                "Request failed"
            ),
        }
        self.notify_state(state);
        if let Some(tx) = self.completion.lock().expect("request completion mutex poisoned").take() {
            let _ = tx.send(result);
        }
        true
    }

    pub(crate) fn fail(&self, err: TransportError) -> bool {
        self.complete(Err(err))
    }

    /// Abort a request that has not reached a connection yet.
    pub(crate) fn abort_if_queued(&self) -> bool {
        if self.state() == RequestState::Queued {
            return self.fail(TransportError::Aborted);
        }
        false
    }

    pub(crate) fn take_upgrade_callback(&self) -> Option<UpgradeCallback> {
        self.callbacks.upgrade.lock().expect("upgrade callback mutex poisoned").take()
    }
}

impl fmt::Debug for RequestEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestEntry")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("retries", &self.retries())
            .finish()
    }
}

/// The caller's side of a submitted request.
pub struct RequestHandle {
    entry: Arc<RequestEntry>,
    rx: oneshot::Receiver<TransportResult<Response>>,
}

impl RequestHandle {
    pub fn id(&self) -> RequestId {
        self.entry.id()
    }

    pub fn state(&self) -> RequestState {
        self.entry.state()
    }

    pub fn retries(&self) -> u32 {
        self.entry.retries()
    }

    /// Cancel the request. A queued request ends `Aborted` at once; one in
    /// flight has its connection torn down.
    pub fn cancel(&self) {
        self.entry.cancel_token().cancel();
        self.entry.abort_if_queued();
    }

    /// Body chunks as they arrive. Use with [`Request::streaming`].
    pub fn body_stream(&self) -> BodyStream {
        BodyStream::new(self.entry.sink().clone())
    }

    /// Wait for the terminal outcome.
    pub async fn response(self) -> TransportResult<Response> {
        self.rx.await.unwrap_or(Err(TransportError::Shutdown))
    }
}

impl fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandle").field("entry", &self.entry).finish()
    }
}
