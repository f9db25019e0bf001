//! Bounded download sink between the parser and the body consumer.
//!
//! # Responsibilities
//! - Hold decoded body chunks until the consumer takes them
//! - Report fullness so the parser stops pulling bytes off the network
//! - Wake the connection driver when the consumer frees space

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use tokio::sync::Notify;

type SpaceHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct SinkState {
    chunks: VecDeque<Bytes>,
    buffered: usize,
    finished: bool,
    failed: bool,
}

pub struct DownloadSink {
    max_buffered: Option<usize>,
    state: Mutex<SinkState>,
    readable: Notify,
    space_freed: Mutex<Option<SpaceHook>>,
}

impl DownloadSink {
    /// A sink that buffers the whole body.
    pub fn unbounded() -> Self {
        Self::with_limit(None)
    }

    /// A sink that reports full once `max_buffered` bytes are waiting.
    pub fn bounded(max_buffered: usize) -> Self {
        Self::with_limit(Some(max_buffered.max(1)))
    }

    fn with_limit(max_buffered: Option<usize>) -> Self {
        Self {
            max_buffered,
            state: Mutex::new(SinkState::default()),
            readable: Notify::new(),
            space_freed: Mutex::new(None),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SinkState> {
        self.state.lock().expect("download sink mutex poisoned")
    }

    pub fn max_buffered(&self) -> Option<usize> {
        self.max_buffered
    }

    pub fn buffered(&self) -> usize {
        self.state().buffered
    }

    pub fn is_full(&self) -> bool {
        match self.max_buffered {
            Some(max) => self.state().buffered >= max,
            None => false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state().finished
    }

    /// Register the callback run after a consumer frees space.
    pub fn on_space_freed(&self, hook: SpaceHook) {
        *self.space_freed.lock().expect("download sink mutex poisoned") = Some(hook);
    }

    pub fn push(&self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        {
            let mut state = self.state();
            state.buffered += chunk.len();
            state.chunks.push_back(chunk);
        }
        self.readable.notify_one();
    }

    /// Mark the body complete.
    pub fn finish(&self) {
        self.state().finished = true;
        self.readable.notify_one();
    }

    /// Mark the body as cut short. Readers see end-of-stream.
    pub fn fail(&self) {
        {
            let mut state = self.state();
            state.finished = true;
            state.failed = true;
        }
        self.readable.notify_one();
    }

    pub fn is_failed(&self) -> bool {
        self.state().failed
    }

    /// Drop unread chunks and start over, used when a request is resent.
    pub fn reset(&self) {
        let mut state = self.state();
        *state = SinkState::default();
    }

    /// Concatenate and drain everything buffered.
    pub fn collect(&self) -> Bytes {
        let chunks = {
            let mut state = self.state();
            state.buffered = 0;
            std::mem::take(&mut state.chunks)
        };
        let freed = !chunks.is_empty();
        let body = match chunks.len() {
            0 => Bytes::new(),
            1 => chunks.into_iter().next().unwrap_or_default(),
            _ => {
                let total = chunks.iter().map(Bytes::len).sum();
                let mut body = BytesMut::with_capacity(total);
                for chunk in chunks {
                    body.extend_from_slice(&chunk);
                }
                body.freeze()
            }
        };
        if freed {
            self.notify_space();
        }
        body
    }

    /// Next chunk in arrival order, or `None` once the body is complete and drained.
    pub async fn next_chunk(&self) -> Option<Bytes> {
        loop {
            {
                let mut state = self.state();
                if let Some(chunk) = state.chunks.pop_front() {
                    state.buffered -= chunk.len();
                    drop(state);
                    self.notify_space();
                    return Some(chunk);
                }
                if state.finished {
                    return None;
                }
            }
            self.readable.notified().await;
        }
    }

    fn notify_space(&self) {
        let hook = self
            .space_freed
            .lock()
            .expect("download sink mutex poisoned")
            .clone();
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl std::fmt::Debug for DownloadSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadSink")
            .field("max_buffered", &self.max_buffered)
            .field("buffered", &self.buffered())
            .finish()
    }
}
