//! Pooled connection record and lifecycle state.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing and identity checks
//! - Track state, assigned requests and idle time for the host pool
//! - Hand requests to the protocol handler that owns the socket
//!
//! # State Machine
//! ```text
//! Initial → Processing → { Free, Recycle, Closed, ClosedResendRequest }
//! Free → Processing (reassigned) | Closed (idle timer)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::host::HostKey;
use crate::http::request::RequestEntry;

/// Global atomic counter for connection IDs.
/// Relaxed ordering is enough since only uniqueness and creation order matter.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection. Later connections have larger IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, socket not yet established.
    Initial,
    /// Serving at least one request.
    Processing,
    /// Idle and reusable.
    Free,
    /// The driver asked for the connection back; becomes `Free` once released.
    Recycle,
    /// Socket disposed and removed from the pool.
    Closed,
    /// Closed because the request it carried is being resent elsewhere.
    ClosedResendRequest,
}

impl ConnectionState {
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Closed | Self::ClosedResendRequest)
    }

    /// Whether the pool may hand this connection another request.
    pub fn is_assignable(self) -> bool {
        matches!(self, Self::Initial | Self::Free)
    }
}

/// The protocol side of a connection: writes requests and feeds the parser.
pub(crate) trait ProtocolHandler: Send + Sync {
    /// Start one request/response cycle.
    fn process(&self, entry: Arc<RequestEntry>);

    /// Tear down the socket and any in-flight cycle.
    fn dispose(&self);

    /// Requests the protocol can carry at once.
    fn capacity(&self) -> usize {
        1
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: ConnectionState,
    assigned: usize,
    last_active: Instant,
    keep_alive: Duration,
    /// Bumped every time the connection turns `Free`, so a stale idle timer
    /// can tell it is looking at an older idle period.
    free_epoch: u64,
}

pub(crate) struct Connection {
    id: ConnectionId,
    key: HostKey,
    capacity: usize,
    handler: Arc<dyn ProtocolHandler>,
    lifecycle: Mutex<Lifecycle>,
}

impl Connection {
    pub fn new(id: ConnectionId, key: HostKey, handler: Arc<dyn ProtocolHandler>, keep_alive: Duration) -> Self {
        let capacity = handler.capacity().max(1);
        Self {
            id,
            key,
            capacity,
            handler,
            lifecycle: Mutex::new(Lifecycle {
                state: ConnectionState::Initial,
                assigned: 0,
                last_active: Instant::now(),
                keep_alive,
                free_epoch: 0,
            }),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().expect("connection lifecycle mutex poisoned")
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle().state
    }

    pub fn assigned(&self) -> usize {
        self.lifecycle().assigned
    }

    pub fn keep_alive(&self) -> Duration {
        self.lifecycle().keep_alive
    }

    /// Whether another request fits: idle, fresh, or a multiplexed connection under capacity.
    pub fn is_available(&self) -> bool {
        let lc = self.lifecycle();
        lc.state.is_assignable() || (lc.state == ConnectionState::Processing && lc.assigned < self.capacity)
    }

    /// Count one more request against this connection.
    pub fn assign(&self) {
        let mut lc = self.lifecycle();
        lc.assigned += 1;
        lc.state = ConnectionState::Processing;
        lc.last_active = Instant::now();
    }

    pub fn process(&self, entry: Arc<RequestEntry>) {
        self.handler.process(entry);
    }

    /// Release one request. Returns the free epoch when the connection went idle.
    pub fn release(&self, keep_alive: Option<Duration>) -> Option<u64> {
        let mut lc = self.lifecycle();
        if lc.state.is_closed() {
            return None;
        }
        lc.state = ConnectionState::Recycle;
        lc.assigned = lc.assigned.saturating_sub(1);
        lc.last_active = Instant::now();
        if let Some(keep_alive) = keep_alive {
            lc.keep_alive = keep_alive;
        }
        if lc.assigned > 0 {
            lc.state = ConnectionState::Processing;
            return None;
        }
        lc.state = ConnectionState::Free;
        lc.free_epoch += 1;
        Some(lc.free_epoch)
    }

    /// How long the connection has been free, if it is still in the idle
    /// period identified by `epoch`.
    pub fn idle_for(&self, epoch: u64) -> Option<Duration> {
        let lc = self.lifecycle();
        (lc.state == ConnectionState::Free && lc.free_epoch == epoch).then(|| lc.last_active.elapsed())
    }

    /// Move to a terminal state. Returns `false` if it was already closed.
    pub fn close(&self, state: ConnectionState, dispose: bool) -> bool {
        {
            let mut lc = self.lifecycle();
            if lc.state.is_closed() {
                return false;
            }
            lc.state = state;
            lc.assigned = 0;
        }
        if dispose {
            self.handler.dispose();
        }
        true
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lc = self.lifecycle();
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("state", &lc.state)
            .field("assigned", &lc.assigned)
            .field("capacity", &self.capacity)
            .finish()
    }
}
