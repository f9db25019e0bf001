//! Per-host connection pool.
//!
//! # Responsibilities
//! - Hold every connection to one host identity and its FIFO request queue
//! - Open connections up to the host limit when nothing can take more work
//! - Hand queued requests to the least-loaded connection
//! - Recycle finished connections and close them after their keep-alive
//!
//! # Design Decisions
//! - The connection list and queue change only under the pool lock; handing a
//!   request to its protocol handler happens after the lock is released
//! - Ties on load go to the newest connection
//! - Idle timers hold a weak reference and a free epoch, so a timer from an
//!   earlier idle period never closes a connection that was reused since

use std::cmp::Reverse;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use crate::client::TransportShared;
use crate::config::HostSettings;
use crate::error::TransportError;
use crate::host::{CloseReason, HostKey};
use crate::http::driver::Http1Driver;
use crate::http::request::RequestEntry;
use crate::net::{Connection, ConnectionId, ConnectionState};
use crate::observability::metrics;

/// A connection that can take another request, as seen by one dispatch pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Candidate {
    pub(crate) slot: usize,
    pub(crate) id: ConnectionId,
    pub(crate) assigned: usize,
    pub(crate) capacity: usize,
}

/// Index of the least-loaded candidate with room left. Newest wins ties.
pub(crate) fn least_loaded(candidates: &[Candidate]) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.assigned < c.capacity)
        .min_by_key(|(_, c)| (c.assigned, Reverse(c.id)))
        .map(|(index, _)| index)
}

/// Point-in-time counts for one host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStats {
    pub connections: usize,
    pub busy: usize,
    pub idle: usize,
    pub queued: usize,
}

#[derive(Default)]
struct PoolInner {
    connections: Vec<Arc<Connection>>,
    queue: VecDeque<Arc<RequestEntry>>,
    closed: bool,
}

pub(crate) struct HostPool {
    key: HostKey,
    shared: Arc<TransportShared>,
    me: Weak<HostPool>,
    inner: Mutex<PoolInner>,
}

impl HostPool {
    pub(crate) fn new(key: HostKey, shared: Arc<TransportShared>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            key,
            shared,
            me: me.clone(),
            inner: Mutex::new(PoolInner::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().expect("host pool mutex poisoned")
    }

    fn settings(&self) -> Arc<HostSettings> {
        self.shared.settings.lookup(self.key.host())
    }

    /// Queue a request and try to dispatch. Resends go to the front.
    pub(crate) fn enqueue(&self, entry: Arc<RequestEntry>, front: bool) {
        {
            let mut inner = self.lock();
            if inner.closed {
                drop(inner);
                entry.fail(TransportError::Shutdown);
                return;
            }
            if front {
                inner.queue.push_front(entry);
            } else {
                inner.queue.push_back(entry);
            }
        }
        self.try_dispatch();
    }

    /// Assign queued requests to available connections, opening new ones
    /// when none is available and the host limit allows.
    pub(crate) fn try_dispatch(&self) {
        let settings = self.settings();
        let mut started = Vec::new();
        {
            let mut inner = self.lock();
            if inner.closed {
                return;
            }
            // Aborted while queued.
            inner.queue.retain(|entry| !entry.is_terminal());
            if inner.queue.is_empty() {
                return;
            }

            let mut candidates: Vec<Candidate> = inner
                .connections
                .iter()
                .enumerate()
                .filter(|(_, conn)| conn.is_available())
                .map(|(slot, conn)| Candidate {
                    slot,
                    id: conn.id(),
                    assigned: conn.assigned(),
                    capacity: conn.capacity(),
                })
                .collect();

            if candidates.is_empty() {
                let mut projected = 0;
                while projected < inner.queue.len()
                    && inner.connections.len() < settings.max_connections_per_host
                {
                    let conn = self.open_connection(&settings);
                    projected += conn.capacity();
                    candidates.push(Candidate {
                        slot: inner.connections.len(),
                        id: conn.id(),
                        assigned: 0,
                        capacity: conn.capacity(),
                    });
                    inner.connections.push(conn);
                }
            }

            while let Some(pick) = least_loaded(&candidates) {
                let Some(entry) = inner.queue.pop_front() else {
                    break;
                };
                if !entry.begin_processing() {
                    continue;
                }
                let candidate = &mut candidates[pick];
                candidate.assigned += 1;
                let conn = inner.connections[candidate.slot].clone();
                conn.assign();
                started.push((conn, entry));
            }

            if !inner.queue.is_empty() {
                tracing::trace!(
                    host = %self.key,
                    queued = inner.queue.len(),
                    connections = inner.connections.len(),
                    "Requests waiting for a connection"
                );
            }
        }

        for (conn, entry) in started {
            tracing::debug!(
                request_id = %entry.id(),
                connection_id = %conn.id(),
                host = %self.key,
                "Request dispatched"
            );
            conn.process(entry);
        }
    }

    fn open_connection(&self, settings: &HostSettings) -> Arc<Connection> {
        let id = ConnectionId::new();
        let driver = Http1Driver::new(id, self.key.clone(), self.shared.clone());
        tracing::debug!(connection_id = %id, host = %self.key, "Connection created");
        Arc::new(Connection::new(id, self.key.clone(), driver, settings.keep_alive()))
    }

    fn find(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.lock().connections.iter().find(|c| c.id() == id).cloned()
    }

    /// The connection finished a request and may be reused.
    pub(crate) fn recycle(&self, id: ConnectionId, advertised: Option<Duration>) {
        let Some(conn) = self.find(id) else {
            return;
        };
        let configured = self.settings().keep_alive();
        let keep_alive = advertised.map_or(configured, |server| server.min(configured));
        if let Some(epoch) = conn.release(Some(keep_alive)) {
            self.arm_idle_timer(conn, epoch);
        }
        self.try_dispatch();
    }

    fn arm_idle_timer(&self, conn: Arc<Connection>, epoch: u64) {
        let pool = self.me.clone();
        let tick = self.settings().idle_check_interval().max(Duration::from_millis(10));
        let conn = Arc::downgrade(&conn);
        self.shared.runtime.spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.tick().await;
            loop {
                interval.tick().await;
                let (Some(pool), Some(conn)) = (pool.upgrade(), conn.upgrade()) else {
                    return;
                };
                match conn.idle_for(epoch) {
                    Some(idle) if idle >= conn.keep_alive() => {
                        tracing::debug!(
                            connection_id = %conn.id(),
                            idle_ms = idle.as_millis() as u64,
                            "Closing idle connection"
                        );
                        pool.remove(conn.id(), ConnectionState::Closed, CloseReason::Idle);
                        return;
                    }
                    Some(_) => {}
                    None => return,
                }
            }
        });
    }

    /// Drop a connection from the pool and dispose its socket.
    pub(crate) fn remove(&self, id: ConnectionId, state: ConnectionState, reason: CloseReason) {
        let conn = {
            let mut inner = self.lock();
            match inner.connections.iter().position(|c| c.id() == id) {
                Some(index) => inner.connections.remove(index),
                None => {
                    tracing::warn!(connection_id = %id, host = %self.key, "Removal of unknown connection");
                    return;
                }
            }
        };
        if conn.close(state, true) {
            metrics::record_connection_closed(reason.as_str());
            tracing::debug!(connection_id = %id, host = %self.key, reason = reason.as_str(), "Connection removed");
        }
        self.try_dispatch();
    }

    /// The connection left pool management (protocol upgrade). Its socket stays open.
    pub(crate) fn detach(&self, id: ConnectionId) {
        let conn = {
            let mut inner = self.lock();
            let index = inner.connections.iter().position(|c| c.id() == id);
            index.map(|i| inner.connections.remove(i))
        };
        if let Some(conn) = conn {
            conn.close(ConnectionState::Closed, false);
            tracing::debug!(connection_id = %id, host = %self.key, "Connection detached after upgrade");
        }
        self.try_dispatch();
    }

    /// Close every `Free` connection now. Returns how many were closed.
    pub(crate) fn remove_idle(&self) -> usize {
        let idle: Vec<ConnectionId> = self
            .lock()
            .connections
            .iter()
            .filter(|c| c.state() == ConnectionState::Free)
            .map(|c| c.id())
            .collect();
        for id in &idle {
            self.remove(*id, ConnectionState::Closed, CloseReason::Idle);
        }
        idle.len()
    }

    /// Abort queued requests and dispose every connection. In-flight
    /// requests fail as their connections go away.
    pub(crate) fn shutdown(&self) {
        let (queued, connections) = {
            let mut inner = self.lock();
            inner.closed = true;
            (
                std::mem::take(&mut inner.queue),
                std::mem::take(&mut inner.connections),
            )
        };
        for entry in queued {
            entry.fail(TransportError::Aborted);
        }
        for conn in connections {
            if conn.close(ConnectionState::Closed, true) {
                metrics::record_connection_closed(CloseReason::Shutdown.as_str());
            }
        }
    }

    pub(crate) fn stats(&self) -> HostStats {
        let inner = self.lock();
        let mut stats = HostStats {
            connections: inner.connections.len(),
            queued: inner.queue.len(),
            ..HostStats::default()
        };
        for conn in &inner.connections {
            match conn.state() {
                ConnectionState::Free => stats.idle += 1,
                ConnectionState::Processing | ConnectionState::Recycle => stats.busy += 1,
                _ => {}
            }
        }
        stats
    }
}

impl std::fmt::Debug for HostPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostPool")
            .field("key", &self.key)
            .field("stats", &self.stats())
            .finish()
    }
}
