//! Host pool registry and the pool event loop.
//!
//! # Responsibilities
//! - Create one pool per host identity on first use
//! - Apply connection and request events from the drivers, in order
//! - Resend requests after retries and redirects
//!
//! # Data Flow
//! ```text
//! Transport::send → enqueue → HostPool (by HostKey)
//! Http1Driver → PoolEvent (mpsc) → run() → handle()
//!     Recycle              → HostPool::recycle
//!     Close                → HostPool::remove
//!     ClosedResendRequest  → HostPool::remove, then resend
//!     Resend               → resend (possibly to another host)
//!     Upgraded             → HostPool::detach
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};

use crate::client::TransportShared;
use crate::error::TransportError;
use crate::host::pool::{HostPool, HostStats};
use crate::host::{CloseReason, HostKey, PoolEvent};
use crate::http::request::RequestEntry;
use crate::net::ConnectionState;

pub(crate) struct HostManager {
    pools: DashMap<HostKey, Arc<HostPool>>,
    shared: Arc<TransportShared>,
    closed: AtomicBool,
}

impl HostManager {
    pub(crate) fn new(shared: Arc<TransportShared>) -> Self {
        Self {
            pools: DashMap::new(),
            shared,
            closed: AtomicBool::new(false),
        }
    }

    fn pool(&self, key: &HostKey) -> Arc<HostPool> {
        if let Some(pool) = self.pools.get(key) {
            return pool.value().clone();
        }
        self.pools
            .entry(key.clone())
            .or_insert_with(|| {
                tracing::debug!(host = %key, "Host pool created");
                HostPool::new(key.clone(), self.shared.clone())
            })
            .value()
            .clone()
    }

    fn existing(&self, key: &HostKey) -> Option<Arc<HostPool>> {
        self.pools.get(key).map(|p| p.value().clone())
    }

    pub(crate) fn enqueue(&self, entry: Arc<RequestEntry>, front: bool) {
        if self.closed.load(Ordering::Acquire) {
            entry.fail(TransportError::Shutdown);
            return;
        }
        let key = entry.key();
        self.pool(&key).enqueue(entry, front);
    }

    fn resend(&self, entry: Arc<RequestEntry>, delay: Duration) {
        if !entry.requeue() {
            return;
        }
        if delay.is_zero() {
            self.enqueue(entry, true);
            return;
        }
        let shared = self.shared.clone();
        self.shared.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            shared.emit(PoolEvent::Resend {
                entry,
                delay: Duration::ZERO,
            });
        });
    }

    pub(crate) fn handle(&self, event: PoolEvent) {
        tracing::trace!(event = ?event, "Pool event");
        match event {
            PoolEvent::Recycle { key, id, keep_alive } => {
                if let Some(pool) = self.existing(&key) {
                    pool.recycle(id, keep_alive);
                }
            }
            PoolEvent::Close { key, id, reason } => {
                if let Some(pool) = self.existing(&key) {
                    pool.remove(id, ConnectionState::Closed, reason);
                }
            }
            PoolEvent::ClosedResendRequest { key, id, entry, delay } => {
                if let Some(pool) = self.existing(&key) {
                    pool.remove(id, ConnectionState::ClosedResendRequest, CloseReason::Resend);
                }
                self.resend(entry, delay);
            }
            PoolEvent::Resend { entry, delay } => self.resend(entry, delay),
            PoolEvent::Upgraded { key, id } => {
                if let Some(pool) = self.existing(&key) {
                    pool.detach(id);
                }
            }
        }
    }

    /// Apply pool events until shutdown. Events still queued afterwards fail
    /// the requests they carry.
    pub(crate) async fn run(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<PoolEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tracing::debug!("Pool event loop started");
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },
                _ = shutdown.recv() => break,
            }
        }
        events.close();
        while let Ok(event) = events.try_recv() {
            event.abandon();
        }
        tracing::debug!("Pool event loop stopped");
    }

    /// Re-run dispatch for every host, after settings changed.
    pub(crate) fn dispatch_all(&self) {
        let pools: Vec<Arc<HostPool>> = self.pools.iter().map(|p| p.value().clone()).collect();
        for pool in pools {
            pool.try_dispatch();
        }
    }

    pub(crate) fn remove_idle_connections(&self) -> usize {
        let pools: Vec<Arc<HostPool>> = self.pools.iter().map(|p| p.value().clone()).collect();
        pools.iter().map(|pool| pool.remove_idle()).sum()
    }

    /// Shut down and forget every host pool. New requests create fresh pools.
    pub(crate) fn clear(&self) {
        let keys: Vec<HostKey> = self.pools.iter().map(|p| p.key().clone()).collect();
        for key in keys {
            if let Some((_, pool)) = self.pools.remove(&key) {
                pool.shutdown();
            }
        }
        tracing::info!("Host pools cleared");
    }

    pub(crate) fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let pools: Vec<Arc<HostPool>> = self.pools.iter().map(|p| p.value().clone()).collect();
        for pool in &pools {
            pool.shutdown();
        }
        tracing::info!(hosts = pools.len(), "Host pools shut down");
    }

    pub(crate) fn stats(&self, key: &HostKey) -> Option<HostStats> {
        self.existing(key).map(|pool| pool.stats())
    }

    pub(crate) fn connection_count(&self) -> usize {
        self.pools.iter().map(|p| p.stats().connections).sum()
    }
}

impl std::fmt::Debug for HostManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostManager")
            .field("hosts", &self.pools.len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
