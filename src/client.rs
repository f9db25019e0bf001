//! The transport context: buffers, host pools and background tasks.
//!
//! # Responsibilities
//! - Own everything a request needs: buffer pool, settings, connector, pools
//! - Run the pool event loop and the buffer maintenance task
//! - Accept requests and hand back handles
//! - Tear everything down on shutdown
//!
//! # Data Flow
//! ```text
//! Transport::send(Request)
//!     → RequestEntry + RequestHandle
//!     → HostManager::enqueue → HostPool dispatch → Http1Driver
//!     → PoolEvent channel → event loop task → HostManager::handle
//!     → RequestHandle::response() resolves
//! ```
//!
//! # Design Decisions
//! - No process-wide state; every transport is independent, so tests can run
//!   many side by side
//! - Background tasks stop through the shared `Shutdown` broadcast

use std::path::Path;
use std::sync::Arc;

use notify::RecommendedWatcher;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::buffer::{BufferPool, PoolStats};
use crate::config::validation::validate_config;
use crate::config::watcher::{HostSettingsWatcher, HostTable};
use crate::config::{ConfigError, IoConfig, RetryConfig, TransportConfig};
use crate::error::{TransportError, TransportResult};
use crate::host::manager::HostManager;
use crate::host::{HostKey, HostStats, PoolEvent, SettingsStore};
use crate::http::request::{Request, RequestEntry, RequestHandle};
use crate::http::response::Response;
use crate::lifecycle::Shutdown;
use crate::net::{Connector, TcpConnector};

/// State shared by the pools, the drivers and the background tasks.
pub(crate) struct TransportShared {
    pub(crate) buffers: Arc<BufferPool>,
    pub(crate) settings: SettingsStore,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) io: IoConfig,
    pub(crate) retries: RetryConfig,
    pub(crate) runtime: Handle,
    events: mpsc::UnboundedSender<PoolEvent>,
}

impl TransportShared {
    /// Queue an event for the pool event loop. When the loop is gone the
    /// request the event carries is failed instead.
    pub(crate) fn emit(&self, event: PoolEvent) {
        if let Err(mpsc::error::SendError(event)) = self.events.send(event) {
            tracing::debug!(event = ?event, "Pool event loop stopped, abandoning event");
            event.abandon();
        }
    }
}

/// An HTTP/1.1 client transport.
///
/// Must be created inside a Tokio runtime; its background tasks run there.
pub struct Transport {
    shared: Arc<TransportShared>,
    hosts: Arc<HostManager>,
    shutdown: Shutdown,
    default_retries: u32,
    default_redirects: u32,
}

impl Transport {
    /// Build a transport that dials plain TCP.
    pub fn new(config: TransportConfig) -> Result<Self, ConfigError> {
        Self::with_connector(config, Arc::new(TcpConnector))
    }

    /// Build a transport around a custom connector (TLS, test doubles).
    pub fn with_connector(config: TransportConfig, connector: Arc<dyn Connector>) -> Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let runtime = Handle::current();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(TransportShared {
            buffers: Arc::new(BufferPool::new(&config.buffers)),
            settings: SettingsStore::new(&config.hosts),
            connector,
            io: config.io.clone(),
            retries: config.retries.clone(),
            runtime: runtime.clone(),
            events: events_tx,
        });
        let hosts = Arc::new(HostManager::new(shared.clone()));
        let shutdown = Shutdown::new();

        runtime.spawn(hosts.clone().run(events_rx, shutdown.subscribe()));
        runtime.spawn(maintain_buffers(
            shared.buffers.clone(),
            config.buffers.maintenance_interval(),
            shutdown.subscribe(),
        ));

        tracing::info!(
            hosts = config.hosts.len(),
            max_retries = config.retries.max_retries,
            max_redirects = config.redirects.max_redirects,
            "Transport started"
        );

        Ok(Self {
            shared,
            hosts,
            shutdown,
            default_retries: config.retries.max_retries,
            default_redirects: config.redirects.max_redirects,
        })
    }

    /// Queue a request. The handle resolves once the request reaches a terminal state.
    pub fn send(&self, request: Request) -> TransportResult<RequestHandle> {
        if self.shutdown.is_triggered() {
            return Err(TransportError::Shutdown);
        }
        let (entry, handle) = RequestEntry::new(request, self.default_retries, self.default_redirects)?;
        let head = entry.head();
        tracing::debug!(request_id = %entry.id(), method = %head.method, url = %head.url, "Request queued");
        self.hosts.enqueue(entry, false);
        Ok(handle)
    }

    /// Send and wait for the response.
    pub async fn execute(&self, request: Request) -> TransportResult<Response> {
        self.send(request)?.response().await
    }

    /// Swap in new per-host settings. Queued requests are re-dispatched under
    /// the new limits.
    pub fn apply_host_settings(&self, config: &TransportConfig) {
        apply_settings(&self.shared, &self.hosts, &config.hosts);
    }

    /// Watch a config file and apply host settings whenever it changes.
    ///
    /// The returned watcher must be kept alive for reloads to keep flowing.
    pub fn watch_config(&self, path: &Path) -> Result<RecommendedWatcher, notify::Error> {
        let (watcher, mut updates) = HostSettingsWatcher::new(path);
        let watcher = watcher.run()?;
        let shared = self.shared.clone();
        let hosts = self.hosts.clone();
        let mut shutdown = self.shutdown.subscribe();
        self.shared.runtime.spawn(async move {
            loop {
                tokio::select! {
                    update = updates.recv() => match update {
                        Some(table) => apply_settings(&shared, &hosts, &table),
                        None => break,
                    },
                    _ = shutdown.recv() => break,
                }
            }
        });
        Ok(watcher)
    }

    /// Close every idle connection now. Returns how many were closed.
    pub fn remove_idle_connections(&self) -> usize {
        let closed = self.hosts.remove_idle_connections();
        tracing::debug!(closed, "Idle connections removed");
        closed
    }

    /// Drop every host pool, aborting queued requests and closing connections.
    pub fn clear_hosts(&self) {
        self.hosts.clear();
    }

    pub fn buffer_stats(&self) -> PoolStats {
        self.shared.buffers.stats()
    }

    pub fn host_stats(&self, key: &HostKey) -> Option<HostStats> {
        self.hosts.stats(key)
    }

    /// Connections across all hosts, in any state.
    pub fn connection_count(&self) -> usize {
        self.hosts.connection_count()
    }

    /// Stop background tasks, abort queued requests and close every connection.
    pub fn shutdown(&self) {
        if self.shutdown.is_triggered() {
            return;
        }
        self.shutdown.trigger();
        self.hosts.shutdown();
        self.shared.buffers.clear();
        tracing::info!("Transport shut down");
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("hosts", &self.hosts)
            .field("buffers", &self.shared.buffers)
            .finish()
    }
}

fn apply_settings(shared: &TransportShared, hosts: &HostManager, table: &HostTable) {
    shared.settings.replace(table);
    hosts.dispatch_all();
}

async fn maintain_buffers(
    buffers: Arc<BufferPool>,
    every: std::time::Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(every.max(std::time::Duration::from_millis(100)));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let evicted = buffers.maintain();
                tracing::trace!(evicted, "Buffer maintenance tick");
            }
            _ = shutdown.recv() => break,
        }
    }
}
