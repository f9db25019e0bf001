//! Host pools: per-host connections, request queues and dispatch.
//!
//! # Data Flow
//! ```text
//! request URL (+ proxy) → identity.rs (HostKey)
//!     → manager.rs (pool registry, event loop)
//!     → pool.rs (queue, least-loaded dispatch, recycle, idle close)
//!     → settings.rs (limits and timeouts for the host, hot-reloadable)
//! connection drivers → events.rs (PoolEvent) → manager.rs
//! ```

pub mod events;
pub mod identity;
pub(crate) mod manager;
pub(crate) mod pool;
pub mod settings;

pub use events::CloseReason;
pub(crate) use events::PoolEvent;
pub use identity::HostKey;
pub use pool::HostStats;
pub use settings::SettingsStore;
