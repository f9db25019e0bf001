//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → TransportConfig (validated, immutable)
//!     → buffer pool sizing, io sizing, retry defaults
//!     → host settings published to the live SettingsStore
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads and validates the new config
//!     → host table published only if it differs from the last one
//!     → Transport::watch_config task swaps the host settings atomically
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Only host settings are hot-reloadable; buffer and io sizing are fixed at construction
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BufferConfig, HostSettings, IoConfig, ObservabilityConfig, RedirectConfig, RetryConfig,
    TransportConfig, DEFAULT_HOST_PATTERN,
};
