//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the transport.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Pattern that matches every host not covered by a more specific entry.
pub const DEFAULT_HOST_PATTERN: &str = "*";

/// Root configuration for the transport.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Buffer pool settings.
    pub buffers: BufferConfig,

    /// Per-host connection settings keyed by host pattern (`*` is the default).
    pub hosts: HashMap<String, HostSettings>,

    /// Socket I/O sizing.
    pub io: IoConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Redirect handling.
    pub redirects: RedirectConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        let mut hosts = HashMap::new();
        hosts.insert(DEFAULT_HOST_PATTERN.to_string(), HostSettings::default());
        Self {
            buffers: BufferConfig::default(),
            hosts,
            io: IoConfig::default(),
            retries: RetryConfig::default(),
            redirects: RedirectConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Size-classed buffer pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Enable pooling. When disabled every release is discarded.
    pub enabled: bool,

    /// Floor for rounded sizes and smallest pool-eligible buffer.
    pub min_buffer_size: usize,

    /// Largest pool-eligible buffer.
    pub max_buffer_size: usize,

    /// Ceiling on bytes held across all size classes.
    pub max_pool_bytes: usize,

    /// Released buffers idle longer than this are evicted.
    pub max_age_secs: u64,

    /// Minimum time between maintenance passes.
    pub maintenance_interval_secs: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_buffer_size: 256,
            max_buffer_size: 4 * 1024 * 1024,
            max_pool_bytes: 16 * 1024 * 1024,
            max_age_secs: 30,
            maintenance_interval_secs: 5,
        }
    }
}

impl BufferConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }
}

/// Connection pool limits and timeouts for one host pattern.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HostSettings {
    /// Maximum simultaneous connections to one host identity.
    pub max_connections_per_host: usize,

    /// Concurrent requests per connection for multiplexed protocols.
    pub max_assigned_requests: usize,

    /// Idle time after which a free connection is closed, unless the server
    /// advertises a shorter keep-alive.
    pub keep_alive_secs: u64,

    /// Connection establishment timeout (also bounds time spent queued).
    pub connect_timeout_secs: u64,

    /// Total time allowed for one request/response cycle.
    pub request_timeout_secs: u64,

    /// Cadence of the idle check on free connections.
    pub idle_check_interval_ms: u64,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            max_connections_per_host: 6,
            max_assigned_requests: 8,
            keep_alive_secs: 20,
            connect_timeout_secs: 20,
            request_timeout_secs: 60,
            idle_check_interval_ms: 500,
        }
    }
}

impl HostSettings {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_millis(self.idle_check_interval_ms)
    }
}

/// Socket read/write sizing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IoConfig {
    /// Size of each pooled read buffer.
    pub read_buffer_size: usize,

    /// Size of the pooled staging buffer for request heads.
    pub write_buffer_size: usize,

    /// Bounded chunk size for streamed uploads.
    pub upload_chunk_size: usize,

    /// The reader stops pulling from the socket while this many bytes are unparsed.
    pub max_inbound_buffer: usize,

    /// How long an `Expect: 100-continue` request waits before sending its body anyway.
    pub expect_continue_timeout_ms: u64,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 16 * 1024,
            write_buffer_size: 16 * 1024,
            upload_chunk_size: 8 * 1024,
            max_inbound_buffer: 1024 * 1024,
            expect_continue_timeout_ms: 1000,
        }
    }
}

impl IoConfig {
    pub fn expect_continue_timeout(&self) -> Duration {
        Duration::from_millis(self.expect_continue_timeout_ms)
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Default retry budget for requests that do not set their own.
    pub max_retries: u32,

    /// Base delay for exponential backoff before a resend, in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay_ms: 50,
            max_delay_ms: 1000,
        }
    }
}

/// Redirect configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedirectConfig {
    /// Default redirect budget for requests that do not set their own.
    pub max_redirects: u32,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self { max_redirects: 10 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
