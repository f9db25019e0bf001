//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters, gauges, histograms via `metrics`)
//!
//! Consumers:
//!     → stdout subscriber (EnvFilter-controlled)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Structured fields instead of formatted messages
//! - Request and connection IDs are attached to every cycle's log events
//! - Metrics are cheap (atomic increments) and safe to call without an exporter

pub mod logging;
pub mod metrics;
