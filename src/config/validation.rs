//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sizes ordered, limits > 0)
//! - Validate host patterns
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: TransportConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::{TransportConfig, DEFAULT_HOST_PATTERN};

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("buffers.{field} must be greater than zero")]
    ZeroBufferSetting { field: &'static str },

    #[error("buffers.min_buffer_size ({min}) exceeds buffers.max_buffer_size ({max})")]
    BufferBoundsInverted { min: usize, max: usize },

    #[error("hosts.{pattern}.{field} must be greater than zero")]
    ZeroHostSetting { pattern: String, field: &'static str },

    #[error("invalid host pattern {0:?}")]
    InvalidHostPattern(String),

    #[error("io.{field} must be greater than zero")]
    ZeroIoSetting { field: &'static str },

    #[error("retries.base_delay_ms ({base}) exceeds retries.max_delay_ms ({max})")]
    BackoffInverted { base: u64, max: u64 },
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &TransportConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let buffers = &config.buffers;
    if buffers.min_buffer_size == 0 {
        errors.push(ValidationError::ZeroBufferSetting { field: "min_buffer_size" });
    }
    if buffers.maintenance_interval_secs == 0 {
        errors.push(ValidationError::ZeroBufferSetting { field: "maintenance_interval_secs" });
    }
    if buffers.min_buffer_size > buffers.max_buffer_size {
        errors.push(ValidationError::BufferBoundsInverted {
            min: buffers.min_buffer_size,
            max: buffers.max_buffer_size,
        });
    }

    for (pattern, settings) in &config.hosts {
        if !is_valid_pattern(pattern) {
            errors.push(ValidationError::InvalidHostPattern(pattern.clone()));
        }
        let zero_fields = [
            ("max_connections_per_host", settings.max_connections_per_host == 0),
            ("max_assigned_requests", settings.max_assigned_requests == 0),
            ("connect_timeout_secs", settings.connect_timeout_secs == 0),
            ("request_timeout_secs", settings.request_timeout_secs == 0),
            ("idle_check_interval_ms", settings.idle_check_interval_ms == 0),
        ];
        for (field, is_zero) in zero_fields {
            if is_zero {
                errors.push(ValidationError::ZeroHostSetting {
                    pattern: pattern.clone(),
                    field,
                });
            }
        }
    }

    let io = &config.io;
    for (field, value) in [
        ("read_buffer_size", io.read_buffer_size),
        ("write_buffer_size", io.write_buffer_size),
        ("upload_chunk_size", io.upload_chunk_size),
        ("max_inbound_buffer", io.max_inbound_buffer),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroIoSetting { field });
        }
    }

    if config.retries.base_delay_ms > config.retries.max_delay_ms {
        errors.push(ValidationError::BackoffInverted {
            base: config.retries.base_delay_ms,
            max: config.retries.max_delay_ms,
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_valid_pattern(pattern: &str) -> bool {
    if pattern == DEFAULT_HOST_PATTERN {
        return true;
    }
    !pattern.is_empty()
        && pattern.split('.').all(|label| {
            !label.is_empty()
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        })
}
