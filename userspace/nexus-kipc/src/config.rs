// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Registry limits and heuristic thresholds
//!
//! Loaded from TOML; every field has a default so an empty document is valid.
//!
//! ```toml
//! max_queues = 64
//! default_timeout_ms = 5000
//! deadlock_threshold = 90
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Upper bound for any single slot table; allocation scans linearly.
pub const MAX_TABLE_CAPACITY: usize = 4096;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the file failed.
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    /// The document is not valid TOML for [`IpcConfig`].
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    /// A field holds a value outside its accepted range.
    #[error("invalid config field `{field}`: {reason}")]
    Invalid {
        /// Offending field name.
        field: &'static str,
        /// Human readable constraint.
        reason: &'static str,
    },
}

/// Capacities, ceilings and thresholds for one [`crate::Registry`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IpcConfig {
    /// Message queue table size.
    pub max_queues: usize,
    /// Shared-memory segment table size.
    pub max_segments: usize,
    /// Semaphore table size.
    pub max_semaphores: usize,
    /// Pipe end table size (each pipe takes two slots).
    pub max_pipes: usize,
    /// Largest accepted message payload in bytes.
    pub max_message_size: usize,
    /// Pending messages per queue before `send` reports `QueueFull`.
    pub max_queue_messages: usize,
    /// Largest accepted segment in bytes.
    pub max_segment_size: usize,
    /// Bound applied to `Wait::Blocking`.
    pub default_timeout_ms: u64,
    /// Default semaphore maximum.
    pub sem_max_value: u32,
    /// Risk score above which a semaphore wait is refused.
    pub deadlock_threshold: u8,
    /// Smallest pipe buffer chosen by the sizing heuristic.
    pub pipe_min_capacity: usize,
    /// Pipe buffer used when no working-set hint is given.
    pub pipe_default_capacity: usize,
    /// Largest pipe buffer, for both the heuristic and explicit resizes.
    pub pipe_max_capacity: usize,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            max_queues: 256,
            max_segments: 128,
            max_semaphores: 256,
            max_pipes: 256,
            max_message_size: 8192,
            max_queue_messages: 1024,
            max_segment_size: 16 * 1024 * 1024,
            default_timeout_ms: 60_000,
            sem_max_value: 32_767,
            deadlock_threshold: 80,
            pipe_min_capacity: 4096,
            pipe_default_capacity: 64 * 1024,
            pipe_max_capacity: 1024 * 1024,
        }
    }
}

impl IpcConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Bound applied to `Wait::Blocking`.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Checks every field against its accepted range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let tables = [
            ("max_queues", self.max_queues),
            ("max_segments", self.max_segments),
            ("max_semaphores", self.max_semaphores),
            ("max_pipes", self.max_pipes),
        ];
        for (field, value) in tables {
            if value == 0 || value > MAX_TABLE_CAPACITY {
                return Err(ConfigError::Invalid { field, reason: "must be within 1..=4096" });
            }
        }
        if self.max_pipes < 2 {
            return Err(ConfigError::Invalid { field: "max_pipes", reason: "a pipe needs two slots" });
        }
        let sizes = [
            ("max_message_size", self.max_message_size),
            ("max_queue_messages", self.max_queue_messages),
            ("max_segment_size", self.max_segment_size),
            ("pipe_min_capacity", self.pipe_min_capacity),
        ];
        for (field, value) in sizes {
            if value == 0 {
                return Err(ConfigError::Invalid { field, reason: "must be non-zero" });
            }
        }
        if self.default_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "default_timeout_ms",
                reason: "must be non-zero",
            });
        }
        if self.sem_max_value == 0 || self.sem_max_value > i32::MAX as u32 {
            return Err(ConfigError::Invalid {
                field: "sem_max_value",
                reason: "must be within 1..=i32::MAX",
            });
        }
        if self.deadlock_threshold > 100 {
            return Err(ConfigError::Invalid {
                field: "deadlock_threshold",
                reason: "risk scores live in 0..=100",
            });
        }
        if self.pipe_min_capacity > self.pipe_default_capacity
            || self.pipe_default_capacity > self.pipe_max_capacity
        {
            return Err(ConfigError::Invalid {
                field: "pipe_default_capacity",
                reason: "must satisfy min <= default <= max",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        IpcConfig::default().validate().unwrap();
    }

    #[test]
    fn empty_document_yields_defaults() {
        assert_eq!(IpcConfig::from_toml_str("").unwrap(), IpcConfig::default());
    }

    #[test]
    fn partial_document_overrides_fields() {
        let config = IpcConfig::from_toml_str("max_queues = 4\ndeadlock_threshold = 95\n").unwrap();
        assert_eq!(config.max_queues, 4);
        assert_eq!(config.deadlock_threshold, 95);
        assert_eq!(config.max_message_size, 8192);
    }

    #[test]
    fn unknown_fields_rejected() {
        let err = IpcConfig::from_toml_str("max_queus = 4\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn oversized_table_rejected() {
        let err = IpcConfig::from_toml_str("max_semaphores = 5000\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "max_semaphores", .. }));
    }

    #[test]
    fn pipe_capacity_ordering_enforced() {
        let err = IpcConfig::from_toml_str("pipe_default_capacity = 1024\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "pipe_default_capacity", .. }));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_pipes = 8").unwrap();
        writeln!(file, "default_timeout_ms = 250").unwrap();
        let config = IpcConfig::from_path(file.path()).unwrap();
        assert_eq!(config.max_pipes, 8);
        assert_eq!(config.default_timeout(), Duration::from_millis(250));
    }
}
