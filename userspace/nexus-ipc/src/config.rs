// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Resource limits for the IPC core
//! OWNERS: @runtime
//! STATUS: Functional
//!
//! Limits are loaded from TOML; every field falls back to its default when absent.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Errors produced while loading a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// The TOML text did not parse.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value was rejected by validation.
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },
}

/// Limits enforced by [`crate::Core`].
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Maximum number of live handles.
    pub max_handle_table_size: usize,
    /// Maximum number of live shared-buffer mappings.
    pub max_mapping_table_size: usize,
    /// Maximum number of handles accepted by `wait_many`.
    pub max_wait_many_num_handles: usize,
    /// Maximum message payload in bytes.
    pub max_message_num_bytes: usize,
    /// Maximum number of handles attached to one message.
    pub max_message_num_handles: usize,
    /// Maximum data-pipe capacity in bytes.
    pub max_data_pipe_capacity_bytes: usize,
    /// Capacity used when a data pipe is created without one.
    pub default_data_pipe_capacity_bytes: usize,
    /// Maximum size of a single shared buffer.
    pub max_shared_memory_num_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_handle_table_size: 1_000_000,
            max_mapping_table_size: 1_000_000,
            max_wait_many_num_handles: 1_000_000,
            max_message_num_bytes: 4 * 1024 * 1024,
            max_message_num_handles: 10_000,
            max_data_pipe_capacity_bytes: 256 * 1024 * 1024,
            default_data_pipe_capacity_bytes: 1024 * 1024,
            max_shared_memory_num_bytes: 1024 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("max_handle_table_size", self.max_handle_table_size),
            ("max_mapping_table_size", self.max_mapping_table_size),
            ("max_wait_many_num_handles", self.max_wait_many_num_handles),
            ("max_message_num_bytes", self.max_message_num_bytes),
            ("max_data_pipe_capacity_bytes", self.max_data_pipe_capacity_bytes),
            ("default_data_pipe_capacity_bytes", self.default_data_pipe_capacity_bytes),
            ("max_shared_memory_num_bytes", self.max_shared_memory_num_bytes),
        ];
        for (field, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::Invalid { field, reason: "must be non-zero" });
            }
        }
        if self.default_data_pipe_capacity_bytes > self.max_data_pipe_capacity_bytes {
            return Err(ConfigError::Invalid {
                field: "default_data_pipe_capacity_bytes",
                reason: "exceeds max_data_pipe_capacity_bytes",
            });
        }
        Ok(())
    }
}
