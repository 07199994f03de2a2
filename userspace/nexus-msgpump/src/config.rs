// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Pump tunables
//! OWNERS: @runtime
//! STATUS: Functional

use std::fs;
use std::path::Path;

use nexus_ipc::ConfigError;
use serde::Deserialize;

/// Pump tunables, loadable from TOML.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PumpConfig {
    /// Upper bound on ready members dispatched per loop iteration.
    pub max_ready_per_iteration: usize,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self { max_ready_per_iteration: 16 }
    }
}

impl PumpConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: PumpConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    /// Rejects a zero batch size.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_ready_per_iteration == 0 {
            return Err(ConfigError::Invalid {
                field: "max_ready_per_iteration",
                reason: "must be non-zero",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn default_batch_is_sixteen() {
        assert_eq!(PumpConfig::default().max_ready_per_iteration, 16);
        assert_eq!(PumpConfig::from_toml_str("").unwrap(), PumpConfig::default());
    }

    #[test]
    fn rejects_zero_batch() {
        let err = PumpConfig::from_toml_str("max_ready_per_iteration = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "max_ready_per_iteration", .. }));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_ready_per_iteration = 4").unwrap();
        assert_eq!(PumpConfig::load(file.path()).unwrap().max_ready_per_iteration, 4);
    }
}
