// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TOML configuration for all coordination primitives
//!
//! ```toml
//! [lock]
//! timeout = "30s"
//! retry_interval = "1s"
//! heartbeat_interval = "5s"
//!
//! [election]
//! election_timeout = "15s"
//! jitter = "5s"
//!
//! [semaphore]
//! default_max_permits = 4
//!
//! [semaphore.permits]
//! gpu = 2
//! ```
//!
//! Every section and field is optional; omitted values take their defaults.

use crate::election::ElectionConfig;
use crate::error::ConfigError;
use crate::lock::LockConfig;
use crate::semaphore::SemaphoreConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Combined configuration, one section per primitive
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinationConfig {
    pub lock: LockConfig,
    pub election: ElectionConfig,
    pub semaphore: SemaphoreConfig,
}

impl CoordinationConfig {
    /// Parse and validate TOML content
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded coordination config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.lock.validate()?;
        self.election.validate()?;
        self.semaphore.validate()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
