//! RouteOrch configuration.
//!
//! Loaded from a YAML file (JSON also parses). Every field is optional.

use crate::error::{Result, RouteError};
use crate::types::MAX_NEXTHOPS_PER_ROUTE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteOrchConfig {
    /// Upper bound on a single backend call, in milliseconds.
    #[serde(default = "default_hardware_timeout")]
    pub hardware_timeout_ms: u64,

    /// Dispatcher priority; lower runs first.
    #[serde(default = "default_priority")]
    pub priority: i32,

    /// Next-hops per backend call.
    #[serde(default = "default_max_nexthops")]
    pub max_nexthops_per_route: usize,
}

fn default_hardware_timeout() -> u64 {
    5000
}

fn default_priority() -> i32 {
    20
}

fn default_max_nexthops() -> usize {
    MAX_NEXTHOPS_PER_ROUTE
}

impl Default for RouteOrchConfig {
    fn default() -> Self {
        Self {
            hardware_timeout_ms: default_hardware_timeout(),
            priority: default_priority(),
            max_nexthops_per_route: default_max_nexthops(),
        }
    }
}

impl RouteOrchConfig {
    /// Loads and validates a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            RouteError::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            RouteError::Config(format!("Failed to parse config file {}: {}", path.display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hardware_timeout_ms == 0 {
            return Err(RouteError::Config(
                "hardware_timeout_ms must be > 0".to_string(),
            ));
        }

        if !(1..=MAX_NEXTHOPS_PER_ROUTE).contains(&self.max_nexthops_per_route) {
            return Err(RouteError::Config(format!(
                "max_nexthops_per_route must be 1-{}",
                MAX_NEXTHOPS_PER_ROUTE
            )));
        }

        Ok(())
    }

    pub fn hardware_timeout(&self) -> Duration {
        Duration::from_millis(self.hardware_timeout_ms)
    }
}
