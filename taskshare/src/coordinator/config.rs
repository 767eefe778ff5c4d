//! Coordinator configuration.

use crate::errors::CoordinatorError;
use crate::progress::MIRROR_TOTAL_UNIT_COUNT;
use serde::{Deserialize, Serialize};

/// Default coordinator name used in log output.
pub const DEFAULT_COORDINATOR_NAME: &str = "tasks";

/// Configuration for a [`TaskCoordinator`](super::TaskCoordinator).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Name attached to every log event, e.g. the kind of resource shared.
    pub name: String,
    /// Total unit count of each child view's mirrored progress.
    pub mirror_total_unit_count: i64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_COORDINATOR_NAME.to_string(),
            mirror_total_unit_count: MIRROR_TOTAL_UNIT_COUNT,
        }
    }
}

impl CoordinatorConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the coordinator name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the mirrored progress granularity.
    #[must_use]
    pub fn with_mirror_total_unit_count(mut self, total: i64) -> Self {
        self.mirror_total_unit_count = total;
        self
    }

    /// Checks the configuration for values the coordinator cannot use.
    pub fn validate(&self) -> Result<(), CoordinatorError> {
        if self.name.trim().is_empty() {
            return Err(CoordinatorError::InvalidConfig(
                "name must not be empty".to_string(),
            ));
        }
        if self.mirror_total_unit_count <= 0 {
            return Err(CoordinatorError::InvalidConfig(format!(
                "mirror_total_unit_count must be positive, got {}",
                self.mirror_total_unit_count
            )));
        }
        Ok(())
    }
}
