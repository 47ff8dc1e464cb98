use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{CoreError, DEFAULT_MIN_DISPLAY_MS, DEFAULT_RETRY_STAGGER_MS, intake::IntakePolicy};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Minimum time a transfer stays visibly in flight before flipping to Success.
    pub min_display_ms: u64,
    /// Delay added per item when retrying all failed items.
    pub retry_stagger_ms: u64,
    pub intake: IntakePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_display_ms: DEFAULT_MIN_DISPLAY_MS,
            retry_stagger_ms: DEFAULT_RETRY_STAGGER_MS,
            intake: IntakePolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_json(data: &str) -> Result<Self, CoreError> {
        serde_json::from_str(data).map_err(|err| CoreError::Config(err.to_string()))
    }

    pub fn min_display(&self) -> Duration {
        Duration::from_millis(self.min_display_ms)
    }

    pub fn retry_stagger(&self) -> Duration {
        Duration::from_millis(self.retry_stagger_ms)
    }
}
