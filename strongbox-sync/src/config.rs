//! Sync and remote channel configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Queue replay behavior.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Remote calls per entry per replay pass before it is left queued.
    pub max_attempts: u32,

    /// Base backoff between attempts; doubles after each failure.
    pub backoff_base_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 500,
        }
    }
}

impl SyncConfig {
    /// Backoff before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_base_ms.saturating_mul(1 << attempt.min(16)))
    }
}

/// HTTP remote endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL for the Strongbox API (e.g., "https://api.strongbox.app").
    pub base_url: String,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.strongbox.app".to_string(),
            timeout_secs: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles() {
        let config = SyncConfig::default();
        assert_eq!(config.backoff(0), Duration::from_millis(500));
        assert_eq!(config.backoff(1), Duration::from_millis(1000));
        assert_eq!(config.backoff(2), Duration::from_millis(2000));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: SyncConfig = serde_json::from_str(r#"{"max_attempts": 5}"#).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.backoff_base_ms, 500);
    }
}
