//! Vault configuration.

use crate::error::{VaultError, VaultResult};
use serde::{Deserialize, Serialize};
use strongbox_crypto::KdfParams;
use strongbox_sync::{RemoteConfig, SyncConfig};

/// Unlock attempt throttling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Failures within the window that trigger a lockout.
    pub max_failed_attempts: u32,

    /// Rolling window length in seconds.
    pub window_secs: i64,

    /// First lockout duration in seconds; doubles per consecutive lockout.
    pub base_lockout_secs: i64,

    /// Cap on the doubling exponent.
    pub max_backoff_exponent: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            window_secs: 15 * 60,
            base_lockout_secs: 60,
            max_backoff_exponent: 10,
        }
    }
}

/// Remote-channel session lifetime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub duration_secs: i64,

    /// Rotate when less than this much lifetime remains.
    pub refresh_threshold_secs: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_secs: 60 * 60,
            refresh_threshold_secs: 5 * 60,
        }
    }
}

/// Everything a [`VaultService`](crate::VaultService) needs to know.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub kdf: KdfParams,
    pub rate_limit: RateLimitConfig,
    pub session: SessionConfig,
    pub sync: SyncConfig,
    pub remote: RemoteConfig,
    /// Default auto-lock timeout for new vaults. `0` disables auto-lock.
    pub auto_lock_minutes: Option<u32>,
}

impl VaultConfig {
    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> VaultResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| VaultError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_auto_lock_minutes(&self) -> u32 {
        self.auto_lock_minutes.unwrap_or(5)
    }

    pub fn validate(&self) -> VaultResult<()> {
        let rl = &self.rate_limit;
        if rl.max_failed_attempts == 0 {
            return Err(VaultError::Config("max_failed_attempts must be at least 1".into()));
        }
        if rl.window_secs <= 0 || rl.base_lockout_secs <= 0 {
            return Err(VaultError::Config(
                "rate limit window and lockout must be positive".into(),
            ));
        }
        if rl.max_backoff_exponent > 20 {
            return Err(VaultError::Config("max_backoff_exponent must be at most 20".into()));
        }

        let s = &self.session;
        if s.duration_secs <= 0 {
            return Err(VaultError::Config("session duration must be positive".into()));
        }
        if s.refresh_threshold_secs < 0 || s.refresh_threshold_secs >= s.duration_secs {
            return Err(VaultError::Config(format!(
                "refresh threshold ({}s) must be below session duration ({}s)",
                s.refresh_threshold_secs, s.duration_secs
            )));
        }

        if self.sync.max_attempts == 0 {
            return Err(VaultError::Config("sync max_attempts must be at least 1".into()));
        }
        if self.remote.base_url.is_empty() {
            return Err(VaultError::Config("remote base_url is empty".into()));
        }
        Ok(())
    }
}
