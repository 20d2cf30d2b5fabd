//! Inactivity auto-lock bookkeeping.

use crate::error::VaultResult;
use std::sync::Arc;
use strongbox_storage::{MetaKey, UserCache};
use strongbox_types::Clock;

pub struct AutoLock {
    cache: UserCache,
    clock: Arc<dyn Clock>,
    default_minutes: u32,
}

impl AutoLock {
    pub fn new(cache: UserCache, clock: Arc<dyn Clock>, default_minutes: u32) -> Self {
        Self {
            cache,
            clock,
            default_minutes,
        }
    }

    /// Records user activity now.
    pub fn touch(&self) -> VaultResult<()> {
        self.cache
            .put_meta_json(MetaKey::LastActivity, &self.clock.now_millis())?;
        Ok(())
    }

    pub fn last_activity(&self) -> VaultResult<Option<i64>> {
        Ok(self.cache.get_meta_json(MetaKey::LastActivity)?)
    }

    /// Configured timeout; `0` means never.
    pub fn minutes(&self) -> VaultResult<u32> {
        Ok(self
            .cache
            .get_meta_json(MetaKey::AutoLockMinutes)?
            .unwrap_or(self.default_minutes))
    }

    pub fn set_minutes(&self, minutes: u32) -> VaultResult<()> {
        self.cache.put_meta_json(MetaKey::AutoLockMinutes, &minutes)?;
        Ok(())
    }

    /// Whether the inactivity timeout has elapsed.
    pub fn is_expired(&self) -> VaultResult<bool> {
        let minutes = self.minutes()?;
        if minutes == 0 {
            return Ok(false);
        }
        Ok(match self.last_activity()? {
            Some(last) => self.clock.now_millis() - last >= i64::from(minutes) * 60_000,
            None => false,
        })
    }
}
