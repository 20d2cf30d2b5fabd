//! Remote-channel session tokens.
//!
//! Tokens authenticate calls to the remote store and nothing else: the
//! local cache is gated solely by the master key. A session is created on
//! unlock, destroyed on lock and logout, and rotated when its remaining
//! lifetime drops below the refresh threshold. The refresh token survives
//! rotations; the access token is replaced each time.

use crate::config::SessionConfig;
use crate::error::{VaultError, VaultResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use strongbox_crypto::hashed_random_token;
use strongbox_storage::{MetaKey, UserCache};
use strongbox_types::Clock;
use tracing::{debug, info};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    pub token: String,
    pub refresh_token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("token", &"[redacted]")
            .field("refresh_token", &"[redacted]")
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Non-secret view of the current session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub remaining_secs: i64,
    pub is_valid: bool,
    pub needs_refresh: bool,
}

pub struct SessionTokenManager {
    cache: UserCache,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    current: Mutex<Option<SessionToken>>,
}

impl SessionTokenManager {
    pub fn new(cache: UserCache, clock: Arc<dyn Clock>, config: SessionConfig) -> Self {
        Self {
            cache,
            clock,
            config,
            current: Mutex::new(None),
        }
    }

    /// Replaces any existing session with a fresh one.
    pub fn create_session(&self) -> VaultResult<SessionToken> {
        let session = self.fresh_session();
        self.store(session.clone())?;
        info!(user_id = %self.cache.user_id(), expires_at = %session.expires_at, "session created");
        Ok(session)
    }

    /// Creates a session only if `still_unlocked` holds. The check and the
    /// store run under the slot lock, so an invalidation that follows a
    /// lock always sees the new session.
    pub fn create_session_if(
        &self,
        still_unlocked: impl FnOnce() -> bool,
    ) -> VaultResult<Option<SessionToken>> {
        let mut slot = self.slot();
        if !still_unlocked() {
            debug!("vault locked before a session could be created");
            return Ok(None);
        }
        let session = self.fresh_session();
        self.cache.put_meta_json(MetaKey::Session, &session)?;
        *slot = Some(session.clone());
        info!(user_id = %self.cache.user_id(), expires_at = %session.expires_at, "session created");
        Ok(Some(session))
    }

    fn fresh_session(&self) -> SessionToken {
        let now = self.clock.now();
        SessionToken {
            token: hashed_random_token(),
            refresh_token: hashed_random_token(),
            created_at: now,
            expires_at: now + Duration::seconds(self.config.duration_secs),
        }
    }

    pub fn is_session_valid(&self) -> bool {
        let now = self.clock.now();
        self.slot().as_ref().is_some_and(|s| now < s.expires_at)
    }

    /// Whether remaining lifetime is under the refresh threshold. Always
    /// true for an expired session, false when there is none.
    pub fn needs_refresh(&self) -> bool {
        let now = self.clock.now();
        self.slot().as_ref().is_some_and(|s| {
            s.expires_at - now < Duration::seconds(self.config.refresh_threshold_secs)
        })
    }

    /// Issues a new access token under the existing refresh token.
    pub fn refresh_session(&self) -> VaultResult<SessionToken> {
        let refresh_token = self
            .slot()
            .as_ref()
            .map(|s| s.refresh_token.clone())
            .ok_or(VaultError::NoSession)?;
        let now = self.clock.now();
        let session = SessionToken {
            token: hashed_random_token(),
            refresh_token,
            created_at: now,
            expires_at: now + Duration::seconds(self.config.duration_secs),
        };
        self.store(session.clone())?;
        debug!(expires_at = %session.expires_at, "session rotated");
        Ok(session)
    }

    /// Drops the in-memory and persisted session.
    pub fn invalidate_session(&self) -> VaultResult<()> {
        let had = self.slot().take().is_some();
        let persisted = self.cache.delete_meta(MetaKey::Session)?;
        if had || persisted {
            info!(user_id = %self.cache.user_id(), "session invalidated");
        }
        Ok(())
    }

    /// A copy of the current access token for an outgoing call, rotating
    /// first if it is close to expiry. `None` without a session.
    pub fn access_token(&self) -> VaultResult<Option<String>> {
        if self.slot().is_none() {
            return Ok(None);
        }
        if self.needs_refresh() {
            return Ok(Some(self.refresh_session()?.token));
        }
        Ok(self.slot().as_ref().map(|s| s.token.clone()))
    }

    pub fn info(&self) -> Option<SessionInfo> {
        let now = self.clock.now();
        let threshold = Duration::seconds(self.config.refresh_threshold_secs);
        self.slot().as_ref().map(|s| SessionInfo {
            created_at: s.created_at,
            expires_at: s.expires_at,
            remaining_secs: (s.expires_at - now).num_seconds().max(0),
            is_valid: now < s.expires_at,
            needs_refresh: s.expires_at - now < threshold,
        })
    }

    /// The persisted copy, if any.
    pub fn persisted(&self) -> VaultResult<Option<SessionToken>> {
        Ok(self.cache.get_meta_json(MetaKey::Session)?)
    }

    fn store(&self, session: SessionToken) -> VaultResult<()> {
        self.cache.put_meta_json(MetaKey::Session, &session)?;
        *self.slot() = Some(session);
        Ok(())
    }

    fn slot(&self) -> MutexGuard<'_, Option<SessionToken>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}
