//! Strongbox vault: the unlock-to-lock lifecycle of a local-first,
//! zero-knowledge vault.
//!
//! [`VaultService`] is the entry point. It owns one user's master key for
//! as long as the vault is unlocked and routes every change through the
//! sync engine so that the remote store only ever sees ciphertext.
//!
//! ```text
//! unlock (PIN | biometric) ──▶ session ──▶ mutations ──▶ cache + queue ──▶ remote
//!          │                                                    ▲
//!          └── rate limiter                      replay on reconnect
//! ```

pub mod autolock;
pub mod config;
pub mod error;
pub mod keys;
pub mod logging;
pub mod platform;
pub mod rate_limit;
pub mod service;
pub mod session;

pub use autolock::AutoLock;
pub use config::{RateLimitConfig, SessionConfig, VaultConfig};
pub use error::{VaultError, VaultResult};
pub use keys::{KeyLifecycleManager, MIN_PIN_LENGTH, SetupOutcome};
pub use logging::init_logging;
pub use platform::{
    BiometricPrompt, DeviceKey, DeviceKeyStore, EphemeralDeviceKeyStore, NoDeviceKeyStore,
    PlatformError,
};
pub use rate_limit::{AttemptDecision, RateLimitState, RateLimiter};
pub use service::{DeviceProfile, Listing, Platform, VaultService};
pub use session::{SessionInfo, SessionToken, SessionTokenManager};

pub use strongbox_sync::{
    IntegrityAlert, MutationOutcome, MutationStatus, QueueReason, RejectedEntry, ReplayReport,
};
