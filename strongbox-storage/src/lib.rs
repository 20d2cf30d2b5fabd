//! Local encrypted cache for Strongbox.
//!
//! Persists encrypted records, the pending-sync queue, the activity log,
//! the device registry, and a small per-user key/value meta store in
//! DuckDB. The cache never sees plaintext: record payloads arrive already
//! sealed, and only ids, type tags, parent references, timestamps, and the
//! soft-delete marker are stored in clear so they can be queried.
//!
//! # Layout
//!
//! - [`LocalCache`] owns the database connection.
//! - [`UserCache`] is a cheap, cloneable view of one user's partition.
//!   Every table is keyed by `user_id`, so users never see each other's
//!   rows.

mod activity;
mod cache;
mod error;
mod meta;
mod queue;
mod records;
mod schema;

pub use cache::{CacheOptions, LocalCache, UserCache};
pub use error::{StorageError, StorageResult};
pub use meta::MetaKey;
pub use queue::{EnqueueDisposition, EnqueueOutcome};
