//! Core types shared across the Strongbox crates.
//!
//! - [`EncryptedRecord`]: the only shape a vault, item, or category takes
//!   once it leaves memory. Ids, type tags, parent references, and the
//!   soft-delete marker stay in clear for indexing; everything else is
//!   an opaque ciphertext blob.
//! - [`Entity`]: the decrypted, schema-checked form of a record.
//! - [`SyncQueueEntry`]: one unacknowledged mutation waiting for the remote.
//! - [`Clock`]: injectable time source so lockouts, sessions, and
//!   auto-lock can be tested deterministically.

mod activity;
mod clock;
mod entity;
mod record;
mod sync;

pub use activity::{ActivityAction, ActivityEntry, DeviceInfo, UnlockMethod};
pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::{
    Category, Entity, Item, ItemKind, ItemPayload, SchemaError, Vault, new_entity_id,
};
pub use record::{EncryptedRecord, EntityType, RecordFilter};
pub use sync::{NewQueueEntry, QueueState, SyncAction, SyncQueueEntry};
