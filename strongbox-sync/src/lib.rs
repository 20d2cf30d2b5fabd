//! Sync reconciliation for Strongbox.
//!
//! Provides optimistic, offline-first writes against a remote store:
//! - In-memory state updated before any I/O
//! - Encrypt-then-cache through [`RecordCodec`]
//! - A persistent, coalescing pending-sync queue replayed in order
//! - Authoritative cache rebuilds that never drop unsynced local writes
//! - HTTP and in-memory [`RemoteStore`] backends

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod memory_remote;
pub mod remote;
pub mod state;

pub use codec::RecordCodec;
pub use config::{RemoteConfig, SyncConfig};
pub use engine::{
    IntegrityAlert, Loaded, Mutation, MutationOutcome, MutationStatus, QueueReason,
    RejectedEntry, ReplayReport, Reservation, Staged, SyncEngine, Ticket,
};
pub use error::{SyncError, SyncResult};
pub use http::HttpRemoteStore;
pub use memory_remote::{InMemoryRemote, RemoteCalls};
pub use remote::{RemoteError, RemoteResult, RemoteStore};
pub use state::MemoryState;
