//! Shared helpers for sync engine tests.
#![allow(dead_code)]

use std::sync::Arc;
use strongbox_crypto::{DerivedKey, IntegrityChecker, generate_random_key};
use strongbox_storage::{CacheOptions, LocalCache};
use strongbox_sync::{
    InMemoryRemote, Loaded, Mutation, MutationOutcome, RecordCodec, SyncConfig, SyncEngine,
    SyncResult,
};
use strongbox_types::{Clock, Entity, EntityType, Item, ItemPayload, ManualClock, Vault};
use tracing_subscriber::EnvFilter;

pub const USER_ID: &str = "user-1";
pub const TOKEN: &str = "session-token";

/// Routes engine logs through the test harness. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// An unlocked session wired to an in-memory remote and cache.
pub struct Harness {
    pub key: DerivedKey,
    pub integrity: IntegrityChecker,
    pub clock: Arc<ManualClock>,
    pub remote: Arc<InMemoryRemote>,
    pub engine: SyncEngine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(CacheOptions::default())
    }

    pub fn with_options(options: CacheOptions) -> Self {
        init_tracing();
        let key = generate_random_key();
        let mut integrity = IntegrityChecker::new();
        integrity.initialize(&key).expect("integrity init");

        let clock = Arc::new(ManualClock::starting_now());
        let remote = Arc::new(InMemoryRemote::with_clock(clock.clone() as Arc<dyn Clock>));
        let cache = LocalCache::open_in_memory_with(options)
            .expect("open cache")
            .for_user(USER_ID);
        let config = SyncConfig {
            max_attempts: 3,
            backoff_base_ms: 1,
        };
        let engine = SyncEngine::new(
            cache,
            remote.clone(),
            clock.clone() as Arc<dyn Clock>,
            config,
            "device-test",
        );
        Self {
            key,
            integrity,
            clock,
            remote,
            engine,
        }
    }

    pub fn codec(&self) -> RecordCodec<'_> {
        RecordCodec::new(&self.key, &self.integrity, USER_ID)
    }

    /// Runs one mutation through begin, stage, and propagate.
    pub async fn mutate(&self, mutation: Mutation, token: Option<&str>) -> SyncResult<MutationOutcome> {
        let ticket = self.engine.begin(mutation).await;
        let staged = self.engine.stage(ticket, &self.codec())?;
        self.engine.propagate(staged, token).await
    }

    pub async fn create(&self, entity: Entity) -> MutationOutcome {
        self.mutate(Mutation::Create(entity), Some(TOKEN))
            .await
            .expect("create")
    }

    pub async fn read(&self, entity_type: EntityType, token: Option<&str>) -> Loaded {
        let snapshot = self
            .engine
            .fetch_authoritative(entity_type, token)
            .await
            .expect("fetch");
        self.engine
            .rebuild_and_read(entity_type, snapshot, &self.codec())
            .expect("read")
    }
}

pub fn login(name: &str) -> Item {
    Item::new(
        "vault-1",
        name,
        ItemPayload::Login {
            username: "ada@example.com".into(),
            password: "correct horse".into(),
            urls: vec!["https://example.com".into()],
            totp_secret: None,
        },
    )
}

pub fn vault(name: &str) -> Entity {
    Entity::Vault(Vault::new(name))
}

pub fn item_name(entity: &Entity) -> &str {
    match entity {
        Entity::Item(item) => &item.name,
        other => panic!("expected item, got {other:?}"),
    }
}

pub fn renamed(mut item: Item, name: &str) -> Item {
    item.name = name.into();
    item
}
