mod support;

use chrono::Duration;
use pretty_assertions::assert_eq;
use strongbox_sync::RemoteError;
use strongbox_types::{ActivityAction, Category, EntityType, Vault};
use strongbox_vault::{MutationStatus, QueueReason, VaultError};
use support::{PIN, TestVault, USER_ID, login, note};

// ── Offline first ──

#[tokio::test]
async fn offline_create_replays_exactly_once() {
    let tv = TestVault::unlocked().await;
    let vault_id = tv.vault("Personal").await;
    assert_eq!(tv.remote.calls().creates, 1);

    assert_eq!(tv.service.set_online(false).await.unwrap(), None);
    let outcome = tv.create_login(&vault_id, "Example").await;
    assert!(matches!(
        outcome.status,
        MutationStatus::Queued {
            reason: QueueReason::Offline,
            ..
        }
    ));
    assert_eq!(tv.service.pending_sync_count().unwrap(), 1);
    assert_eq!(tv.remote.calls().creates, 1);

    // readable while offline, straight from the cache
    let offline = tv.service.load_items().await.unwrap();
    assert_eq!(offline.entries[0].name, "Example");

    let report = tv.service.set_online(true).await.unwrap().unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(tv.service.pending_sync_count().unwrap(), 0);
    assert_eq!(tv.remote.calls().creates, 2);

    // coming online again is not a transition
    assert_eq!(tv.service.set_online(true).await.unwrap(), None);
    assert_eq!(tv.remote.calls().creates, 2);

    let items = tv.service.load_items().await.unwrap();
    assert!(items.is_trusted());
    let item = &items.entries[0];
    assert_eq!(item.name, "Example");
    let confirmed = tv.remote.record(EntityType::Item, &item.id).unwrap();
    assert_eq!(item.updated_at, confirmed.updated_at);
}

#[tokio::test]
async fn offline_edits_coalesce() {
    let tv = TestVault::unlocked().await;
    let vault_id = tv.vault("Personal").await;
    tv.service.set_online(false).await.unwrap();

    let created = tv.create_login(&vault_id, "v1").await;
    let mut item = tv.service.get_item(created.entity.id()).unwrap();
    for name in ["v2", "v3"] {
        item.name = name.into();
        tv.service.update_item(item.clone()).await.unwrap();
    }
    assert_eq!(tv.service.pending_sync_count().unwrap(), 1);

    tv.service.set_online(true).await.unwrap();
    let calls = tv.remote.calls();
    assert_eq!(calls.creates, 2);
    assert_eq!(calls.updates, 0);
    assert_eq!(tv.service.load_items().await.unwrap().entries[0].name, "v3");
}

#[tokio::test]
async fn read_replays_pending_writes_first() {
    let tv = TestVault::unlocked().await;
    let vault_id = tv.vault("Personal").await;
    tv.remote.fail_next(RemoteError::Transient("503".into()));

    let outcome = tv.create_login(&vault_id, "Flaky").await;
    assert!(matches!(
        outcome.status,
        MutationStatus::Queued {
            reason: QueueReason::RemoteUnavailable(_),
            ..
        }
    ));

    let items = tv.service.load_items().await.unwrap();
    assert_eq!(items.entries.len(), 1);
    assert_eq!(tv.service.pending_sync_count().unwrap(), 0);
    assert!(tv.remote.record(EntityType::Item, &items.entries[0].id).is_some());
}

#[tokio::test]
async fn unreachable_remote_reads_from_cache() {
    let tv = TestVault::unlocked().await;
    let vault_id = tv.vault("Personal").await;
    tv.create_login(&vault_id, "Cached").await;

    tv.remote.set_offline(true);
    let items = tv.service.load_items().await.unwrap();
    assert_eq!(items.entries.len(), 1);
    assert_eq!(items.entries[0].name, "Cached");
}

// ── Items ──

#[tokio::test]
async fn item_needs_a_live_vault_and_category() {
    let tv = TestVault::unlocked().await;
    let err = tv.service.create_item(login("missing", "Orphan")).await.unwrap_err();
    assert!(matches!(
        err,
        VaultError::NotFound {
            entity_type: EntityType::Vault,
            ..
        }
    ));

    let vault_id = tv.vault("Personal").await;
    let err = tv
        .service
        .create_item(login(&vault_id, "Filed").with_category("nope"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        VaultError::NotFound {
            entity_type: EntityType::Category,
            ..
        }
    ));
    assert!(tv.service.load_items().await.unwrap().entries.is_empty());
}

#[tokio::test]
async fn deleted_items_disappear() {
    let tv = TestVault::unlocked().await;
    let vault_id = tv.vault("Personal").await;
    let keep = tv.create_login(&vault_id, "Keep").await;
    let gone = tv.create_login(&vault_id, "Gone").await;

    tv.service.delete_item(gone.entity.id()).await.unwrap();

    let items = tv.service.load_items().await.unwrap();
    assert_eq!(items.entries.len(), 1);
    assert_eq!(items.entries[0].id, keep.entity.id());
    assert!(matches!(
        tv.service.get_item(gone.entity.id()),
        Err(VaultError::NotFound { .. })
    ));

    let mut stale = login(&vault_id, "Resurrect");
    stale.id = gone.entity.id().to_string();
    assert!(matches!(
        tv.service.update_item(stale).await,
        Err(VaultError::NotFound { .. })
    ));
    // the remote keeps a tombstone
    let record = tv.remote.record(EntityType::Item, gone.entity.id()).unwrap();
    assert!(record.is_deleted());
}

#[tokio::test]
async fn items_list_newest_first() {
    let tv = TestVault::unlocked().await;
    let vault_id = tv.vault("Personal").await;
    for name in ["first", "second", "third"] {
        tv.create_login(&vault_id, name).await;
        tv.clock.advance(Duration::seconds(1));
    }
    let names: Vec<_> = tv
        .service
        .load_items()
        .await
        .unwrap()
        .entries
        .into_iter()
        .map(|i| i.name)
        .collect();
    assert_eq!(names, ["third", "second", "first"]);
}

#[tokio::test]
async fn toggle_favorite_flips_the_flag() {
    let tv = TestVault::unlocked().await;
    let vault_id = tv.vault("Personal").await;
    let created = tv
        .service
        .create_item(note(&vault_id, "Wifi", "hunter2"))
        .await
        .unwrap();
    let id = created.entity.id().to_string();

    tv.service.toggle_favorite(&id).await.unwrap();
    assert!(tv.service.get_item(&id).unwrap().favorite);
    tv.service.toggle_favorite(&id).await.unwrap();
    assert!(!tv.service.get_item(&id).unwrap().favorite);

    assert!(matches!(
        tv.service.toggle_favorite("missing").await,
        Err(VaultError::NotFound { .. })
    ));
}

// ── Vaults and categories ──

#[tokio::test]
async fn deleting_a_vault_deletes_its_items() {
    let tv = TestVault::unlocked().await;
    let doomed = tv.vault("Work").await;
    let kept = tv.vault("Personal").await;
    tv.create_login(&doomed, "VPN").await;
    tv.create_login(&doomed, "Jira").await;
    tv.create_login(&kept, "Bank").await;

    tv.service.delete_vault(&doomed).await.unwrap();

    let items = tv.service.load_items().await.unwrap();
    assert_eq!(items.entries.len(), 1);
    assert_eq!(items.entries[0].name, "Bank");
    let vaults = tv.service.load_vaults().await.unwrap();
    assert_eq!(vaults.entries.len(), 1);
    assert_eq!(vaults.entries[0].id, kept);

    assert!(matches!(
        tv.service.delete_vault(&doomed).await,
        Err(VaultError::NotFound { .. })
    ));
}

#[tokio::test]
async fn renaming_a_vault() {
    let tv = TestVault::unlocked().await;
    let outcome = tv.service.create_vault(Vault::new("Old")).await.unwrap();
    let strongbox_types::Entity::Vault(mut vault) = outcome.entity else {
        panic!("expected a vault");
    };
    vault.name = "New".into();
    vault.description = Some("renamed".into());
    tv.service.update_vault(vault).await.unwrap();

    let vaults = tv.service.load_vaults().await.unwrap();
    assert_eq!(vaults.entries[0].name, "New");
    assert_eq!(vaults.entries[0].description.as_deref(), Some("renamed"));
}

#[tokio::test]
async fn deleting_a_category_uncategorizes_items() {
    let tv = TestVault::unlocked().await;
    let vault_id = tv.vault("Personal").await;
    let category = tv.service.create_category(Category::new("Finance")).await.unwrap();
    let category_id = category.entity.id().to_string();
    let item = tv
        .service
        .create_item(login(&vault_id, "Bank").with_category(category_id.clone()))
        .await
        .unwrap();

    let categories = tv.service.load_categories().await.unwrap();
    assert_eq!(categories.entries.len(), 1);

    tv.service.delete_category(&category_id).await.unwrap();

    assert!(tv.service.load_categories().await.unwrap().entries.is_empty());
    let item = tv.service.get_item(item.entity.id()).unwrap();
    assert_eq!(item.category_id, None);
    assert_eq!(item.name, "Bank");
}

#[tokio::test]
async fn updating_a_category() {
    let tv = TestVault::unlocked().await;
    let outcome = tv.service.create_category(Category::new("Travel")).await.unwrap();
    let strongbox_types::Entity::Category(mut category) = outcome.entity else {
        panic!("expected a category");
    };
    category.color = Some("#3366ff".into());
    tv.service.update_category(category).await.unwrap();

    let categories = tv.service.load_categories().await.unwrap();
    assert_eq!(categories.entries[0].color.as_deref(), Some("#3366ff"));
}

// ── Remote failures ──

#[tokio::test]
async fn rejected_write_is_parked_for_review() {
    let tv = TestVault::unlocked().await;
    let vault_id = tv.vault("Personal").await;
    let item = login(&vault_id, "Too big");
    tv.remote.reject_entity(item.id.clone(), 422, "payload too large");

    let seq = match tv.service.create_item(item).await {
        Err(VaultError::SyncConflictOrFailure {
            seq: Some(seq),
            message,
        }) => {
            assert!(message.contains("payload too large"));
            seq
        }
        other => panic!("expected a sync failure, got {other:?}"),
    };

    let failed = tv.service.failed_sync_entries().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].seq, seq);

    let discarded = tv.service.discard_failed(seq).unwrap();
    assert_eq!(discarded.seq, seq);
    assert!(tv.service.failed_sync_entries().unwrap().is_empty());
}

#[tokio::test]
async fn retried_entry_delivers_once_accepted() {
    let tv = TestVault::unlocked().await;
    let vault_id = tv.vault("Personal").await;
    let item = login(&vault_id, "Eventually");
    let id = item.id.clone();
    tv.remote.reject_entity(id.clone(), 422, "not yet");
    let Err(VaultError::SyncConflictOrFailure { seq: Some(seq), .. }) =
        tv.service.create_item(item).await
    else {
        panic!("expected rejection");
    };

    tv.remote.accept_entity(&id);
    tv.service.retry_failed(seq).unwrap();
    let report = tv.service.replay_pending().await.unwrap();
    assert_eq!(report.delivered, 1);
    assert!(tv.remote.record(EntityType::Item, &id).is_some());
}

#[tokio::test]
async fn tampered_record_is_withheld_with_an_alert() {
    let tv = TestVault::unlocked().await;
    let vault_id = tv.vault("Personal").await;
    let good = tv.create_login(&vault_id, "Good").await;
    let bad = tv.create_login(&vault_id, "Bad").await;

    let mut record = tv.remote.record(EntityType::Item, bad.entity.id()).unwrap();
    let last = record.ciphertext.len() - 1;
    record.ciphertext[last] ^= 0x01;
    tv.remote.seed(record);

    let items = tv.service.load_items().await.unwrap();
    assert_eq!(items.entries.len(), 1);
    assert_eq!(items.entries[0].id, good.entity.id());
    assert_eq!(items.alerts.len(), 1);
    assert_eq!(items.alerts[0].entity_id, bad.entity.id());

    let alerts = tv
        .service
        .activity_log(20)
        .unwrap()
        .into_iter()
        .filter(|e| e.action == ActivityAction::IntegrityAlert)
        .count();
    assert_eq!(alerts, 1);
}

// ── Locking, sessions, auto-lock ──

#[tokio::test]
async fn locked_vault_refuses_work_and_reloads_after_unlock() {
    let tv = TestVault::unlocked().await;
    let vault_id = tv.vault("Personal").await;
    tv.create_login(&vault_id, "Bank").await;

    tv.service.lock().unwrap();
    assert!(matches!(
        tv.service.create_item(login(&vault_id, "Nope")).await,
        Err(VaultError::NotUnlocked)
    ));
    assert!(matches!(tv.service.load_items().await, Err(VaultError::NotUnlocked)));
    assert!(tv.service.get_session_info().is_none());
    assert!(matches!(
        tv.service.replay_pending().await,
        Err(VaultError::NoSession)
    ));

    tv.service.unlock_with_pin(PIN).await.unwrap();
    let items = tv.service.load_items().await.unwrap();
    assert_eq!(items.entries[0].name, "Bank");
}

#[tokio::test]
async fn session_rotates_before_expiry() {
    let tv = TestVault::unlocked().await;
    tv.service.set_auto_lock_minutes(0).unwrap();

    let info = tv.service.get_session_info().unwrap();
    assert!(info.is_valid);
    assert!(!info.needs_refresh);
    assert_eq!(info.remaining_secs, 3600);

    tv.service.load_vaults().await.unwrap();
    tv.clock.advance(Duration::minutes(56));
    assert!(tv.service.get_session_info().unwrap().needs_refresh);

    tv.service.load_vaults().await.unwrap();
    let info = tv.service.get_session_info().unwrap();
    assert!(!info.needs_refresh);
    assert_eq!(info.remaining_secs, 3600);
    assert_eq!(tv.remote.tokens_seen().len(), 2);
}

#[tokio::test]
async fn inactivity_locks_the_vault() {
    let tv = TestVault::unlocked().await;
    let vault_id = tv.vault("Personal").await;
    assert_eq!(tv.service.auto_lock_minutes().unwrap(), 5);

    tv.clock.advance(Duration::minutes(4));
    tv.create_login(&vault_id, "Active").await;
    tv.clock.advance(Duration::minutes(4));
    assert!(!tv.service.should_auto_lock().unwrap());

    tv.clock.advance(Duration::minutes(1));
    assert!(tv.service.should_auto_lock().unwrap());
    assert!(matches!(
        tv.service.load_items().await,
        Err(VaultError::NotUnlocked)
    ));
    assert!(!tv.service.is_unlocked());
    assert!(!tv.service.is_session_valid());
}

#[tokio::test]
async fn enforce_auto_lock_reports_whether_it_locked() {
    let tv = TestVault::unlocked().await;
    assert!(!tv.service.enforce_auto_lock().unwrap());
    tv.clock.advance(Duration::minutes(5));
    assert!(tv.service.enforce_auto_lock().unwrap());
    assert!(!tv.service.enforce_auto_lock().unwrap());
}

#[tokio::test]
async fn logout_forgets_biometrics_but_keeps_data() {
    let tv = TestVault::unlocked().await;
    let vault_id = tv.vault("Personal").await;
    tv.create_login(&vault_id, "Bank").await;
    assert!(tv.service.has_biometric_unlock().unwrap());

    tv.service.logout().await.unwrap();
    assert!(!tv.service.is_unlocked());
    assert!(!tv.service.has_biometric_unlock().unwrap());
    assert_eq!(
        tv.service.activity_log(1).unwrap()[0].action,
        ActivityAction::Logout
    );
    assert!(matches!(
        tv.service.unlock_with_biometric().await,
        Err(VaultError::Wrap(_))
    ));

    tv.service.set_online(false).await.unwrap();
    tv.service.unlock_with_pin(PIN).await.unwrap();
    assert_eq!(tv.service.load_items().await.unwrap().entries.len(), 1);
}

// ── Devices, activity, persistence ──

#[tokio::test]
async fn unlocking_registers_the_device() {
    let tv = TestVault::unlocked().await;
    let devices = tv.service.list_devices().unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].device_id, tv.service.device_id());
    assert_eq!(devices[0].name, "Test phone");
    assert_eq!(devices[0].platform, "ios");

    tv.service.lock().unwrap();
    tv.clock.advance(Duration::hours(1));
    tv.service.unlock_with_pin(PIN).await.unwrap();
    let again = tv.service.list_devices().unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].registered_at, devices[0].registered_at);
    assert!(again[0].last_seen_at > devices[0].last_seen_at);
}

#[tokio::test]
async fn activity_log_records_writes() {
    let tv = TestVault::unlocked().await;
    let vault_id = tv.vault("Personal").await;
    let item = tv.create_login(&vault_id, "Bank").await;

    let log = tv.service.activity_log(10).unwrap();
    assert_eq!(log[0].action, ActivityAction::EntityCreated);
    assert_eq!(log[0].entity_id.as_deref(), Some(item.entity.id()));
    assert_eq!(log.last().unwrap().action, ActivityAction::VaultSetup);
}

#[tokio::test]
async fn users_are_isolated_in_one_cache() {
    let tv = TestVault::unlocked().await;
    let vault_id = tv.vault("Personal").await;
    tv.create_login(&vault_id, "Mine").await;

    let other = tv.reopen("user-2");
    assert!(!other.is_initialized().unwrap());
    assert_ne!(other.device_id(), tv.service.device_id());
    other.setup_master_pin("135790").await.unwrap();
    other.set_online(false).await.unwrap();
    assert!(other.load_items().await.unwrap().entries.is_empty());
}

#[tokio::test]
async fn state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.duckdb");

    let device_id = {
        let tv = TestVault::at_path(&path);
        tv.service.setup_master_pin(PIN).await.unwrap();
        let vault_id = tv.vault("Personal").await;
        tv.service.set_online(false).await.unwrap();
        tv.create_login(&vault_id, "Offline note").await;
        tv.service.lock().unwrap();
        tv.service.device_id().to_string()
    };

    let tv = TestVault::at_path(&path);
    assert!(tv.service.is_initialized().unwrap());
    assert_eq!(tv.service.device_id(), device_id);
    assert!(!tv.service.is_session_valid());
    assert_eq!(tv.service.pending_sync_count().unwrap(), 1);

    tv.service.set_online(false).await.unwrap();
    tv.service.unlock_with_pin(PIN).await.unwrap();
    let items = tv.service.load_items().await.unwrap();
    assert_eq!(items.entries.len(), 1);
    assert_eq!(items.entries[0].name, "Offline note");
}

#[tokio::test]
async fn purge_keeps_recent_tombstones() {
    let tv = TestVault::unlocked().await;
    let vault_id = tv.vault("Personal").await;
    let item = tv.create_login(&vault_id, "Old").await;
    tv.service.delete_item(item.entity.id()).await.unwrap();

    assert_eq!(tv.service.purge_tombstones(Duration::days(30)).unwrap(), 0);
    tv.clock.advance(Duration::days(31));
    assert_eq!(tv.service.purge_tombstones(Duration::days(30)).unwrap(), 1);
}

#[test]
fn invalid_config_is_refused() {
    let cache = strongbox_storage::LocalCache::open_in_memory().unwrap();
    let mut config = support::config();
    config.session.refresh_threshold_secs = config.session.duration_secs;
    let platform = strongbox_vault::Platform {
        device_keys: std::sync::Arc::new(strongbox_vault::NoDeviceKeyStore),
        biometric: std::sync::Arc::new(support::DecliningPrompt),
        device: strongbox_vault::DeviceProfile::default(),
    };
    let result = strongbox_vault::VaultService::open(
        &cache,
        USER_ID,
        std::sync::Arc::new(strongbox_sync::InMemoryRemote::new()),
        platform,
        config,
    );
    assert!(matches!(result, Err(VaultError::Config(_))));
}
