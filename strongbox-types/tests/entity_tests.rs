use pretty_assertions::assert_eq;
use strongbox_types::{
    Category, EncryptedRecord, Entity, EntityType, Item, ItemKind, ItemPayload, SchemaError,
    Vault,
};

fn login() -> ItemPayload {
    ItemPayload::Login {
        username: "ada".into(),
        password: "correct horse".into(),
        urls: vec!["https://example.com".into()],
        totp_secret: None,
    }
}

fn record_for(entity: &Entity, plaintext_tag: &str) -> EncryptedRecord {
    EncryptedRecord {
        id: entity.id().to_string(),
        entity_type: entity.entity_type(),
        type_tag: plaintext_tag.to_string(),
        vault_id: entity.vault_id().map(str::to_string),
        category_id: entity.category_id().map(str::to_string),
        ciphertext: Vec::new(),
        integrity_tag: String::new(),
        created_at: 10,
        updated_at: 20,
        deleted_at: None,
    }
}

// ── Sealing and opening ─────────────────────────────────────────

#[test]
fn item_survives_seal_and_open() {
    let mut item = Item::new("vault-1", "Example", login())
        .with_category("cat-1")
        .with_notes("work account");
    item.favorite = true;
    let entity = Entity::from(item.clone());

    let sealed = entity.sealed_json().unwrap();
    let record = record_for(&entity, "login");
    let opened = Entity::open(&record, &sealed).unwrap();

    item.created_at = 10;
    item.updated_at = 20;
    assert_eq!(opened, Entity::Item(item));
}

#[test]
fn sealed_item_json_omits_cleartext_metadata() {
    let entity = Entity::from(Item::new("vault-1", "Example", login()));
    let sealed: serde_json::Value = serde_json::from_slice(&entity.sealed_json().unwrap()).unwrap();

    assert!(sealed.get("vault_id").is_none());
    assert!(sealed.get("id").is_none());
    assert_eq!(sealed["payload"]["kind"], "login");
}

#[test]
fn vault_and_category_round_trip() {
    let vault = Entity::from(Vault::new("Personal"));
    let opened = Entity::open(&record_for(&vault, "vault"), &vault.sealed_json().unwrap()).unwrap();
    assert!(matches!(opened, Entity::Vault(ref v) if v.name == "Personal"));

    let category = Entity::from(Category::new("Banking"));
    let opened =
        Entity::open(&record_for(&category, "category"), &category.sealed_json().unwrap())
            .unwrap();
    assert_eq!(opened.entity_type(), EntityType::Category);
}

// ── Schema validation ───────────────────────────────────────────

#[test]
fn item_tag_must_match_payload_kind() {
    let entity = Entity::from(Item::new("vault-1", "Example", login()));
    let record = record_for(&entity, "card");

    let err = Entity::open(&record, &entity.sealed_json().unwrap()).unwrap_err();
    assert!(matches!(err, SchemaError::TagMismatch { .. }));
}

#[test]
fn unknown_item_kind_is_rejected() {
    let entity = Entity::from(Item::new("vault-1", "Example", login()));
    let record = record_for(&entity, "crypto_wallet");

    let err = Entity::open(&record, &entity.sealed_json().unwrap()).unwrap_err();
    assert!(matches!(err, SchemaError::UnknownKind(k) if k == "crypto_wallet"));
}

#[test]
fn item_without_vault_reference_is_rejected() {
    let entity = Entity::from(Item::new("vault-1", "Example", login()));
    let mut record = record_for(&entity, "login");
    record.vault_id = None;

    let err = Entity::open(&record, &entity.sealed_json().unwrap()).unwrap_err();
    assert!(matches!(err, SchemaError::MissingVault(_)));
}

#[test]
fn garbage_payload_is_malformed() {
    let entity = Entity::from(Vault::new("Personal"));
    let err = Entity::open(&record_for(&entity, "vault"), b"{\"nope\": 1}").unwrap_err();
    assert!(matches!(err, SchemaError::Malformed { entity_type: EntityType::Vault, .. }));
}

// ── Metadata helpers ────────────────────────────────────────────

#[test]
fn touch_sets_created_once() {
    let mut entity = Entity::from(Vault::new("Personal"));
    entity.touch(100);
    entity.touch(200);
    assert_eq!(entity.created_at(), 100);
    assert_eq!(entity.updated_at(), 200);
}

#[test]
fn item_kind_tags() {
    assert_eq!(ItemKind::SecureNote.as_str(), "secure_note");
    assert_eq!("identity".parse::<ItemKind>().unwrap(), ItemKind::Identity);
}
