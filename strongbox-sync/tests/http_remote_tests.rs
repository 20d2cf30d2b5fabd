use pretty_assertions::assert_eq;
use strongbox_sync::{HttpRemoteStore, RemoteConfig, RemoteError, RemoteStore};
use strongbox_types::{EncryptedRecord, EntityType};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn setup(server: &MockServer) -> HttpRemoteStore {
    HttpRemoteStore::new(&RemoteConfig {
        base_url: format!("{}/", server.uri()),
        timeout_secs: 5,
    })
    .unwrap()
}

fn record(id: &str) -> EncryptedRecord {
    EncryptedRecord {
        id: id.into(),
        entity_type: EntityType::Item,
        type_tag: "login".into(),
        vault_id: Some("vault-1".into()),
        category_id: None,
        ciphertext: vec![0xde, 0xad, 0xbe, 0xef],
        integrity_tag: "ab".repeat(32),
        created_at: 1_000,
        updated_at: 1_000,
        deleted_at: None,
    }
}

// --- Writes ---

#[tokio::test]
async fn create_posts_record_with_bearer_token() {
    let server = MockServer::start().await;
    let sent = record("item-1");
    let mut confirmed = sent.clone();
    confirmed.updated_at = 2_000;

    Mock::given(method("POST"))
        .and(path("/api/items"))
        .and(header("authorization", "Bearer tok-1"))
        .and(body_json(&sent))
        .respond_with(ResponseTemplate::new(201).set_body_json(&confirmed))
        .expect(1)
        .mount(&server)
        .await;

    let remote = setup(&server);
    let got = remote.create("tok-1", &sent).await.unwrap();
    assert_eq!(got, confirmed);
}

#[tokio::test]
async fn update_puts_to_entity_url() {
    let server = MockServer::start().await;
    let sent = record("item-1");

    Mock::given(method("PUT"))
        .and(path("/api/items/item-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&sent))
        .expect(1)
        .mount(&server)
        .await;

    let remote = setup(&server);
    assert_eq!(remote.update("tok", &sent).await.unwrap(), sent);
}

#[tokio::test]
async fn delete_hits_entity_url() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/vaults/v-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let remote = setup(&server);
    remote.delete("tok", EntityType::Vault, "v-1").await.unwrap();
}

#[tokio::test]
async fn fetch_all_reads_collection() {
    let server = MockServer::start().await;
    let mut tombstone = record("item-2");
    tombstone.deleted_at = Some(3_000);
    let body = vec![record("item-1"), tombstone];

    Mock::given(method("GET"))
        .and(path("/api/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .mount(&server)
        .await;

    let remote = setup(&server);
    let records = remote.fetch_all("tok", EntityType::Item).await.unwrap();
    assert_eq!(records, body);
}

// --- Status mapping ---

async fn create_with_status(status: u16, body: &str) -> RemoteError {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/items"))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(&server)
        .await;
    setup(&server)
        .create("tok", &record("item-1"))
        .await
        .unwrap_err()
}

#[tokio::test]
async fn conflict_maps_to_already_exists() {
    assert_eq!(create_with_status(409, "").await, RemoteError::AlreadyExists);
}

#[tokio::test]
async fn missing_maps_to_not_found() {
    assert_eq!(create_with_status(404, "").await, RemoteError::NotFound);
}

#[tokio::test]
async fn auth_failures_map_to_unauthorized() {
    assert_eq!(create_with_status(401, "").await, RemoteError::Unauthorized);
    assert_eq!(create_with_status(403, "").await, RemoteError::Unauthorized);
}

#[tokio::test]
async fn server_errors_and_throttling_are_transient() {
    for status in [500, 502, 503, 429, 408] {
        let err = create_with_status(status, "try later").await;
        assert!(err.is_transient(), "{status} should be transient, got {err:?}");
    }
}

#[tokio::test]
async fn other_client_errors_are_rejections() {
    let err = create_with_status(422, "ciphertext too large").await;
    assert_eq!(
        err,
        RemoteError::Rejected {
            status: 422,
            message: "ciphertext too large".into(),
        }
    );
    assert!(!err.is_transient());
}

#[tokio::test]
async fn malformed_body_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/items/item-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = setup(&server).update("tok", &record("item-1")).await.unwrap_err();
    assert!(matches!(err, RemoteError::InvalidResponse(_)));
}

#[tokio::test]
async fn unreachable_server_is_transient() {
    let remote = HttpRemoteStore::new(&RemoteConfig {
        base_url: "http://127.0.0.1:9".into(),
        timeout_secs: 2,
    })
    .unwrap();
    let err = remote.fetch_all("tok", EntityType::Vault).await.unwrap_err();
    assert!(err.is_transient());
}
