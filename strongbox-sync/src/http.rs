//! HTTP remote store.
//!
//! Bearer-authenticated JSON over reqwest:
//! - `POST   /api/{collection}`       create
//! - `PUT    /api/{collection}/{id}`  update
//! - `DELETE /api/{collection}/{id}`  delete
//! - `GET    /api/{collection}`       fetch all

use crate::config::RemoteConfig;
use crate::remote::{RemoteError, RemoteResult, RemoteStore};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use strongbox_types::{EncryptedRecord, EntityType};
use tracing::debug;

pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
}

impl HttpRemoteStore {
    pub fn new(config: &RemoteConfig) -> RemoteResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RemoteError::Client(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn collection_url(&self, entity_type: EntityType) -> String {
        format!("{}/api/{}", self.base_url, entity_type.collection())
    }

    fn entity_url(&self, entity_type: EntityType, id: &str) -> String {
        format!("{}/{}", self.collection_url(entity_type), id)
    }
}

/// Maps a non-success status to the remote error taxonomy.
async fn check_status(resp: Response) -> RemoteResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = resp.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::NOT_FOUND => RemoteError::NotFound,
        StatusCode::CONFLICT => RemoteError::AlreadyExists,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Unauthorized,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            RemoteError::Transient(format!("{status}"))
        }
        s if s.is_server_error() => RemoteError::Transient(format!("{status}: {message}")),
        s => RemoteError::Rejected {
            status: s.as_u16(),
            message,
        },
    })
}

async fn read_record(resp: Response) -> RemoteResult<EncryptedRecord> {
    resp.json::<EncryptedRecord>()
        .await
        .map_err(|e| RemoteError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn create(&self, token: &str, record: &EncryptedRecord) -> RemoteResult<EncryptedRecord> {
        debug!(entity_type = %record.entity_type, id = %record.id, "remote create");
        let resp = self
            .client
            .post(self.collection_url(record.entity_type))
            .bearer_auth(token)
            .json(record)
            .send()
            .await?;
        read_record(check_status(resp).await?).await
    }

    async fn update(&self, token: &str, record: &EncryptedRecord) -> RemoteResult<EncryptedRecord> {
        debug!(entity_type = %record.entity_type, id = %record.id, "remote update");
        let resp = self
            .client
            .put(self.entity_url(record.entity_type, &record.id))
            .bearer_auth(token)
            .json(record)
            .send()
            .await?;
        read_record(check_status(resp).await?).await
    }

    async fn delete(&self, token: &str, entity_type: EntityType, id: &str) -> RemoteResult<()> {
        debug!(%entity_type, %id, "remote delete");
        let resp = self
            .client
            .delete(self.entity_url(entity_type, id))
            .bearer_auth(token)
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    async fn fetch_all(&self, token: &str, entity_type: EntityType) -> RemoteResult<Vec<EncryptedRecord>> {
        let resp = self
            .client
            .get(self.collection_url(entity_type))
            .bearer_auth(token)
            .send()
            .await?;
        let records: Vec<EncryptedRecord> = check_status(resp)
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))?;
        debug!(%entity_type, count = records.len(), "remote fetch");
        Ok(records)
    }
}
