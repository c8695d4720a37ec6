use std::sync::Arc;

use async_trait::async_trait;
use gcp_auth::TokenProvider;
use reqwest::{Client, StatusCode};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, warn};

use crate::storage::{ObjectStorage, StorageError};

const SCOPES: &[&str] = &["https://www.googleapis.com/auth/cloud-platform"];

#[derive(Debug, Clone)]
struct CachedGoogleCloudToken {
    token: String,
    expiry: chrono::DateTime<chrono::Utc>,
}

/// Google Cloud Storage bucket accessed over the JSON API.
pub struct GcsBucket {
    bucket: String,
    client: Client,
    // cache the provider too
    provider: OnceCell<Arc<dyn TokenProvider>>,
    token: RwLock<Option<CachedGoogleCloudToken>>,
}

fn encode_object_name(path: &str) -> String {
    // storage paths are validated to [A-Za-z0-9.-/], so the separator is the only character to escape
    path.replace('/', "%2F")
}

impl GcsBucket {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            client: Client::new(),
            provider: OnceCell::new(),
            token: RwLock::new(None),
        }
    }

    async fn bearer_token(&self) -> Result<String, StorageError> {
        if let Some(cached) = self.token.read().await.as_ref() {
            if cached.expiry > chrono::Utc::now() + chrono::Duration::minutes(5) {
                return Ok(cached.token.clone());
            }
        }

        // Token doesn't exist or is expiring soon, fetch a new one
        let provider = self
            .provider
            .get_or_try_init(|| async { gcp_auth::provider().await })
            .await?;
        let token = provider.token(SCOPES).await?;
        let fresh = CachedGoogleCloudToken {
            token: token.as_str().to_string(),
            expiry: chrono::Utc::now() + chrono::Duration::seconds(3600 - 300),
        };
        debug!(bucket = %self.bucket, "Refreshed bucket access token");

        *self.token.write().await = Some(fresh.clone());
        Ok(fresh.token)
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "https://storage.googleapis.com/storage/v1/b/{}/o/{}",
            self.bucket,
            encode_object_name(path)
        )
    }
}

async fn rejected(response: reqwest::Response) -> StorageError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    StorageError::Rejected { status, body }
}

#[async_trait]
impl ObjectStorage for GcsBucket {
    async fn upload(&self, path: &str, data: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        let url = format!(
            "https://storage.googleapis.com/upload/storage/v1/b/{}/o?uploadType=media&ifGenerationMatch=0&name={}",
            self.bucket,
            encode_object_name(path)
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.bearer_token().await?)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await?;

        match response.status() {
            StatusCode::PRECONDITION_FAILED => Err(StorageError::AlreadyExists(path.to_string())),
            status if status.is_success() => Ok(()),
            _ => Err(rejected(response).await),
        }
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let response = self
            .client
            .get(format!("{}?alt=media", self.object_url(path)))
            .bearer_auth(self.bearer_token().await?)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(path.to_string())),
            status if status.is_success() => Ok(response.bytes().await?.to_vec()),
            _ => Err(rejected(response).await),
        }
    }

    async fn remove(&self, paths: &[String]) -> Result<(), StorageError> {
        let token = self.bearer_token().await?;
        for path in paths {
            let response = self.client.delete(self.object_url(path)).bearer_auth(&token).send().await?;
            match response.status() {
                StatusCode::NOT_FOUND => warn!(%path, "Object already absent from bucket"),
                status if status.is_success() => {}
                _ => return Err(rejected(response).await),
            }
        }
        Ok(())
    }
}
