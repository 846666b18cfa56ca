//! Remote object storage over HTTP.
//!
//! Speaks the bucket/object REST dialect used by hosted object stores:
//! uploads go to `{endpoint}/object/{bucket}/{key}` and public objects are
//! served from `{endpoint}/object/public/{bucket}/{key}`.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use carecache_common::{Error, Result};

use crate::provider::{BlobStorage, ObjectPath};

/// Characters escaped inside a single path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// HTTP object storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpBlobConfig {
    /// Storage API root, e.g. `https://project.example.co/storage/v1`.
    pub endpoint: String,
    /// Bucket objects are written to.
    pub bucket: String,
    /// Bearer credential sent with every upload.
    #[serde(default)]
    pub bearer_token: Option<String>,
}

/// Error body returned by the storage API.
#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Remote object storage client.
pub struct HttpBlobStorage {
    http: Client,
    config: HttpBlobConfig,
}

impl HttpBlobStorage {
    /// Create a new storage client.
    ///
    /// # Errors
    /// - Empty endpoint or bucket
    /// - HTTP client construction failure
    pub fn new(config: HttpBlobConfig) -> Result<Self> {
        if config.endpoint.trim().is_empty() || config.bucket.trim().is_empty() {
            return Err(Error::InvalidInput(
                "HTTP storage requires 'endpoint' and 'bucket'".to_string(),
            ));
        }

        let http = Client::builder()
            .user_agent("carecache/0.1")
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    fn encoded_key(path: &ObjectPath) -> String {
        path.components()
            .iter()
            .map(|c| utf8_percent_encode(c, SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn endpoint(&self) -> &str {
        self.config.endpoint.trim_end_matches('/')
    }

    /// Upload URL for `path`.
    pub fn upload_url(&self, path: &ObjectPath) -> String {
        format!(
            "{}/object/{}/{}",
            self.endpoint(),
            self.config.bucket,
            Self::encoded_key(path)
        )
    }

    /// Turn an unsuccessful response into the collaborator's own message.
    async fn error_message(response: reqwest::Response) -> String {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        extract_message(&body).unwrap_or_else(|| format!("Upload failed with status {}", status))
    }
}

fn extract_message(body: &str) -> Option<String> {
    if let Ok(api) = serde_json::from_str::<ApiError>(body) {
        if let Some(message) = api.message.or(api.error) {
            return Some(message);
        }
    }
    let trimmed = body.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[async_trait]
impl BlobStorage for HttpBlobStorage {
    fn name(&self) -> &str {
        "http"
    }

    async fn transfer(
        &self,
        path: &ObjectPath,
        data: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<String> {
        let url = self.upload_url(path);
        debug!("Uploading {} bytes to {}", data.len(), url);

        let mut request = self
            .http
            .post(&url)
            .header(
                header::CONTENT_TYPE,
                content_type.unwrap_or("application/octet-stream"),
            )
            .header("x-upsert", "true")
            .body(data);

        if let Some(token) = &self.config.bearer_token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request.send().await.map_err(|e| Error::Network(e.to_string()))?;

        if response.status().is_success() {
            Ok(self.public_url(path))
        } else {
            let message = Self::error_message(response).await;
            warn!("Upload of {} rejected: {}", path, message);
            Err(Error::Network(message))
        }
    }

    fn public_url(&self, path: &ObjectPath) -> String {
        format!(
            "{}/object/public/{}/{}",
            self.endpoint(),
            self.config.bucket,
            Self::encoded_key(path)
        )
    }
}
