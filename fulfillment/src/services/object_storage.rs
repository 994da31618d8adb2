// fulfillment/src/services/object_storage.rs

use crate::config::StorageConfig;
use crate::errors::ProviderError;
use async_trait::async_trait;
use tracing::{info, instrument};
use uuid::Uuid;

const PROVIDER: &str = "object storage";

/// Storage key of an order's final video. One object per order, so a
/// re-upload replaces it.
pub fn final_video_key(order_id: Uuid) -> String {
  format!("videos/{}/santa-message.mp4", order_id)
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
  /// Stores `bytes` under `key` and returns the durable public URL.
  async fn put_video(&self, key: &str, bytes: Vec<u8>) -> Result<String, ProviderError>;
}

/// S3-compatible bucket reached through plain HTTP `PUT` (pre-authorized
/// endpoint or bearer token).
pub struct HttpObjectStorage {
  http: reqwest::Client,
  config: StorageConfig,
}

impl HttpObjectStorage {
  pub fn new(http: reqwest::Client, config: StorageConfig) -> Self {
    Self { http, config }
  }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
  #[instrument(name = "object_storage::put_video", skip(self, bytes), fields(bytes = bytes.len()), err(Display))]
  async fn put_video(&self, key: &str, bytes: Vec<u8>) -> Result<String, ProviderError> {
    let upload_url = format!("{}/{}", self.config.upload_base_url.trim_end_matches('/'), key);
    let mut request = self
      .http
      .put(&upload_url)
      .header(reqwest::header::CONTENT_TYPE, "video/mp4")
      .body(bytes);
    if let Some(token) = &self.config.bearer_token {
      request = request.bearer_auth(token);
    }

    let response = request.send().await.map_err(ProviderError::transport(PROVIDER))?;
    let status = response.status();
    if !status.is_success() {
      let detail = response.text().await.unwrap_or_default();
      return Err(ProviderError::Rejected {
        provider: PROVIDER,
        detail: format!("HTTP {}: {}", status, detail),
      });
    }

    let public_url = format!("{}/{}", self.config.public_base_url.trim_end_matches('/'), key);
    info!(%public_url, "Final video uploaded.");
    Ok(public_url)
  }
}
