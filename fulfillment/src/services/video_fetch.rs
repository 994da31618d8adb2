// fulfillment/src/services/video_fetch.rs

use crate::errors::ProviderError;
use async_trait::async_trait;
use tracing::{info, instrument};

const PROVIDER: &str = "video download";

/// Downloads the rendered video from the provider's (short-lived) URL.
#[async_trait]
pub trait VideoFetcher: Send + Sync {
  async fn fetch(&self, url: &str) -> Result<Vec<u8>, ProviderError>;
}

pub struct HttpVideoFetcher {
  http: reqwest::Client,
}

impl HttpVideoFetcher {
  pub fn new(http: reqwest::Client) -> Self {
    Self { http }
  }
}

#[async_trait]
impl VideoFetcher for HttpVideoFetcher {
  #[instrument(name = "video_fetch::fetch", skip(self, url), err(Display))]
  async fn fetch(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
    let response = self.http.get(url).send().await.map_err(ProviderError::transport(PROVIDER))?;
    let status = response.status();
    if !status.is_success() {
      return Err(ProviderError::Rejected {
        provider: PROVIDER,
        detail: format!("HTTP {} while downloading the rendered video", status),
      });
    }
    let bytes = response.bytes().await.map_err(ProviderError::transport(PROVIDER))?;
    if bytes.is_empty() {
      return Err(ProviderError::InvalidResponse {
        provider: PROVIDER,
        detail: "rendered video is empty".to_string(),
      });
    }
    info!(bytes = bytes.len(), "Rendered video downloaded.");
    Ok(bytes.to_vec())
  }
}
