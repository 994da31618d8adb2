// fulfillment/src/services/avatar_video.rs

//! Talking-avatar video provider: asynchronous render jobs plus a status API.

use crate::config::VideoProviderConfig;
use crate::errors::ProviderError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, instrument};
use uuid::Uuid;

const PROVIDER: &str = "video provider";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderStatus {
  Pending,
  Processing,
  Completed { video_url: String },
  Failed { detail: String },
}

#[async_trait]
pub trait VideoProvider: Send + Sync {
  /// Starts a render of `script` and returns the provider's job id.
  async fn submit(&self, order_id: Uuid, script: &str) -> Result<String, ProviderError>;

  async fn status(&self, job_id: &str) -> Result<RenderStatus, ProviderError>;
}

/// HeyGen-style API: `POST /v2/video/generate`, `GET /v1/video_status.get`.
pub struct HeyGenClient {
  http: reqwest::Client,
  config: VideoProviderConfig,
}

impl HeyGenClient {
  pub fn new(http: reqwest::Client, config: VideoProviderConfig) -> Self {
    Self { http, config }
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
  }
}

#[derive(Deserialize)]
struct Envelope<T> {
  data: Option<T>,
  error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct SubmitData {
  video_id: String,
}

#[derive(Deserialize)]
struct StatusData {
  status: String,
  video_url: Option<String>,
  error: Option<serde_json::Value>,
}

fn describe_error(value: &serde_json::Value) -> String {
  value
    .get("message")
    .and_then(|m| m.as_str())
    .or_else(|| value.as_str())
    .map(str::to_string)
    .unwrap_or_else(|| value.to_string())
}

async fn read_envelope<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T, ProviderError> {
  let status = response.status();
  if !status.is_success() {
    let detail = response.text().await.unwrap_or_default();
    return Err(ProviderError::Rejected {
      provider: PROVIDER,
      detail: format!("HTTP {}: {}", status, detail),
    });
  }
  let envelope: Envelope<T> = response.json().await.map_err(|e| ProviderError::InvalidResponse {
    provider: PROVIDER,
    detail: e.to_string(),
  })?;
  match (envelope.data, envelope.error) {
    (Some(data), _) => Ok(data),
    (None, Some(error)) => Err(ProviderError::Rejected {
      provider: PROVIDER,
      detail: describe_error(&error),
    }),
    (None, None) => Err(ProviderError::InvalidResponse {
      provider: PROVIDER,
      detail: "response carried neither data nor error".to_string(),
    }),
  }
}

#[async_trait]
impl VideoProvider for HeyGenClient {
  #[instrument(name = "avatar_video::submit", skip(self, script), fields(script_chars = script.len()), err(Display))]
  async fn submit(&self, order_id: Uuid, script: &str) -> Result<String, ProviderError> {
    let body = json!({
      "video_inputs": [{
        "character": {
          "type": "avatar",
          "avatar_id": self.config.avatar_id,
          "avatar_style": "normal"
        },
        "voice": {
          "type": "text",
          "input_text": script,
          "voice_id": self.config.voice_id
        }
      }],
      "dimension": { "width": 1280, "height": 720 },
      "callback_id": order_id.to_string()
    });

    let response = self
      .http
      .post(self.url("/v2/video/generate"))
      .header("X-Api-Key", &self.config.api_key)
      .json(&body)
      .send()
      .await
      .map_err(ProviderError::transport(PROVIDER))?;

    let data: SubmitData = read_envelope(response).await?;
    info!(job_id = %data.video_id, "Render job submitted.");
    Ok(data.video_id)
  }

  #[instrument(name = "avatar_video::status", skip(self), err(Display))]
  async fn status(&self, job_id: &str) -> Result<RenderStatus, ProviderError> {
    let response = self
      .http
      .get(self.url("/v1/video_status.get"))
      .query(&[("video_id", job_id)])
      .header("X-Api-Key", &self.config.api_key)
      .send()
      .await
      .map_err(ProviderError::transport(PROVIDER))?;

    let data: StatusData = read_envelope(response).await?;
    debug!(status = %data.status, "Render status fetched.");
    match data.status.as_str() {
      "pending" | "waiting" => Ok(RenderStatus::Pending),
      "processing" => Ok(RenderStatus::Processing),
      "completed" => match data.video_url {
        Some(video_url) if !video_url.is_empty() => Ok(RenderStatus::Completed { video_url }),
        _ => Err(ProviderError::InvalidResponse {
          provider: PROVIDER,
          detail: format!("job {} completed without a video URL", job_id),
        }),
      },
      "failed" => Ok(RenderStatus::Failed {
        detail: data
          .error
          .as_ref()
          .map(describe_error)
          .unwrap_or_else(|| "render failed without detail".to_string()),
      }),
      other => Err(ProviderError::InvalidResponse {
        provider: PROVIDER,
        detail: format!("unknown render status '{}'", other),
      }),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn error_detail_prefers_message_field() {
    assert_eq!(describe_error(&json!({"code": 40001, "message": "avatar render error"})), "avatar render error");
    assert_eq!(describe_error(&json!("quota exceeded")), "quota exceeded");
    assert_eq!(describe_error(&json!({"code": 1})), "{\"code\":1}");
  }
}
