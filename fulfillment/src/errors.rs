// fulfillment/src/errors.rs

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use stepflow::StepflowError;
use thiserror::Error;

/// Failures of the external collaborators: language model, avatar video
/// provider, media download, object storage, composition and email.
#[derive(Debug, Error)]
pub enum ProviderError {
  #[error("{provider} request failed: {source}")]
  Transport {
    provider: &'static str,
    #[source]
    source: reqwest::Error,
  },

  #[error("{provider} rejected the request: {detail}")]
  Rejected { provider: &'static str, detail: String },

  #[error("{provider} returned an unexpected response: {detail}")]
  InvalidResponse { provider: &'static str, detail: String },

  #[error("Script generation returned an empty script")]
  EmptyScript,

  #[error("Video generation timed out after {budget_secs}s waiting for render job {job_id}")]
  Timeout { job_id: String, budget_secs: u64 },

  #[error("Video composition failed: {0}")]
  Composition(String),

  #[error("Email template failed to render: {0}")]
  Template(#[from] askama::Error),
}

impl ProviderError {
  pub fn transport(provider: &'static str) -> impl FnOnce(reqwest::Error) -> ProviderError {
    move |source| ProviderError::Transport { provider, source }
  }

  pub fn is_timeout(&self) -> bool {
    matches!(self, ProviderError::Timeout { .. })
  }
}

#[derive(Debug, Error)]
pub enum AppError {
  #[error("Validation Error: {0}")]
  Validation(String),

  #[error("Authentication Failed: {0}")]
  Auth(String),

  #[error("Resource Not Found: {0}")]
  NotFound(String),

  #[error("Conflict: {0}")]
  Conflict(String),

  #[error("Too many requests, retry later")]
  RateLimited,

  #[error("Configuration Error: {0}")]
  Config(String),

  #[error("Database Error: {0}")]
  Sqlx(#[from] sqlx::Error),

  #[error("Provider Error: {0}")]
  Provider(#[from] ProviderError),

  #[error("Workflow Error: {source}")]
  Workflow {
    #[from]
    source: StepflowError,
  },

  #[error("Internal Server Error: {0}")]
  Internal(String),
}

impl AppError {
  /// Infrastructure failures worth retrying as a whole; provider and input
  /// errors are final.
  pub fn is_transient(&self) -> bool {
    matches!(self, AppError::Sqlx(_))
  }

  /// Human-readable text stored in `orders.error_message` when a run fails.
  pub fn failure_message(&self) -> String {
    match self {
      AppError::Provider(provider_err) => provider_err.to_string(),
      AppError::Sqlx(_) => "Order storage was unavailable while generating the video".to_string(),
      other => other.to_string(),
    }
  }
}

impl From<anyhow::Error> for AppError {
  fn from(err: anyhow::Error) -> Self {
    match err.downcast::<sqlx::Error>() {
      Ok(sqlx_err) => AppError::Sqlx(sqlx_err),
      Err(err) => AppError::Internal(err.to_string()),
    }
  }
}

impl ResponseError for AppError {
  fn error_response(&self) -> HttpResponse {
    tracing::error!(application_error = %self, "Responding with error");
    match self {
      AppError::Validation(m) => HttpResponse::BadRequest().json(json!({"error": m})),
      AppError::Auth(m) => HttpResponse::Unauthorized().json(json!({"error": m})),
      AppError::NotFound(m) => HttpResponse::NotFound().json(json!({"error": m})),
      AppError::Conflict(m) => HttpResponse::Conflict().json(json!({"error": m})),
      AppError::RateLimited => HttpResponse::TooManyRequests().json(json!({"error": "Too many requests, retry later"})),
      AppError::Config(m) => {
        HttpResponse::InternalServerError().json(json!({"error": "Configuration issue", "detail": m}))
      }
      AppError::Sqlx(_) => HttpResponse::InternalServerError().json(json!({"error": "Database operation failed"})),
      AppError::Provider(e) => HttpResponse::BadGateway().json(json!({"error": "Upstream provider error", "detail": e.to_string()})),
      AppError::Workflow { source } => {
        tracing::error!(stepflow_error_source = ?source, "Workflow error details");
        HttpResponse::InternalServerError()
          .json(json!({"error": "Workflow processing error", "detail": source.to_string()}))
      }
      AppError::Internal(m) => {
        HttpResponse::InternalServerError().json(json!({"error": "An internal error occurred", "detail": m}))
      }
    }
  }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn timeout_message_is_distinguishable() {
    let timeout = AppError::from(ProviderError::Timeout {
      job_id: "J1".to_string(),
      budget_secs: 600,
    });
    let rejected = AppError::from(ProviderError::Rejected {
      provider: "video provider",
      detail: "avatar render error".to_string(),
    });

    assert!(timeout.failure_message().contains("timed out"));
    assert!(timeout.failure_message().contains("J1"));
    assert!(!rejected.failure_message().contains("timed out"));
    assert!(rejected.failure_message().contains("avatar render error"));
  }

  #[test]
  fn only_storage_errors_are_transient() {
    assert!(AppError::Sqlx(sqlx::Error::PoolTimedOut).is_transient());
    assert!(!AppError::from(ProviderError::EmptyScript).is_transient());
    assert!(!AppError::Internal("boom".to_string()).is_transient());
  }

  #[test]
  fn anyhow_wrapping_sqlx_keeps_the_database_variant() {
    let err = AppError::from(anyhow::Error::new(sqlx::Error::RowNotFound));
    assert!(matches!(err, AppError::Sqlx(_)));

    let err = AppError::from(anyhow::anyhow!("boom"));
    assert!(matches!(err, AppError::Internal(m) if m == "boom"));
  }
}
