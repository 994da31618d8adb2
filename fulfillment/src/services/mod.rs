// fulfillment/src/services/mod.rs

//! Collaborators of the pipeline. Each external provider sits behind a trait
//! so the application state can carry real HTTP clients or test doubles.

pub mod admin_auth;
pub mod avatar_video;
pub mod mailer;
pub mod object_storage;
pub mod pricing;
pub mod rate_limit;
pub mod script_llm;
pub mod video_compose;
pub mod video_fetch;

use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use std::sync::Arc;
use std::time::Duration;

use avatar_video::{HeyGenClient, VideoProvider};
use mailer::{LogMailer, Mailer, ResendMailer};
use object_storage::{HttpObjectStorage, ObjectStorage};
use script_llm::{OpenAiScriptClient, ScriptGenerator};
use video_compose::{FfmpegComposer, VideoComposer};
use video_fetch::{HttpVideoFetcher, VideoFetcher};

#[derive(Clone)]
pub struct Providers {
  pub script: Arc<dyn ScriptGenerator>,
  pub video: Arc<dyn VideoProvider>,
  pub fetcher: Arc<dyn VideoFetcher>,
  pub storage: Arc<dyn ObjectStorage>,
  /// Present only when intro/outro assets are configured.
  pub composer: Option<Arc<dyn VideoComposer>>,
  pub mailer: Arc<dyn Mailer>,
}

impl Providers {
  /// Builds the HTTP-backed providers described by `config`.
  pub fn from_config(config: &AppConfig) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(120))
      .user_agent(concat!("fulfillment/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

    let mailer: Arc<dyn Mailer> = match &config.email.api_key {
      Some(_) => Arc::new(ResendMailer::new(http.clone(), config.email.clone())),
      None => {
        tracing::warn!("EMAIL_API_KEY not set; emails will only be logged.");
        Arc::new(LogMailer::new(config.email.sender.clone()))
      }
    };

    Ok(Self {
      script: Arc::new(OpenAiScriptClient::new(http.clone(), config.llm.clone())),
      video: Arc::new(HeyGenClient::new(http.clone(), config.video.clone())),
      fetcher: Arc::new(HttpVideoFetcher::new(http.clone())),
      storage: Arc::new(HttpObjectStorage::new(http, config.storage.clone())),
      composer: config
        .compose
        .clone()
        .map(|compose| Arc::new(FfmpegComposer::new(compose)) as Arc<dyn VideoComposer>),
      mailer,
    })
  }
}
