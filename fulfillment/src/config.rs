// fulfillment/src/config.rs

use crate::errors::{AppError, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_FFMPEG_TIMEOUT: Duration = Duration::from_secs(120);

/// Timing knobs of the fulfillment pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
  /// Target length of the spoken message; drives the script word budget.
  pub target_duration_secs: u32,
  pub poll_interval: Duration,
  pub poll_budget: Duration,
  /// Delay before the payment reminder for unpaid orders is delivered.
  pub reminder_delay: Duration,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      target_duration_secs: 60,
      poll_interval: Duration::from_secs(10),
      poll_budget: Duration::from_secs(600),
      reminder_delay: Duration::from_secs(3600),
    }
  }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
  pub max_attempts: u32,
  pub initial_backoff: Duration,
  pub max_backoff: Duration,
  pub outbox_poll_interval: Duration,
  /// How long a claimed outbox row stays invisible to other relays.
  pub outbox_lease: Duration,
  pub outbox_batch_size: i64,
}

impl Default for DispatcherConfig {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      initial_backoff: Duration::from_secs(2),
      max_backoff: Duration::from_secs(60),
      outbox_poll_interval: Duration::from_secs(2),
      outbox_lease: Duration::from_secs(45 * 60),
      outbox_batch_size: 16,
    }
  }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
  pub api_base: String,
  pub api_key: String,
  pub model: String,
}

#[derive(Debug, Clone)]
pub struct VideoProviderConfig {
  pub api_base: String,
  pub api_key: String,
  pub avatar_id: String,
  pub voice_id: String,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
  pub upload_base_url: String,
  pub public_base_url: String,
  pub bearer_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EmailConfig {
  pub api_base: String,
  /// Without a key, emails are only logged.
  pub api_key: Option<String>,
  pub sender: String,
}

/// Intro/outro concatenation; only enabled when both assets are configured.
#[derive(Debug, Clone)]
pub struct ComposeConfig {
  pub ffmpeg_path: PathBuf,
  pub intro_path: PathBuf,
  pub outro_path: PathBuf,
  pub work_dir: PathBuf,
  /// A run longer than this is killed and counts as a composition failure.
  pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
  pub server_host: String,
  pub server_port: u16,
  /// Without a database the service runs on the in-memory store and channel dispatcher.
  pub database_url: Option<String>,
  pub app_base_url: String,

  pub base_price_cents: i32,
  pub webhook_secret: String,
  /// Argon2 hash of the admin bearer token. Admin routes are closed when unset.
  pub admin_token_hash: Option<String>,
  pub status_rate_limit_per_minute: u32,
  /// Key the status rate limit on `X-Forwarded-For`/`Forwarded` instead of the
  /// socket peer. Only safe behind a proxy that overwrites those headers.
  pub trust_proxy_headers: bool,

  pub pipeline: PipelineConfig,
  pub dispatcher: DispatcherConfig,
  pub llm: LlmConfig,
  pub video: VideoProviderConfig,
  pub storage: StorageConfig,
  pub email: EmailConfig,
  pub compose: Option<ComposeConfig>,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      server_host: "127.0.0.1".to_string(),
      server_port: 8080,
      database_url: None,
      app_base_url: "http://127.0.0.1:8080".to_string(),
      base_price_cents: 8900,
      webhook_secret: "change-me".to_string(),
      admin_token_hash: None,
      status_rate_limit_per_minute: 30,
      trust_proxy_headers: false,
      pipeline: PipelineConfig::default(),
      dispatcher: DispatcherConfig::default(),
      llm: LlmConfig {
        api_base: "https://api.openai.com/v1".to_string(),
        api_key: String::new(),
        model: "gpt-4o-mini".to_string(),
      },
      video: VideoProviderConfig {
        api_base: "https://api.heygen.com".to_string(),
        api_key: String::new(),
        avatar_id: String::new(),
        voice_id: String::new(),
      },
      storage: StorageConfig {
        upload_base_url: "http://127.0.0.1:9000/santa-videos".to_string(),
        public_base_url: "http://127.0.0.1:9000/santa-videos".to_string(),
        bearer_token: None,
      },
      email: EmailConfig {
        api_base: "https://api.resend.com".to_string(),
        api_key: None,
        sender: "Santa <santa@example.com>".to_string(),
      },
      compose: None,
    }
  }
}

fn optional_env(var_name: &str) -> Option<String> {
  env::var(var_name).ok().filter(|v| !v.trim().is_empty())
}

fn required_env(var_name: &str) -> Result<String> {
  optional_env(var_name).ok_or_else(|| AppError::Config(format!("Missing environment variable '{}'", var_name)))
}

fn parsed_env<T>(var_name: &str, default: T) -> Result<T>
where
  T: FromStr,
  T::Err: std::fmt::Display,
{
  match optional_env(var_name) {
    Some(raw) => raw
      .parse::<T>()
      .map_err(|e| AppError::Config(format!("Invalid {} value '{}': {}", var_name, raw, e))),
    None => Ok(default),
  }
}

fn secs_env(var_name: &str, default: Duration) -> Result<Duration> {
  parsed_env(var_name, default.as_secs()).map(Duration::from_secs)
}

impl AppConfig {
  pub fn from_env() -> Result<Self> {
    dotenv().ok();
    let defaults = AppConfig::default();

    let server_host = optional_env("SERVER_HOST").unwrap_or(defaults.server_host);
    let server_port = parsed_env("SERVER_PORT", defaults.server_port)?;
    let app_base_url = optional_env("APP_BASE_URL").unwrap_or_else(|| format!("http://{}:{}", server_host, server_port));

    let base_price_cents = parsed_env("BASE_PRICE_CENTS", defaults.base_price_cents)?;
    if base_price_cents < 0 {
      return Err(AppError::Config("BASE_PRICE_CENTS must not be negative".to_string()));
    }

    let pipeline = PipelineConfig {
      target_duration_secs: parsed_env("VIDEO_TARGET_SECONDS", defaults.pipeline.target_duration_secs)?,
      poll_interval: secs_env("VIDEO_POLL_INTERVAL_SECS", defaults.pipeline.poll_interval)?,
      poll_budget: secs_env("VIDEO_POLL_BUDGET_SECS", defaults.pipeline.poll_budget)?,
      reminder_delay: secs_env("PAYMENT_REMINDER_DELAY_SECS", defaults.pipeline.reminder_delay)?,
    };
    if pipeline.poll_interval.is_zero() {
      return Err(AppError::Config("VIDEO_POLL_INTERVAL_SECS must be positive".to_string()));
    }

    let dispatcher = DispatcherConfig {
      max_attempts: parsed_env("DISPATCH_MAX_ATTEMPTS", defaults.dispatcher.max_attempts)?.max(1),
      initial_backoff: secs_env("DISPATCH_BACKOFF_SECS", defaults.dispatcher.initial_backoff)?,
      max_backoff: secs_env("DISPATCH_MAX_BACKOFF_SECS", defaults.dispatcher.max_backoff)?,
      outbox_poll_interval: secs_env("OUTBOX_POLL_INTERVAL_SECS", defaults.dispatcher.outbox_poll_interval)?,
      outbox_lease: secs_env("OUTBOX_LEASE_SECS", defaults.dispatcher.outbox_lease)?,
      outbox_batch_size: parsed_env("OUTBOX_BATCH_SIZE", defaults.dispatcher.outbox_batch_size)?,
    };

    let llm = LlmConfig {
      api_base: optional_env("LLM_API_BASE").unwrap_or(defaults.llm.api_base),
      api_key: required_env("LLM_API_KEY")?,
      model: optional_env("LLM_MODEL").unwrap_or(defaults.llm.model),
    };

    let video = VideoProviderConfig {
      api_base: optional_env("VIDEO_API_BASE").unwrap_or(defaults.video.api_base),
      api_key: required_env("VIDEO_API_KEY")?,
      avatar_id: required_env("VIDEO_AVATAR_ID")?,
      voice_id: required_env("VIDEO_VOICE_ID")?,
    };

    let upload_base_url = required_env("STORAGE_UPLOAD_BASE_URL")?;
    let storage = StorageConfig {
      public_base_url: optional_env("STORAGE_PUBLIC_BASE_URL").unwrap_or_else(|| upload_base_url.clone()),
      upload_base_url,
      bearer_token: optional_env("STORAGE_BEARER_TOKEN"),
    };

    let email = EmailConfig {
      api_base: optional_env("EMAIL_API_BASE").unwrap_or(defaults.email.api_base),
      api_key: optional_env("EMAIL_API_KEY"),
      sender: optional_env("EMAIL_SENDER").unwrap_or(defaults.email.sender),
    };

    let compose = match (optional_env("VIDEO_INTRO_PATH"), optional_env("VIDEO_OUTRO_PATH")) {
      (Some(intro), Some(outro)) => Some(ComposeConfig {
        ffmpeg_path: optional_env("FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".to_string()).into(),
        intro_path: intro.into(),
        outro_path: outro.into(),
        work_dir: optional_env("VIDEO_WORK_DIR").map(PathBuf::from).unwrap_or_else(env::temp_dir),
        timeout: secs_env("FFMPEG_TIMEOUT_SECS", DEFAULT_FFMPEG_TIMEOUT)?,
      }),
      (None, None) => None,
      _ => {
        tracing::warn!("Only one of VIDEO_INTRO_PATH / VIDEO_OUTRO_PATH is set; intro/outro composition disabled.");
        None
      }
    };

    let config = Self {
      server_host,
      server_port,
      database_url: optional_env("DATABASE_URL"),
      app_base_url,
      base_price_cents,
      webhook_secret: required_env("PAYMENT_WEBHOOK_SECRET")?,
      admin_token_hash: optional_env("ADMIN_TOKEN_HASH"),
      status_rate_limit_per_minute: parsed_env("STATUS_RATE_LIMIT_PER_MINUTE", defaults.status_rate_limit_per_minute)?,
      trust_proxy_headers: parsed_env("TRUST_PROXY_HEADERS", defaults.trust_proxy_headers)?,
      pipeline,
      dispatcher,
      llm,
      video,
      storage,
      email,
      compose,
    };

    tracing::info!(
      database = config.database_url.is_some(),
      compose = config.compose.is_some(),
      admin = config.admin_token_hash.is_some(),
      "Application configuration loaded successfully."
    );
    Ok(config)
  }
}
