// fulfillment/src/pipelines/polling.rs

//! Waits for an avatar render job to reach a terminal status.

use crate::errors::ProviderError;
use crate::services::avatar_video::{RenderStatus, VideoProvider};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
  pub interval: Duration,
  pub budget: Duration,
}

/// Result of a successful wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedVideo {
  pub video_url: String,
  pub polls: u32,
}

/// Sleeps `interval`, checks the job, and repeats until it completes, fails,
/// or the next check would fall outside `budget`.
///
/// Dropping the returned future cancels the wait. The number of polls is not
/// persisted, so a restarted run waits a full budget again.
#[instrument(name = "polling::await_render", skip(provider), err(Display))]
pub async fn await_render(
  provider: &dyn VideoProvider,
  job_id: &str,
  settings: PollSettings,
) -> Result<RenderedVideo, ProviderError> {
  let deadline = Instant::now() + settings.budget;
  let mut polls = 0u32;

  loop {
    if Instant::now() + settings.interval > deadline {
      warn!(polls, "Render did not finish within the polling budget.");
      return Err(ProviderError::Timeout {
        job_id: job_id.to_string(),
        budget_secs: settings.budget.as_secs(),
      });
    }
    tokio::time::sleep(settings.interval).await;
    polls += 1;

    match provider.status(job_id).await? {
      RenderStatus::Completed { video_url } => {
        info!(polls, "Render completed.");
        return Ok(RenderedVideo { video_url, polls });
      }
      RenderStatus::Failed { detail } => {
        warn!(polls, %detail, "Render failed at the provider.");
        return Err(ProviderError::Rejected {
          provider: "video provider",
          detail,
        });
      }
      RenderStatus::Pending | RenderStatus::Processing => debug!(polls, "Render still in progress."),
    }
  }
}
