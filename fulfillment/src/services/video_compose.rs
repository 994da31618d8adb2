// fulfillment/src/services/video_compose.rs

//! Intro/outro concatenation through an external `ffmpeg` binary, bounded by
//! `ComposeConfig::timeout`. Work files are removed whatever the outcome.

use crate::config::ComposeConfig;
use crate::errors::ProviderError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[async_trait]
pub trait VideoComposer: Send + Sync {
  /// Returns `main` wrapped with the configured intro and outro.
  async fn compose(&self, order_id: Uuid, main: Vec<u8>) -> Result<Vec<u8>, ProviderError>;
}

pub struct FfmpegComposer {
  config: ComposeConfig,
}

impl FfmpegComposer {
  pub fn new(config: ComposeConfig) -> Self {
    Self { config }
  }

  fn work_file(&self, order_id: Uuid, suffix: &str) -> PathBuf {
    self.config.work_dir.join(format!("{}-{}", order_id, suffix))
  }
}

/// Line of an ffmpeg concat-demuxer list.
fn concat_entry(path: &Path) -> String {
  format!("file '{}'\n", path.display().to_string().replace('\'', "'\\''"))
}

fn io_failure(what: &str) -> impl FnOnce(std::io::Error) -> ProviderError + '_ {
  move |e| ProviderError::Composition(format!("{}: {}", what, e))
}

impl FfmpegComposer {
  async fn run_ffmpeg(
    &self,
    main: &[u8],
    main_path: &Path,
    list_path: &Path,
    output_path: &Path,
  ) -> Result<Vec<u8>, ProviderError> {
    tokio::fs::write(main_path, main).await.map_err(io_failure("writing main video"))?;
    let list = [self.config.intro_path.as_path(), main_path, self.config.outro_path.as_path()]
      .iter()
      .map(|p| concat_entry(p))
      .collect::<String>();
    tokio::fs::write(list_path, list).await.map_err(io_failure("writing concat list"))?;

    let run = Command::new(&self.config.ffmpeg_path)
      .args(["-y", "-loglevel", "error", "-f", "concat", "-safe", "0", "-i"])
      .arg(list_path)
      .args(["-c", "copy"])
      .arg(output_path)
      .kill_on_drop(true)
      .output();

    let output = match tokio::time::timeout(self.config.timeout, run).await {
      Ok(Ok(output)) => output,
      Ok(Err(e)) => return Err(ProviderError::Composition(format!("ffmpeg could not be started: {}", e))),
      Err(_) => {
        return Err(ProviderError::Composition(format!(
          "ffmpeg did not finish within {}s",
          self.config.timeout.as_secs()
        )))
      }
    };
    if !output.status.success() {
      return Err(ProviderError::Composition(format!(
        "ffmpeg exited with {}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr).trim()
      )));
    }
    tokio::fs::read(output_path).await.map_err(io_failure("reading composed video"))
  }
}

#[async_trait]
impl VideoComposer for FfmpegComposer {
  #[instrument(name = "video_compose::compose", skip(self, main), fields(main_bytes = main.len()), err(Display))]
  async fn compose(&self, order_id: Uuid, main: Vec<u8>) -> Result<Vec<u8>, ProviderError> {
    let main_path = self.work_file(order_id, "main.mp4");
    let list_path = self.work_file(order_id, "concat.txt");
    let output_path = self.work_file(order_id, "final.mp4");

    let composed = self.run_ffmpeg(&main, &main_path, &list_path, &output_path).await;

    for path in [&main_path, &list_path, &output_path] {
      if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
          warn!(path = %path.display(), error = %e, "Failed to remove composition work file.");
        }
      }
    }

    let composed = composed?;
    info!(bytes = composed.len(), "Intro and outro attached.");
    Ok(composed)
  }
}
