// fulfillment/src/pipelines/generation.rs

//! The fulfillment run: `paid → generating_script → generating_video →
//! merging → completed`.
//!
//! Every step that moves the order first claims the transition with a
//! compare-and-set on the order row, and only then calls its provider. A
//! claim that does not match (duplicate delivery, a run already in progress
//! or finished, an admin override) stops the run without touching anything.
//! Step failures bubble up to [`run_generation`], the only place that marks
//! an order `failed`. A storage error before the first claim leaves the order
//! `paid` and is returned to the dispatcher, which retries the run.

use crate::errors::{AppError, ProviderError, Result as AppResult};
use crate::models::OrderStatus;
use crate::pipelines::common_steps;
use crate::pipelines::contexts::GenerationCtxData;
use crate::pipelines::polling::{await_render, PollSettings};
use crate::services::object_storage::final_video_key;
use crate::services::script_llm::build_prompt;
use crate::state::AppState;
use std::sync::Arc;
use stepflow::{ContextData, Pipeline, PipelineControl, PipelineResult, Registry, SkipCondition};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

type StepResult = AppResult<PipelineControl>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
  Completed { video_url: String, notified: bool },
  /// A precondition did not hold at `step`; nothing was changed.
  Skipped { step: String },
  Failed { message: String },
}

fn app_state_of(ctx_data: &ContextData<GenerationCtxData>) -> (AppState, Uuid) {
  let guard = ctx_data.read();
  (guard.app_state.clone(), guard.order_id)
}

/// Claims `from → to` for the order; `false` means the run must stop.
async fn claim(
  ctx_data: &ContextData<GenerationCtxData>,
  app_state: &AppState,
  order_id: Uuid,
  from: OrderStatus,
  to: OrderStatus,
) -> AppResult<bool> {
  let claimed = app_state.orders.advance_status(order_id, from, to).await?;
  if claimed.is_none() {
    info!(%order_id, expected = %from, "Order not in the expected status; skipping.");
    return Ok(false);
  }
  ctx_data.write().claimed = true;
  Ok(true)
}

#[instrument(name = "generation::load_order", skip_all)]
async fn load_order(ctx_data: ContextData<GenerationCtxData>) -> StepResult {
  let (app_state, order_id) = app_state_of(&ctx_data);
  let Some(order) = app_state.orders.find(order_id).await? else {
    warn!(%order_id, "Generation requested for an unknown order.");
    return Ok(PipelineControl::Stop);
  };
  if order.status != OrderStatus::Paid {
    info!(%order_id, status = %order.status, "Order is not waiting for generation; skipping.");
    return Ok(PipelineControl::Stop);
  }
  ctx_data.write().order = Some(order);
  Ok(PipelineControl::Continue)
}

#[instrument(name = "generation::generate_script", skip_all)]
async fn generate_script(ctx_data: ContextData<GenerationCtxData>) -> StepResult {
  let (app_state, order_id) = app_state_of(&ctx_data);
  let child = ctx_data
    .read()
    .order
    .as_ref()
    .map(|o| o.child.0.clone())
    .ok_or_else(|| AppError::Internal("Order not loaded before script generation".to_string()))?;

  if !claim(&ctx_data, &app_state, order_id, OrderStatus::Paid, OrderStatus::GeneratingScript).await? {
    return Ok(PipelineControl::Stop);
  }

  let prompt = build_prompt(&child, app_state.config.pipeline.target_duration_secs);
  let script = app_state.providers.script.generate_script(&prompt).await?;
  let script = script.trim().to_string();
  if script.is_empty() {
    return Err(ProviderError::EmptyScript.into());
  }

  app_state.orders.save_script(order_id, &script).await?;
  info!(words = script.split_whitespace().count(), "Script stored.");
  ctx_data.write().script = Some(script);
  Ok(PipelineControl::Continue)
}

#[instrument(name = "generation::submit_video_job", skip_all)]
async fn submit_video_job(ctx_data: ContextData<GenerationCtxData>) -> StepResult {
  let (app_state, order_id) = app_state_of(&ctx_data);
  let script = ctx_data
    .read()
    .script
    .clone()
    .ok_or_else(|| AppError::Internal("No script to render".to_string()))?;

  if !claim(&ctx_data, &app_state, order_id, OrderStatus::GeneratingScript, OrderStatus::GeneratingVideo).await? {
    return Ok(PipelineControl::Stop);
  }

  let job_id = app_state.providers.video.submit(order_id, &script).await?;
  app_state.orders.save_video_job(order_id, &job_id).await?;
  info!(%job_id, "Render job id stored.");
  ctx_data.write().job_id = Some(job_id);
  Ok(PipelineControl::Continue)
}

#[instrument(name = "generation::await_video_render", skip_all)]
async fn await_video_render(ctx_data: ContextData<GenerationCtxData>) -> StepResult {
  let (app_state, _order_id) = app_state_of(&ctx_data);
  let job_id = ctx_data
    .read()
    .job_id
    .clone()
    .ok_or_else(|| AppError::Internal("No render job to wait for".to_string()))?;

  let settings = PollSettings {
    interval: app_state.config.pipeline.poll_interval,
    budget: app_state.config.pipeline.poll_budget,
  };
  let rendered = await_render(app_state.providers.video.as_ref(), &job_id, settings).await?;
  ctx_data.write().rendered_video_url = Some(rendered.video_url);
  Ok(PipelineControl::Continue)
}

#[instrument(name = "generation::download_rendered_video", skip_all)]
async fn download_rendered_video(ctx_data: ContextData<GenerationCtxData>) -> StepResult {
  let (app_state, order_id) = app_state_of(&ctx_data);
  let rendered_url = ctx_data
    .read()
    .rendered_video_url
    .clone()
    .ok_or_else(|| AppError::Internal("No rendered video URL".to_string()))?;

  if !claim(&ctx_data, &app_state, order_id, OrderStatus::GeneratingVideo, OrderStatus::Merging).await? {
    return Ok(PipelineControl::Stop);
  }

  let bytes = app_state.providers.fetcher.fetch(&rendered_url).await?;
  ctx_data.write().main_video = Some(bytes);
  Ok(PipelineControl::Continue)
}

/// Optional: a failure here leaves `composed_video` empty and the upload
/// falls back to the main video alone.
#[instrument(name = "generation::compose_intro_outro", skip_all)]
async fn compose_intro_outro(ctx_data: ContextData<GenerationCtxData>) -> StepResult {
  let (app_state, order_id) = app_state_of(&ctx_data);
  let Some(composer) = app_state.providers.composer.clone() else {
    return Ok(PipelineControl::Continue);
  };
  let main = ctx_data
    .read()
    .main_video
    .clone()
    .ok_or_else(|| AppError::Internal("No video to compose".to_string()))?;

  let composed = composer.compose(order_id, main).await?;
  ctx_data.write().composed_video = Some(composed);
  Ok(PipelineControl::Continue)
}

#[instrument(name = "generation::upload_final_video", skip_all)]
async fn upload_final_video(ctx_data: ContextData<GenerationCtxData>) -> StepResult {
  let (app_state, order_id) = app_state_of(&ctx_data);
  let bytes = {
    let mut guard = ctx_data.write();
    guard.composed_video.take().or_else(|| guard.main_video.take())
  }
  .ok_or_else(|| AppError::Internal("No video bytes to upload".to_string()))?;

  let url = app_state
    .providers
    .storage
    .put_video(&final_video_key(order_id), bytes)
    .await?;
  ctx_data.write().final_video_url = Some(url);
  Ok(PipelineControl::Continue)
}

#[instrument(name = "generation::mark_completed", skip_all)]
async fn mark_completed(ctx_data: ContextData<GenerationCtxData>) -> StepResult {
  let (app_state, order_id) = app_state_of(&ctx_data);
  let url = ctx_data
    .read()
    .final_video_url
    .clone()
    .ok_or_else(|| AppError::Internal("No uploaded video URL".to_string()))?;

  let Some(order) = app_state.orders.complete(order_id, &url).await? else {
    info!(%order_id, "Order left `merging` before completion; skipping.");
    return Ok(PipelineControl::Stop);
  };
  info!(%order_id, video_url = %url, "Order completed.");
  let mut guard = ctx_data.write();
  guard.order = Some(order);
  guard.completed_in_this_run = true;
  Ok(PipelineControl::Continue)
}

/// Optional: notification failures never undo the completion.
#[instrument(name = "generation::send_completion_email", skip_all)]
async fn send_completion_email(ctx_data: ContextData<GenerationCtxData>) -> StepResult {
  let (app_state, _order_id) = app_state_of(&ctx_data);
  let order = ctx_data
    .read()
    .order
    .clone()
    .ok_or_else(|| AppError::Internal("No completed order to announce".to_string()))?;

  common_steps::send_completion_email(&app_state, &order).await?;
  ctx_data.write().notified = true;
  Ok(PipelineControl::Continue)
}

pub fn register_generation_pipeline(registry: &Arc<Registry<AppError>>, app_state: &AppState) {
  let only_after_completion: SkipCondition<GenerationCtxData> =
    Arc::new(|ctx_data: ContextData<GenerationCtxData>| !ctx_data.read().completed_in_this_run);

  let mut p = Pipeline::<GenerationCtxData, AppError>::new(&[
    ("load_order", false, None),
    ("generate_script", false, None),
    ("submit_video_job", false, None),
    ("await_video_render", false, None),
    ("download_rendered_video", false, None),
    ("upload_final_video", false, None),
    ("mark_completed", false, None),
    ("send_completion_email", true, Some(only_after_completion)),
  ]);

  p.on_root("load_order", load_order);
  p.on_root("generate_script", generate_script);
  p.on_root("submit_video_job", submit_video_job);
  p.on_root("await_video_render", await_video_render);
  p.on_root("download_rendered_video", download_rendered_video);
  p.on_root("upload_final_video", upload_final_video);
  p.on_root("mark_completed", mark_completed);
  p.on_root("send_completion_email", send_completion_email);

  if app_state.providers.composer.is_some() {
    p.insert_after_step("download_rendered_video", "compose_intro_outro", true, None);
    p.on_root("compose_intro_outro", compose_intro_outro);
  }

  registry.register_pipeline(p);
  info!(compose = app_state.providers.composer.is_some(), "Video generation pipeline registered.");
}

/// Runs the generation pipeline for `order_id` and records a failure on the
/// order when a step errors.
///
/// Returns `Err`, leaving the order untouched, for a transient error hit
/// before the run claimed the order, and when the failure itself could not be
/// recorded. The dispatcher retries both.
#[instrument(name = "generation::run", skip(app_state), fields(order_id = %order_id))]
pub async fn run_generation(app_state: &AppState, order_id: Uuid) -> AppResult<GenerationOutcome> {
  let ctx_data = ContextData::new(GenerationCtxData::new(app_state.clone(), order_id));

  match app_state.engine.run(ctx_data.clone()).await {
    Ok(PipelineResult::Completed) => {
      let guard = ctx_data.read();
      let video_url = guard
        .final_video_url
        .clone()
        .ok_or_else(|| AppError::Internal("Generation completed without a video URL".to_string()))?;
      Ok(GenerationOutcome::Completed {
        video_url,
        notified: guard.notified,
      })
    }
    Ok(PipelineResult::Stopped { step }) => Ok(GenerationOutcome::Skipped { step }),
    Err(run_error) if run_error.is_transient() && !ctx_data.read().claimed => {
      warn!(%order_id, error = %run_error, "Generation could not start; leaving the order for a retry.");
      Err(run_error)
    }
    Err(run_error) => {
      let message = run_error.failure_message();
      error!(%order_id, error = %run_error, "Generation failed.");
      match app_state.orders.mark_failed(order_id, &message).await? {
        Some(_) => info!(%order_id, "Order marked failed."),
        None => warn!(%order_id, "Order was already terminal; failure not recorded."),
      }
      Ok(GenerationOutcome::Failed { message })
    }
  }
}
