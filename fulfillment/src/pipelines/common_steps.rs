// fulfillment/src/pipelines/common_steps.rs

//! Steps and helpers shared by several pipelines and by admin operations.

use crate::errors::{AppError, Result as AppResult};
use crate::events::PipelineEvent;
use crate::models::Order;
use crate::services::mailer::{completion_email, SentEmail};
use crate::state::AppState;
use tracing::{error, info, instrument, warn};

/// Publishes `event`. A failure is logged and returned, so the caller's
/// request fails and its sender retries.
#[instrument(name = "common_step::publish_event", skip(app_state), fields(event = %event.name, order_id = %event.order_id), err(Display))]
pub async fn publish_event(app_state: &AppState, event: PipelineEvent) -> AppResult<()> {
  app_state.events.publish(event).await.map_err(|e| {
    error!(error = %e, "Failed to publish event.");
    e
  })?;
  info!("Event published.");
  Ok(())
}

/// Sends the "your video is ready" email and records `notified_at`.
#[instrument(name = "common_step::send_completion_email", skip(app_state, order), fields(order_id = %order.id), err(Display))]
pub async fn send_completion_email(app_state: &AppState, order: &Order) -> AppResult<SentEmail> {
  let video_url = order
    .video_url
    .as_deref()
    .ok_or_else(|| AppError::Conflict(format!("Order {} has no video to announce", order.id)))?;

  let message = completion_email(order, video_url)?;
  let sent = app_state.providers.mailer.send(&message).await.map_err(|e| {
    warn!(error = %e, "Completion email failed.");
    AppError::from(e)
  })?;
  info!(message_id = %sent.message_id, "Completion email sent.");

  app_state.orders.mark_notified(order.id).await?;
  Ok(sent)
}
