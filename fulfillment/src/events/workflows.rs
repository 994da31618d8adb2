// fulfillment/src/events/workflows.rs

//! Workflows bound to each event name.

use super::dispatcher::{Dispatcher, RetryPolicy, Workflow};
use super::{EventName, PipelineEvent};
use crate::errors::{AppError, Result};
use crate::models::OrderStatus;
use crate::pipelines::{run_generation, GenerationOutcome};
use crate::services::mailer::{payment_receipt_email, payment_reminder_email};
use crate::state::AppState;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

/// `video/generate.requested` → full generation run.
pub struct GenerationWorkflow {
  state: AppState,
}

impl GenerationWorkflow {
  pub fn new(state: AppState) -> Self {
    Self { state }
  }
}

#[async_trait]
impl Workflow for GenerationWorkflow {
  fn name(&self) -> &'static str {
    "generate_video"
  }

  async fn handle(&self, event: &PipelineEvent) -> Result<()> {
    match run_generation(&self.state, event.order_id).await? {
      GenerationOutcome::Completed { video_url, notified } => {
        info!(order_id = %event.order_id, %video_url, notified, "Generation run completed.");
      }
      GenerationOutcome::Skipped { step } => {
        info!(order_id = %event.order_id, %step, "Generation run skipped.");
      }
      GenerationOutcome::Failed { message } => {
        warn!(order_id = %event.order_id, %message, "Generation run failed.");
      }
    }
    Ok(())
  }

  async fn on_failure(&self, event: &PipelineEvent, last_error: &str) {
    let message = format!("Generation failed after retries: {}", last_error);
    match self.state.orders.mark_failed(event.order_id, &message).await {
      Ok(Some(_)) => warn!(order_id = %event.order_id, "Order marked failed by retry exhaustion."),
      Ok(None) => info!(order_id = %event.order_id, "Order already terminal; nothing to mark."),
      Err(e) => error!(order_id = %event.order_id, error = %e, "Could not mark order failed."),
    }
  }
}

/// `order/created` (delayed) → reminder email while payment is outstanding.
pub struct PaymentReminderWorkflow {
  state: AppState,
}

impl PaymentReminderWorkflow {
  pub fn new(state: AppState) -> Self {
    Self { state }
  }
}

#[async_trait]
impl Workflow for PaymentReminderWorkflow {
  fn name(&self) -> &'static str {
    "payment_reminder"
  }

  async fn handle(&self, event: &PipelineEvent) -> Result<()> {
    let Some(order) = self.state.orders.find(event.order_id).await? else {
      warn!(order_id = %event.order_id, "Reminder for an unknown order; dropping.");
      return Ok(());
    };
    if order.status != OrderStatus::PendingPayment {
      info!(order_id = %order.id, status = %order.status, "Order no longer awaits payment; no reminder.");
      return Ok(());
    }

    let message = payment_reminder_email(&order, &self.state.config.app_base_url)?;
    let sent = self.state.providers.mailer.send(&message).await.map_err(AppError::from)?;
    info!(order_id = %order.id, message_id = %sent.message_id, "Payment reminder sent.");
    Ok(())
  }

  async fn on_failure(&self, event: &PipelineEvent, last_error: &str) {
    error!(order_id = %event.order_id, error = %last_error, "Payment reminder abandoned.");
  }
}

/// `order/payment.completed` → receipt email.
pub struct PaymentReceiptWorkflow {
  state: AppState,
}

impl PaymentReceiptWorkflow {
  pub fn new(state: AppState) -> Self {
    Self { state }
  }
}

#[async_trait]
impl Workflow for PaymentReceiptWorkflow {
  fn name(&self) -> &'static str {
    "payment_receipt"
  }

  async fn handle(&self, event: &PipelineEvent) -> Result<()> {
    let order = self
      .state
      .orders
      .find(event.order_id)
      .await?
      .ok_or_else(|| AppError::NotFound(format!("Order {} not found", event.order_id)))?;

    let message = payment_receipt_email(&order)?;
    let sent = self.state.providers.mailer.send(&message).await.map_err(AppError::from)?;
    info!(order_id = %order.id, message_id = %sent.message_id, "Payment receipt sent.");
    Ok(())
  }

  async fn on_failure(&self, event: &PipelineEvent, last_error: &str) {
    error!(order_id = %event.order_id, error = %last_error, "Payment receipt abandoned.");
  }
}

/// The dispatcher with one workflow per event name.
pub fn build_dispatcher(state: &AppState) -> Dispatcher {
  Dispatcher::new(RetryPolicy::from(&state.config.dispatcher))
    .route(
      EventName::GenerateVideoRequested,
      Arc::new(GenerationWorkflow::new(state.clone())),
    )
    .route(
      EventName::OrderCreated,
      Arc::new(PaymentReminderWorkflow::new(state.clone())),
    )
    .route(
      EventName::PaymentCompleted,
      Arc::new(PaymentReceiptWorkflow::new(state.clone())),
    )
}
