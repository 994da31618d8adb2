// fulfillment/src/pipelines/payment.rs

//! Payment confirmation webhook: exactly one `pending_payment → paid`
//! transition and one coupon redemption per order, however often the
//! processor redelivers. The generation request is written with the
//! transition; a redelivery for an order still `paid` requests it again,
//! which the generation run tolerates.

use crate::errors::AppError;
use crate::events::{EventName, OutboxEntry, PipelineEvent};
use crate::models::OrderStatus;
use crate::pipelines::common_steps::publish_event;
use crate::pipelines::contexts::{PaymentCtxData, PaymentOutcome};
use crate::state::AppState;
use serde::Deserialize;
use std::sync::Arc;
use stepflow::{ContextData, Pipeline, PipelineControl, Registry};
use tracing::{info, warn};
use uuid::Uuid;

pub const WEBHOOK_SECRET_HEADER: &str = "X-Webhook-Secret";
pub const PAYMENT_SUCCEEDED: &str = "payment.succeeded";

#[derive(Debug, Deserialize)]
pub struct PaymentWebhook {
  #[serde(rename = "type")]
  pub event_type: String,
  #[serde(default)]
  pub data: PaymentWebhookData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentWebhookData {
  pub order_id: Option<Uuid>,
}

/// Constant-time comparison of the shared secret.
fn secrets_match(expected: &str, provided: &str) -> bool {
  expected.len() == provided.len()
    && expected
      .bytes()
      .zip(provided.bytes())
      .fold(0u8, |acc, (a, b)| acc | (a ^ b))
      == 0
}

pub fn register_payment_pipeline(registry: &Arc<Registry<AppError>>, _app_state: &AppState) {
  let mut p = Pipeline::<PaymentCtxData, AppError>::new(&[
    ("verify_webhook_secret", false, None),
    ("parse_payload", false, None),
    ("confirm_payment", false, None),
  ]);

  p.on_root("verify_webhook_secret", |ctx_data: ContextData<PaymentCtxData>| {
    Box::pin(async move {
      let guard = ctx_data.read();
      let expected = &guard.app_state.config.webhook_secret;
      match guard.provided_secret.as_deref() {
        Some(provided) if secrets_match(expected, provided) => Ok(PipelineControl::Continue),
        Some(_) => {
          warn!("Payment webhook carried a wrong secret.");
          Err(AppError::Auth("Webhook secret verification failed.".to_string()))
        }
        None => {
          warn!("Payment webhook without secret header.");
          Err(AppError::Auth("Webhook secret missing.".to_string()))
        }
      }
    })
  });

  p.on_root("parse_payload", |ctx_data: ContextData<PaymentCtxData>| {
    Box::pin(async move {
      let raw_payload = ctx_data.read().raw_payload.clone();
      let webhook: PaymentWebhook = serde_json::from_slice(&raw_payload)
        .map_err(|e| AppError::Validation(format!("Invalid webhook payload: {}", e)))?;

      if webhook.event_type != PAYMENT_SUCCEEDED {
        info!(event_type = %webhook.event_type, "Ignoring payment webhook type.");
        ctx_data.write().outcome = PaymentOutcome::Ignored;
        return Ok(PipelineControl::Stop);
      }
      let order_id = webhook
        .data
        .order_id
        .ok_or_else(|| AppError::Validation("Webhook data.orderId is required.".to_string()))?;

      ctx_data.write().order_id = Some(order_id);
      Ok::<_, AppError>(PipelineControl::Continue)
    })
  });

  p.on_root("confirm_payment", |ctx_data: ContextData<PaymentCtxData>| {
    Box::pin(async move {
      let (app_state, order_id) = {
        let guard = ctx_data.read();
        (guard.app_state.clone(), guard.order_id)
      };
      let order_id = order_id.ok_or_else(|| AppError::Internal("Payment confirmation without order id".to_string()))?;

      let outbox = [
        OutboxEntry::immediate(EventName::GenerateVideoRequested),
        OutboxEntry::immediate(EventName::PaymentCompleted),
      ];
      match app_state.orders.confirm_payment(order_id, &outbox).await? {
        Some(order) => {
          info!(%order_id, coupon = ?order.coupon_code, "Payment confirmed.");
          let mut guard = ctx_data.write();
          guard.outcome = PaymentOutcome::Confirmed;
          guard.confirmed_order = Some(order);
          Ok::<_, AppError>(PipelineControl::Continue)
        }
        None => {
          let Some(current) = app_state.orders.find(order_id).await? else {
            return Err(AppError::NotFound(format!("Order {} not found", order_id)));
          };
          info!(%order_id, status = %current.status, "Order is no longer pending payment; treating webhook as a duplicate.");
          ctx_data.write().outcome = PaymentOutcome::Duplicate;
          if current.status == OrderStatus::Paid {
            publish_event(&app_state, PipelineEvent::new(EventName::GenerateVideoRequested, order_id)).await?;
          }
          Ok(PipelineControl::Stop)
        }
      }
    })
  });

  registry.register_pipeline(p);
  info!("Payment confirmation pipeline registered.");
}
