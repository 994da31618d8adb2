// fulfillment/src/web/handlers/admin_handlers.rs

use actix_web::{web, FromRequest, HttpRequest, HttpResponse};
use futures_util::future::{ready, Ready};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::{EventName, PipelineEvent};
use crate::models::OrderStatus;
use crate::pipelines::common_steps;
use crate::projection;
use crate::services::admin_auth::verify_admin_token;
use crate::state::AppState;
use crate::store::OverrideRequest;

pub const ADMIN_ACTOR_HEADER: &str = "X-Admin-Actor";

/// An operator authenticated by the admin bearer token.
#[derive(Debug, Clone)]
pub struct AdminUser {
  pub actor: String,
}

fn authenticate(req: &HttpRequest) -> Result<AdminUser, AppError> {
  let app_state = req
    .app_data::<web::Data<AppState>>()
    .ok_or_else(|| AppError::Internal("Application state is not configured.".to_string()))?;
  let stored_hash = app_state
    .config
    .admin_token_hash
    .as_deref()
    .ok_or_else(|| AppError::Auth("Admin access is not configured.".to_string()))?;

  let token = req
    .headers()
    .get("Authorization")
    .and_then(|value| value.to_str().ok())
    .and_then(|value| value.strip_prefix("Bearer "))
    .map(str::trim)
    .ok_or_else(|| AppError::Auth("Admin bearer token required.".to_string()))?;

  if !verify_admin_token(stored_hash, token)? {
    warn!("Rejected admin request with an invalid token.");
    return Err(AppError::Auth("Invalid admin token.".to_string()));
  }

  let actor = req
    .headers()
    .get(ADMIN_ACTOR_HEADER)
    .and_then(|value| value.to_str().ok())
    .map(str::trim)
    .filter(|value| !value.is_empty())
    .unwrap_or("admin")
    .to_string();
  Ok(AdminUser { actor })
}

impl FromRequest for AdminUser {
  type Error = AppError;
  type Future = Ready<Result<Self, Self::Error>>;

  fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
    ready(authenticate(req))
  }
}

#[derive(Debug, Deserialize)]
pub struct OverrideStatusPayload {
  pub status: OrderStatus,
  #[serde(default)]
  pub reason: Option<String>,
}

#[instrument(name = "handler::admin_order_detail", skip(app_state, admin), fields(actor = %admin.actor))]
pub async fn order_detail_handler(
  app_state: web::Data<AppState>,
  admin: AdminUser,
  order_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
  let view = projection::admin_status(app_state.orders.as_ref(), order_id.into_inner()).await?;
  Ok(HttpResponse::Ok().json(view))
}

/// Direct status write. Never triggers pipeline work.
#[instrument(
    name = "handler::admin_override_status",
    skip(app_state, admin, req_payload),
    fields(actor = %admin.actor, to = %req_payload.status)
)]
pub async fn override_status_handler(
  app_state: web::Data<AppState>,
  admin: AdminUser,
  order_id: web::Path<Uuid>,
  req_payload: web::Json<OverrideStatusPayload>,
) -> Result<HttpResponse, AppError> {
  let order_id = order_id.into_inner();
  let payload = req_payload.into_inner();
  let before = app_state
    .orders
    .find(order_id)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Order {} not found", order_id)))?;

  let request = OverrideRequest {
    to: payload.status,
    actor: admin.actor.clone(),
    reason: payload.reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty()),
  };
  app_state.orders.override_status(order_id, &request).await?;
  warn!(
    target: "audit",
    %order_id,
    actor = %request.actor,
    from = %before.status,
    to = %request.to,
    reason = ?request.reason,
    "Order status overridden by an administrator."
  );

  let view = projection::admin_status(app_state.orders.as_ref(), order_id).await?;
  Ok(HttpResponse::Ok().json(view))
}

#[instrument(name = "handler::admin_resend_notification", skip(app_state, admin), fields(actor = %admin.actor))]
pub async fn resend_notification_handler(
  app_state: web::Data<AppState>,
  admin: AdminUser,
  order_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
  let order_id = order_id.into_inner();
  let order = app_state
    .orders
    .find(order_id)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Order {} not found", order_id)))?;
  if order.status != OrderStatus::Completed {
    return Err(AppError::Conflict(format!(
      "Only completed orders can be re-notified; order {} is {}.",
      order_id, order.status
    )));
  }

  let sent = common_steps::send_completion_email(&app_state, &order).await?;
  info!(%order_id, message_id = %sent.message_id, "Completion email re-sent.");
  Ok(HttpResponse::Ok().json(json!({ "orderId": order_id, "messageId": sent.message_id })))
}

/// Re-emits the generation request for a `paid` order. A failed order must be
/// moved back to `paid` with an override first.
#[instrument(name = "handler::admin_requeue_generation", skip(app_state, admin), fields(actor = %admin.actor))]
pub async fn requeue_generation_handler(
  app_state: web::Data<AppState>,
  admin: AdminUser,
  order_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
  let order_id = order_id.into_inner();
  let order = app_state
    .orders
    .find(order_id)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Order {} not found", order_id)))?;
  if order.status != OrderStatus::Paid {
    return Err(AppError::Conflict(format!(
      "Only paid orders can be requeued; order {} is {}.",
      order_id, order.status
    )));
  }

  let event = PipelineEvent::new(EventName::GenerateVideoRequested, order_id);
  let event_id = event.id;
  app_state.events.publish(event).await?;
  warn!(target: "audit", %order_id, actor = %admin.actor, %event_id, "Generation requeued by an administrator.");
  Ok(HttpResponse::Accepted().json(json!({ "orderId": order_id, "eventId": event_id })))
}
