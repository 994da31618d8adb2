// fulfillment/src/web/handlers/order_handlers.rs

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use stepflow::{ContextData, PipelineResult};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::OrderStatus;
use crate::pipelines::contexts::IntakeCtxData;
use crate::pipelines::intake::CreateOrderRequest;
use crate::projection;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
  pub email: String,
}

#[instrument(
    name = "handler::create_order",
    skip(app_state, req_payload),
    fields(coupon = ?req_payload.coupon_code)
)]
pub async fn create_order_handler(
  app_state: web::Data<AppState>,
  req_payload: web::Json<CreateOrderRequest>,
) -> Result<HttpResponse, AppError> {
  let ctx_data = ContextData::new(IntakeCtxData::new(app_state.get_ref().clone(), req_payload.into_inner()));

  match app_state.engine.run(ctx_data.clone()).await? {
    PipelineResult::Completed => {
      let guard = ctx_data.read();
      let order = guard.order.as_ref().ok_or_else(|| {
        warn!("Intake pipeline completed without an order.");
        AppError::Internal("Order intake finished without creating an order.".to_string())
      })?;
      info!(order_id = %order.id, status = %order.status, "Order accepted.");

      Ok(HttpResponse::Created().json(json!({
        "orderId": order.id,
        "status": order.status,
        "basePriceCents": order.base_price_cents,
        "discountCents": order.discount_cents,
        "finalPriceCents": order.final_price_cents,
        "couponCode": order.coupon_code,
        "paymentRequired": order.status == OrderStatus::PendingPayment,
      })))
    }
    PipelineResult::Stopped { step } => {
      warn!(%step, "Intake pipeline stopped unexpectedly.");
      Err(AppError::Internal(format!("Order intake halted at step '{}'.", step)))
    }
  }
}

/// Rate-limit key: the socket peer's IP, or the forwarded client address when
/// the proxy in front is trusted to set it.
fn client_key(req: &HttpRequest, trust_proxy_headers: bool) -> String {
  if trust_proxy_headers {
    if let Some(forwarded) = req.connection_info().realip_remote_addr() {
      return forwarded.to_string();
    }
  }
  req
    .peer_addr()
    .map(|addr| addr.ip().to_string())
    .unwrap_or_else(|| "unknown".to_string())
}

#[instrument(name = "handler::order_status", skip(app_state, req, query), fields(order_id = %order_id))]
pub async fn order_status_handler(
  app_state: web::Data<AppState>,
  req: HttpRequest,
  order_id: web::Path<Uuid>,
  query: web::Query<StatusQuery>,
) -> Result<HttpResponse, AppError> {
  let caller = client_key(&req, app_state.config.trust_proxy_headers);
  if !app_state.status_limiter.check(&caller) {
    warn!(%caller, "Status polling rate limit hit.");
    return Err(AppError::RateLimited);
  }

  let view = projection::customer_status(app_state.orders.as_ref(), order_id.into_inner(), &query.email).await?;
  Ok(HttpResponse::Ok().json(view))
}
