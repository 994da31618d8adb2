// fulfillment/src/web/handlers/webhook_handlers.rs

use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;
use stepflow::{ContextData, PipelineResult};
use tracing::{info, instrument, warn};

use crate::errors::AppError;
use crate::pipelines::contexts::PaymentCtxData;
use crate::pipelines::payment::WEBHOOK_SECRET_HEADER;
use crate::state::AppState;

/// Payment processor callback. Duplicates and unrelated event types are
/// acknowledged with 200 so the processor stops redelivering them.
#[instrument(name = "handler::payment_webhook", skip(app_state, req, body), fields(payload_bytes = body.len()))]
pub async fn payment_webhook_handler(
  app_state: web::Data<AppState>,
  req: HttpRequest,
  body: web::Bytes,
) -> Result<HttpResponse, AppError> {
  let provided_secret = req
    .headers()
    .get(WEBHOOK_SECRET_HEADER)
    .and_then(|value| value.to_str().ok())
    .map(String::from);

  let ctx_data = ContextData::new(PaymentCtxData::new(
    app_state.get_ref().clone(),
    body.to_vec(),
    provided_secret,
  ));

  let result = app_state.engine.run(ctx_data.clone()).await.map_err(|e| {
    warn!(error = %e, "Payment webhook rejected.");
    e
  })?;

  let guard = ctx_data.read();
  match result {
    PipelineResult::Completed => info!(order_id = ?guard.order_id, "Payment webhook processed."),
    PipelineResult::Stopped { step } => info!(%step, outcome = ?guard.outcome, "Payment webhook acknowledged without changes."),
  }
  Ok(HttpResponse::Ok().json(json!({
    "outcome": guard.outcome,
    "orderId": guard.order_id,
  })))
}
