// fulfillment/src/pipelines/contexts.rs

//! Data carried through one pipeline run, wrapped in `stepflow::ContextData`.
//!
//! Durable state lives in the order row; these structs only hold what one
//! step hands to the next within a single run.

use crate::models::{Coupon, Order};
use crate::pipelines::intake::CreateOrderRequest;
use crate::services::pricing::PriceQuote;
use crate::state::AppState;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone)]
pub struct IntakeCtxData {
  pub app_state: AppState,
  pub request: CreateOrderRequest,
  pub coupon: Option<Coupon>,
  pub quote: Option<PriceQuote>,
  pub order: Option<Order>,
}

impl IntakeCtxData {
  pub fn new(app_state: AppState, request: CreateOrderRequest) -> Self {
    Self {
      app_state,
      request,
      coupon: None,
      quote: None,
      order: None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
  Received,
  Confirmed,
  /// The order had already left `pending_payment` (duplicate delivery).
  Duplicate,
  /// A webhook type this service does not act on.
  Ignored,
}

#[derive(Clone)]
pub struct PaymentCtxData {
  pub app_state: AppState,
  pub raw_payload: Vec<u8>,
  pub provided_secret: Option<String>,
  pub order_id: Option<Uuid>,
  pub outcome: PaymentOutcome,
  pub confirmed_order: Option<Order>,
}

impl PaymentCtxData {
  pub fn new(app_state: AppState, raw_payload: Vec<u8>, provided_secret: Option<String>) -> Self {
    Self {
      app_state,
      raw_payload,
      provided_secret,
      order_id: None,
      outcome: PaymentOutcome::Received,
      confirmed_order: None,
    }
  }
}

#[derive(Clone)]
pub struct GenerationCtxData {
  pub app_state: AppState,
  pub order_id: Uuid,
  pub order: Option<Order>,
  pub script: Option<String>,
  pub job_id: Option<String>,
  pub rendered_video_url: Option<String>,
  pub main_video: Option<Vec<u8>>,
  pub composed_video: Option<Vec<u8>>,
  pub final_video_url: Option<String>,
  /// Set once this run has moved the order out of `paid`.
  pub claimed: bool,
  /// Set by `mark_completed`; the completion email only goes out in the run
  /// that performed the transition.
  pub completed_in_this_run: bool,
  pub notified: bool,
}

impl GenerationCtxData {
  pub fn new(app_state: AppState, order_id: Uuid) -> Self {
    Self {
      app_state,
      order_id,
      order: None,
      script: None,
      job_id: None,
      rendered_video_url: None,
      main_video: None,
      composed_video: None,
      final_video_url: None,
      claimed: false,
      completed_in_this_run: false,
      notified: false,
    }
  }
}
