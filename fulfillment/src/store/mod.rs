// fulfillment/src/store/mod.rs

//! Order Store: the single source of truth for order state.
//!
//! Every status write is a compare-and-set on the current status. A write
//! whose precondition does not hold changes nothing and returns `None`; the
//! pipeline treats that as "someone else already did this" and stops quietly.

pub mod memory;
pub mod postgres;

use crate::errors::Result;
use crate::events::OutboxEntry;
use crate::models::{Coupon, NewOrder, Order, OrderStatus, StatusAudit};
use async_trait::async_trait;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Who changed an order by hand, and why.
#[derive(Debug, Clone)]
pub struct OverrideRequest {
  pub to: OrderStatus,
  pub actor: String,
  pub reason: Option<String>,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
  /// Inserts the order and records `outbox` for it in the same write. An
  /// order inserted as `paid` (free) redeems its coupon there too, and is
  /// rejected when the coupon has no uses left.
  async fn insert(&self, new_order: NewOrder, outbox: &[OutboxEntry]) -> Result<Order>;

  async fn find(&self, id: Uuid) -> Result<Option<Order>>;

  /// Returns the order only when `email` matches the customer email.
  async fn find_for_customer(&self, id: Uuid, email: &str) -> Result<Option<Order>>;

  /// Moves `id` from `from` to `to` if it is currently in `from`.
  async fn advance_status(&self, id: Uuid, from: OrderStatus, to: OrderStatus) -> Result<Option<Order>>;

  async fn save_script(&self, id: Uuid, script: &str) -> Result<()>;

  async fn save_video_job(&self, id: Uuid, job_id: &str) -> Result<()>;

  /// `merging → completed`, storing the hosted video URL.
  async fn complete(&self, id: Uuid, video_url: &str) -> Result<Option<Order>>;

  /// Any non-terminal status → `failed`, storing `message`.
  async fn mark_failed(&self, id: Uuid, message: &str) -> Result<Option<Order>>;

  /// `pending_payment → paid` and, in the same transaction, one use of the
  /// order's coupon (only while it has uses left) plus the `outbox` events.
  /// `None` when the order was not pending.
  async fn confirm_payment(&self, id: Uuid, outbox: &[OutboxEntry]) -> Result<Option<Order>>;

  /// Direct administrative write, recorded in the audit table.
  async fn override_status(&self, id: Uuid, request: &OverrideRequest) -> Result<Order>;

  async fn audit_trail(&self, id: Uuid) -> Result<Vec<StatusAudit>>;

  async fn mark_notified(&self, id: Uuid) -> Result<()>;
}

#[async_trait]
pub trait CouponStore: Send + Sync {
  async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>>;
}

pub(crate) fn coupon_exhausted(code: &str) -> crate::errors::AppError {
  crate::errors::AppError::Validation(format!("Coupon '{}' has no uses left.", code))
}

pub(crate) fn ensure_forward_edge(from: OrderStatus, to: OrderStatus) -> Result<()> {
  if to == OrderStatus::Failed || !from.can_transition_to(to) {
    return Err(crate::errors::AppError::Internal(format!(
      "Illegal pipeline transition {} -> {}",
      from, to
    )));
  }
  Ok(())
}

pub(crate) fn ensure_overridable(order: &Order, request: &OverrideRequest) -> Result<()> {
  if request.to == OrderStatus::Completed && order.video_url.is_none() {
    return Err(crate::errors::AppError::Validation(
      "An order without a video URL cannot be marked completed".to_string(),
    ));
  }
  Ok(())
}

/// `error_message` an override leaves behind.
pub(crate) fn override_error_message(order: &Order, request: &OverrideRequest) -> Option<String> {
  if request.to != OrderStatus::Failed {
    return None;
  }
  request
    .reason
    .clone()
    .or_else(|| order.error_message.clone())
    .or_else(|| Some("Marked failed by an administrator".to_string()))
}
