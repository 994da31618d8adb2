// fulfillment/src/store/memory.rs

//! In-process store used by tests and by local runs without `DATABASE_URL`.
//!
//! Outbox events are handed to the configured publisher right after the write
//! they belong to; a write whose events cannot be handed over reports the
//! publish error.

use super::{
  coupon_exhausted, ensure_forward_edge, ensure_overridable, override_error_message, CouponStore, OrderStore,
  OverrideRequest,
};
use crate::errors::{AppError, Result};
use crate::events::{EventPublisher, OutboxEntry, PipelineEvent};
use crate::models::{Coupon, NewOrder, Order, OrderStatus, StatusAudit};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
  orders: HashMap<Uuid, Order>,
  coupons: HashMap<String, Coupon>,
  audits: Vec<StatusAudit>,
}

impl MemoryState {
  /// Counts one use of `code` if it has uses left.
  fn redeem_coupon(&mut self, code: &str) -> bool {
    match self.coupons.get_mut(&code.to_uppercase()) {
      Some(coupon) if coupon.has_uses_left() => {
        coupon.times_used += 1;
        true
      }
      _ => false,
    }
  }

  fn release_coupon(&mut self, code: &str) {
    if let Some(coupon) = self.coupons.get_mut(&code.to_uppercase()) {
      coupon.times_used = (coupon.times_used - 1).max(0);
    }
  }
}

pub struct MemoryStore {
  state: Mutex<MemoryState>,
  outbox: Arc<dyn EventPublisher>,
}

impl MemoryStore {
  pub fn new(outbox: Arc<dyn EventPublisher>) -> Self {
    Self {
      state: Mutex::new(MemoryState::default()),
      outbox,
    }
  }

  pub fn with_coupons(outbox: Arc<dyn EventPublisher>, coupons: impl IntoIterator<Item = Coupon>) -> Self {
    let store = Self::new(outbox);
    for coupon in coupons {
      store.put_coupon(coupon);
    }
    store
  }

  pub fn put_coupon(&self, coupon: Coupon) {
    self.state.lock().coupons.insert(coupon.code.to_uppercase(), coupon);
  }

  pub fn order_count(&self) -> usize {
    self.state.lock().orders.len()
  }

  pub fn coupon(&self, code: &str) -> Option<Coupon> {
    self.state.lock().coupons.get(&code.to_uppercase()).cloned()
  }

  /// Applies `f` to a stored order if its status is in `allowed`.
  fn update_if(&self, id: Uuid, allowed: impl Fn(OrderStatus) -> bool, f: impl FnOnce(&mut Order)) -> Option<Order> {
    let mut state = self.state.lock();
    let order = state.orders.get_mut(&id)?;
    if !allowed(order.status) {
      debug!(order_id = %id, status = %order.status, "Conditional update skipped.");
      return None;
    }
    f(order);
    order.updated_at = Utc::now();
    Some(order.clone())
  }

  /// Publishes every event, returning the first failure.
  async fn publish_outbox(&self, order_id: Uuid, outbox: &[OutboxEntry]) -> Result<()> {
    let mut first_error = None;
    for entry in outbox {
      let event: PipelineEvent = entry.for_order(order_id);
      if let Err(e) = self.outbox.publish(event).await {
        error!(%order_id, event = %entry.name, error = %e, "Failed to hand over outbox event.");
        first_error.get_or_insert(e);
      }
    }
    first_error.map_or(Ok(()), Err)
  }
}

#[async_trait]
impl OrderStore for MemoryStore {
  async fn insert(&self, new_order: NewOrder, outbox: &[OutboxEntry]) -> Result<Order> {
    let order = Order::from_new(Uuid::new_v4(), new_order, Utc::now());
    let redeemed = match (order.status, order.coupon_code.as_deref()) {
      (OrderStatus::Paid, Some(code)) => Some(code),
      _ => None,
    };
    {
      let mut state = self.state.lock();
      if let Some(code) = redeemed {
        if !state.redeem_coupon(code) {
          return Err(coupon_exhausted(code));
        }
      }
      state.orders.insert(order.id, order.clone());
    }

    if let Err(e) = self.publish_outbox(order.id, outbox).await {
      // The id was never returned, so the insert can be undone as a whole.
      let mut state = self.state.lock();
      state.orders.remove(&order.id);
      if let Some(code) = redeemed {
        state.release_coupon(code);
      }
      return Err(e);
    }
    Ok(order)
  }

  async fn find(&self, id: Uuid) -> Result<Option<Order>> {
    Ok(self.state.lock().orders.get(&id).cloned())
  }

  async fn find_for_customer(&self, id: Uuid, email: &str) -> Result<Option<Order>> {
    Ok(self.state.lock().orders.get(&id).filter(|o| o.belongs_to(email)).cloned())
  }

  #[instrument(skip(self))]
  async fn advance_status(&self, id: Uuid, from: OrderStatus, to: OrderStatus) -> Result<Option<Order>> {
    ensure_forward_edge(from, to)?;
    Ok(self.update_if(id, |current| current == from, |order| order.status = to))
  }

  async fn save_script(&self, id: Uuid, script: &str) -> Result<()> {
    self.update_if(id, |_| true, |order| order.script = Some(script.to_string()));
    Ok(())
  }

  async fn save_video_job(&self, id: Uuid, job_id: &str) -> Result<()> {
    self.update_if(id, |_| true, |order| order.video_job_id = Some(job_id.to_string()));
    Ok(())
  }

  async fn complete(&self, id: Uuid, video_url: &str) -> Result<Option<Order>> {
    Ok(self.update_if(
      id,
      |current| current == OrderStatus::Merging,
      |order| {
        order.status = OrderStatus::Completed;
        order.video_url = Some(video_url.to_string());
        order.error_message = None;
      },
    ))
  }

  async fn mark_failed(&self, id: Uuid, message: &str) -> Result<Option<Order>> {
    Ok(self.update_if(
      id,
      |current| !current.is_terminal(),
      |order| {
        order.status = OrderStatus::Failed;
        order.error_message = Some(message.to_string());
        order.video_url = None;
      },
    ))
  }

  async fn confirm_payment(&self, id: Uuid, outbox: &[OutboxEntry]) -> Result<Option<Order>> {
    let confirmed = {
      let mut state = self.state.lock();
      let Some(order) = state.orders.get_mut(&id) else {
        return Ok(None);
      };
      if order.status != OrderStatus::PendingPayment {
        return Ok(None);
      }
      order.status = OrderStatus::Paid;
      order.updated_at = Utc::now();
      let confirmed = order.clone();

      if let Some(code) = confirmed.coupon_code.as_deref() {
        if !state.redeem_coupon(code) {
          warn!(order_id = %id, coupon = %code, "Coupon has no uses left; payment confirmed without counting it.");
        }
      }
      confirmed
    };

    // The status write stays; a redelivered webhook re-announces generation.
    self.publish_outbox(id, outbox).await?;
    Ok(Some(confirmed))
  }

  async fn override_status(&self, id: Uuid, request: &OverrideRequest) -> Result<Order> {
    let mut state = self.state.lock();
    let order = state
      .orders
      .get_mut(&id)
      .ok_or_else(|| AppError::NotFound(format!("Order {} not found", id)))?;
    ensure_overridable(order, request)?;

    let from = order.status;
    order.error_message = override_error_message(order, request);
    if request.to != OrderStatus::Completed {
      order.video_url = None;
    }
    order.status = request.to;
    order.updated_at = Utc::now();
    let updated = order.clone();

    state.audits.push(StatusAudit {
      id: Uuid::new_v4(),
      order_id: id,
      from_status: from,
      to_status: request.to,
      actor: request.actor.clone(),
      reason: request.reason.clone(),
      created_at: updated.updated_at,
    });
    Ok(updated)
  }

  async fn audit_trail(&self, id: Uuid) -> Result<Vec<StatusAudit>> {
    Ok(self.state.lock().audits.iter().filter(|a| a.order_id == id).cloned().collect())
  }

  async fn mark_notified(&self, id: Uuid) -> Result<()> {
    self.update_if(id, |_| true, |order| order.notified_at = Some(Utc::now()));
    Ok(())
  }
}

#[async_trait]
impl CouponStore for MemoryStore {
  async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>> {
    Ok(self.coupon(code))
  }
}
