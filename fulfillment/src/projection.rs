// fulfillment/src/projection.rs

//! Read-only views of an order for customers and administrators.
//!
//! Nothing here writes or triggers pipeline work, so the customer view can be
//! polled as often as the rate limiter allows.

use crate::errors::{AppError, Result};
use crate::models::{ChildProfile, InvoiceDetails, Order, OrderStatus, StatusAudit};
use crate::store::OrderStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// What a customer sees while polling. Provider errors are never exposed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerOrderView {
  pub order_id: Uuid,
  pub status: OrderStatus,
  /// Rough completion percentage; `None` once the order failed.
  pub progress: Option<u8>,
  pub script: Option<String>,
  pub video_url: Option<String>,
  pub failure_notice: Option<String>,
  pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminOrderView {
  pub order_id: Uuid,
  pub customer_email: String,
  pub status: OrderStatus,
  pub child: ChildProfile,
  pub invoice: Option<InvoiceDetails>,
  pub base_price_cents: i32,
  pub discount_cents: i32,
  pub final_price_cents: i32,
  pub coupon_code: Option<String>,
  pub script: Option<String>,
  pub video_job_id: Option<String>,
  pub video_url: Option<String>,
  pub error_message: Option<String>,
  pub notified_at: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub audit_trail: Vec<StatusAudit>,
}

pub fn progress_of(status: OrderStatus) -> Option<u8> {
  match status {
    OrderStatus::PendingPayment => Some(0),
    OrderStatus::Paid => Some(10),
    OrderStatus::GeneratingScript => Some(25),
    OrderStatus::GeneratingVideo => Some(50),
    OrderStatus::Merging => Some(85),
    OrderStatus::Completed => Some(100),
    OrderStatus::Failed => None,
  }
}

pub fn failure_notice(order_id: Uuid) -> String {
  format!(
    "We could not finish your video. Please contact support and mention order {}.",
    order_id
  )
}

impl From<&Order> for CustomerOrderView {
  fn from(order: &Order) -> Self {
    let failed = order.status == OrderStatus::Failed;
    Self {
      order_id: order.id,
      status: order.status,
      progress: progress_of(order.status),
      script: order.script.clone(),
      video_url: order.video_url.clone(),
      failure_notice: failed.then(|| failure_notice(order.id)),
      updated_at: order.updated_at,
    }
  }
}

impl AdminOrderView {
  pub fn new(order: Order, audit_trail: Vec<StatusAudit>) -> Self {
    Self {
      order_id: order.id,
      customer_email: order.customer_email,
      status: order.status,
      child: order.child.0,
      invoice: order.invoice.map(|invoice| invoice.0),
      base_price_cents: order.base_price_cents,
      discount_cents: order.discount_cents,
      final_price_cents: order.final_price_cents,
      coupon_code: order.coupon_code,
      script: order.script,
      video_job_id: order.video_job_id,
      video_url: order.video_url,
      error_message: order.error_message,
      notified_at: order.notified_at,
      created_at: order.created_at,
      updated_at: order.updated_at,
      audit_trail,
    }
  }
}

/// Customer lookup. The email acts as a lightweight capability check: a
/// mismatch is reported exactly like an unknown order.
pub async fn customer_status(orders: &dyn OrderStore, order_id: Uuid, email: &str) -> Result<CustomerOrderView> {
  orders
    .find_for_customer(order_id, email)
    .await?
    .map(|order| CustomerOrderView::from(&order))
    .ok_or_else(|| AppError::NotFound(format!("Order {} not found", order_id)))
}

pub async fn admin_status(orders: &dyn OrderStore, order_id: Uuid) -> Result<AdminOrderView> {
  let order = orders
    .find(order_id)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Order {} not found", order_id)))?;
  let audit_trail = orders.audit_trail(order_id).await?;
  Ok(AdminOrderView::new(order, audit_trail))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::{BehaviorCategory, ChildGender, NewOrder};

  fn order(status: OrderStatus) -> Order {
    let new = NewOrder {
      customer_email: "parent@example.com".to_string(),
      child: ChildProfile {
        name: "Ada".to_string(),
        age: 7,
        gender: ChildGender::Girl,
        achievements: "learned to ride a bike".to_string(),
        preferences: "dinosaurs".to_string(),
        behavior: BehaviorCategory::Nice,
      },
      invoice: None,
      base_price_cents: 8900,
      discount_cents: 0,
      final_price_cents: 8900,
      coupon_code: None,
      status,
    };
    Order::from_new(Uuid::new_v4(), new, Utc::now())
  }

  #[test]
  fn failed_orders_show_a_generic_notice() {
    let mut failed = order(OrderStatus::Failed);
    failed.error_message = Some("avatar render error".to_string());
    let view = CustomerOrderView::from(&failed);

    let notice = view.failure_notice.unwrap();
    assert!(notice.contains(&failed.id.to_string()));
    assert!(!notice.contains("avatar"));
    assert_eq!(view.progress, None);
  }

  #[test]
  fn progress_grows_along_the_forward_path() {
    let values: Vec<u8> = OrderStatus::FORWARD_PATH
      .iter()
      .filter_map(|status| progress_of(*status))
      .collect();
    assert_eq!(values.len(), OrderStatus::FORWARD_PATH.len());
    assert!(values.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(values.last(), Some(&100));
  }

  #[test]
  fn in_progress_orders_have_no_notice() {
    let view = CustomerOrderView::from(&order(OrderStatus::GeneratingVideo));
    assert!(view.failure_notice.is_none());
    assert_eq!(view.progress, Some(50));
  }
}
