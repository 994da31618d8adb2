// fulfillment/src/models/order.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, Type as SqlxType};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle of an order. Matches the `order_status` enum in schema.sql.
///
/// The forward path is `pending_payment → paid → generating_script →
/// generating_video → merging → completed`; `failed` can be entered from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, SqlxType)]
#[sqlx(type_name = "order_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
  PendingPayment,
  Paid,
  GeneratingScript,
  GeneratingVideo,
  Merging,
  Completed,
  Failed,
}

impl OrderStatus {
  pub const FORWARD_PATH: [OrderStatus; 6] = [
    OrderStatus::PendingPayment,
    OrderStatus::Paid,
    OrderStatus::GeneratingScript,
    OrderStatus::GeneratingVideo,
    OrderStatus::Merging,
    OrderStatus::Completed,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      OrderStatus::PendingPayment => "pending_payment",
      OrderStatus::Paid => "paid",
      OrderStatus::GeneratingScript => "generating_script",
      OrderStatus::GeneratingVideo => "generating_video",
      OrderStatus::Merging => "merging",
      OrderStatus::Completed => "completed",
      OrderStatus::Failed => "failed",
    }
  }

  pub fn is_terminal(&self) -> bool {
    matches!(self, OrderStatus::Completed | OrderStatus::Failed)
  }

  fn position(&self) -> Option<usize> {
    Self::FORWARD_PATH.iter().position(|s| s == self)
  }

  /// Whether the pipeline may move an order from `self` to `next`.
  pub fn can_transition_to(&self, next: OrderStatus) -> bool {
    if next == OrderStatus::Failed {
      return !self.is_terminal();
    }
    match (self.position(), next.position()) {
      (Some(from), Some(to)) => to == from + 1,
      _ => false,
    }
  }
}

impl fmt::Display for OrderStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for OrderStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    OrderStatus::FORWARD_PATH
      .iter()
      .chain(std::iter::once(&OrderStatus::Failed))
      .find(|status| status.as_str() == s)
      .copied()
      .ok_or_else(|| format!("unknown order status '{}'", s))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorCategory {
  Nice,
  MostlyNice,
  Improving,
  Mischievous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildGender {
  Boy,
  Girl,
  Unspecified,
}

/// Personalization captured by the order form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildProfile {
  pub name: String,
  pub age: u8,
  pub gender: ChildGender,
  pub achievements: String,
  pub preferences: String,
  pub behavior: BehaviorCategory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceDetails {
  pub company_name: Option<String>,
  pub tax_id: Option<String>,
  pub address: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Order {
  pub id: Uuid,
  pub customer_email: String,
  pub child: Json<ChildProfile>,
  pub invoice: Option<Json<InvoiceDetails>>,
  pub base_price_cents: i32,
  pub discount_cents: i32,
  pub final_price_cents: i32,
  pub coupon_code: Option<String>,
  pub status: OrderStatus,
  pub script: Option<String>,
  pub video_job_id: Option<String>,
  pub video_url: Option<String>,
  pub error_message: Option<String>,
  pub notified_at: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

/// Everything intake knows about an order before it is stored.
#[derive(Debug, Clone)]
pub struct NewOrder {
  pub customer_email: String,
  pub child: ChildProfile,
  pub invoice: Option<InvoiceDetails>,
  pub base_price_cents: i32,
  pub discount_cents: i32,
  pub final_price_cents: i32,
  pub coupon_code: Option<String>,
  pub status: OrderStatus,
}

impl Order {
  pub fn from_new(id: Uuid, new: NewOrder, now: DateTime<Utc>) -> Self {
    Self {
      id,
      customer_email: new.customer_email,
      child: Json(new.child),
      invoice: new.invoice.map(Json),
      base_price_cents: new.base_price_cents,
      discount_cents: new.discount_cents,
      final_price_cents: new.final_price_cents,
      coupon_code: new.coupon_code,
      status: new.status,
      script: None,
      video_job_id: None,
      video_url: None,
      error_message: None,
      notified_at: None,
      created_at: now,
      updated_at: now,
    }
  }

  /// Case-insensitive email comparison used by the customer status lookup.
  pub fn belongs_to(&self, email: &str) -> bool {
    self.customer_email.trim().eq_ignore_ascii_case(email.trim())
  }
}

/// One row of the `order_status_audit` table.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StatusAudit {
  pub id: Uuid,
  pub order_id: Uuid,
  pub from_status: OrderStatus,
  pub to_status: OrderStatus,
  pub actor: String,
  pub reason: Option<String>,
  pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn forward_edges_only_advance_one_step() {
    assert!(OrderStatus::PendingPayment.can_transition_to(OrderStatus::Paid));
    assert!(OrderStatus::Paid.can_transition_to(OrderStatus::GeneratingScript));
    assert!(OrderStatus::Merging.can_transition_to(OrderStatus::Completed));

    assert!(!OrderStatus::Paid.can_transition_to(OrderStatus::GeneratingVideo));
    assert!(!OrderStatus::GeneratingVideo.can_transition_to(OrderStatus::Paid));
    assert!(!OrderStatus::Completed.can_transition_to(OrderStatus::PendingPayment));
  }

  #[test]
  fn failed_is_reachable_only_from_non_terminal_states() {
    for status in OrderStatus::FORWARD_PATH {
      assert_eq!(status.can_transition_to(OrderStatus::Failed), status != OrderStatus::Completed);
    }
    assert!(!OrderStatus::Failed.can_transition_to(OrderStatus::Failed));
    assert!(!OrderStatus::Failed.can_transition_to(OrderStatus::Paid));
  }

  #[test]
  fn status_round_trips_through_its_wire_name() {
    assert_eq!("generating_video".parse::<OrderStatus>(), Ok(OrderStatus::GeneratingVideo));
    assert_eq!("failed".parse::<OrderStatus>(), Ok(OrderStatus::Failed));
    assert!("generating_voice".parse::<OrderStatus>().is_err());
    assert_eq!(
      serde_json::to_string(&OrderStatus::PendingPayment).unwrap(),
      "\"pending_payment\""
    );
  }
}
