// fulfillment/src/events/mod.rs

//! Pipeline events and their delivery.
//!
//! Events carry only an order id; workflows re-read everything else from the
//! Order Store. Producers publish and move on: durability, delay and retry are
//! the dispatcher's concern.

pub mod channel;
pub mod dispatcher;
pub mod outbox;
pub mod workflows;

use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

pub use channel::ChannelPublisher;
pub use dispatcher::{DeliveryOutcome, Dispatcher, RetryPolicy, Workflow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
  #[serde(rename = "video/generate.requested")]
  GenerateVideoRequested,
  #[serde(rename = "order/created")]
  OrderCreated,
  #[serde(rename = "order/payment.completed")]
  PaymentCompleted,
}

impl EventName {
  pub fn as_str(&self) -> &'static str {
    match self {
      EventName::GenerateVideoRequested => "video/generate.requested",
      EventName::OrderCreated => "order/created",
      EventName::PaymentCompleted => "order/payment.completed",
    }
  }

  pub fn parse(name: &str) -> Option<Self> {
    [
      EventName::GenerateVideoRequested,
      EventName::OrderCreated,
      EventName::PaymentCompleted,
    ]
    .into_iter()
    .find(|candidate| candidate.as_str() == name)
  }
}

impl fmt::Display for EventName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineEvent {
  pub id: Uuid,
  pub name: EventName,
  pub order_id: Uuid,
  /// Earliest delivery time; `None` means as soon as possible.
  pub not_before: Option<DateTime<Utc>>,
}

impl PipelineEvent {
  pub fn new(name: EventName, order_id: Uuid) -> Self {
    Self {
      id: Uuid::new_v4(),
      name,
      order_id,
      not_before: None,
    }
  }

  pub fn delayed(name: EventName, order_id: Uuid, delay: Duration) -> Self {
    let not_before = chrono::Duration::from_std(delay)
      .ok()
      .and_then(|d| Utc::now().checked_add_signed(d));
    Self {
      not_before,
      ..Self::new(name, order_id)
    }
  }

  /// Time left until the event may be delivered.
  pub fn remaining_delay(&self, now: DateTime<Utc>) -> Option<Duration> {
    self
      .not_before
      .and_then(|at| (at - now).to_std().ok())
      .filter(|d| !d.is_zero())
  }
}

/// An event the Order Store records together with a status write, so the
/// write and the event commit or fail as one. The store fills in the order id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxEntry {
  pub name: EventName,
  pub delay: Option<Duration>,
}

impl OutboxEntry {
  pub fn immediate(name: EventName) -> Self {
    Self { name, delay: None }
  }

  pub fn after(name: EventName, delay: Duration) -> Self {
    Self {
      name,
      delay: Some(delay),
    }
  }

  pub fn for_order(&self, order_id: Uuid) -> PipelineEvent {
    match self.delay {
      Some(delay) => PipelineEvent::delayed(self.name, order_id, delay),
      None => PipelineEvent::new(self.name, order_id),
    }
  }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
  async fn publish(&self, event: PipelineEvent) -> Result<()>;
}
