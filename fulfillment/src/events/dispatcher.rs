// fulfillment/src/events/dispatcher.rs

//! Routes events to workflows with bounded retry.
//!
//! Each attempt runs in its own task so a panicking workflow cannot take the
//! worker down with it. After the last failed attempt the workflow's
//! `on_failure` callback runs with the event (order id only) and the last
//! error text.

use super::{EventName, PipelineEvent};
use crate::config::DispatcherConfig;
use crate::errors::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, instrument, warn, Instrument};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub initial_backoff: Duration,
  pub max_backoff: Duration,
}

impl RetryPolicy {
  /// Delay before attempt `attempt + 1`, doubling from `initial_backoff`.
  pub fn backoff_after(&self, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
  }
}

impl From<&DispatcherConfig> for RetryPolicy {
  fn from(config: &DispatcherConfig) -> Self {
    Self {
      max_attempts: config.max_attempts.max(1),
      initial_backoff: config.initial_backoff,
      max_backoff: config.max_backoff,
    }
  }
}

#[async_trait]
pub trait Workflow: Send + Sync {
  fn name(&self) -> &'static str;

  async fn handle(&self, event: &PipelineEvent) -> Result<()>;

  /// Called once retries are exhausted. Must not fail; it only gets the
  /// event, not whatever the workflow loaded while running.
  async fn on_failure(&self, event: &PipelineEvent, last_error: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
  Delivered { attempts: u32 },
  Exhausted { attempts: u32, last_error: String },
  Unrouted,
}

pub struct Dispatcher {
  routes: HashMap<EventName, Arc<dyn Workflow>>,
  policy: RetryPolicy,
}

impl Dispatcher {
  pub fn new(policy: RetryPolicy) -> Self {
    Self {
      routes: HashMap::new(),
      policy,
    }
  }

  pub fn route(mut self, name: EventName, workflow: Arc<dyn Workflow>) -> Self {
    if self.routes.insert(name, workflow).is_some() {
      warn!(event = %name, "Replaced an existing workflow route.");
    }
    self
  }

  #[instrument(
    name = "dispatcher::deliver",
    skip_all,
    fields(event = %event.name, event_id = %event.id, order_id = %event.order_id)
  )]
  pub async fn deliver(&self, event: PipelineEvent) -> DeliveryOutcome {
    let Some(workflow) = self.routes.get(&event.name).cloned() else {
      warn!("No workflow registered for event; dropping it.");
      return DeliveryOutcome::Unrouted;
    };

    let mut last_error = String::new();
    for attempt in 1..=self.policy.max_attempts {
      let attempt_workflow = workflow.clone();
      let attempt_event = event.clone();
      let joined = tokio::spawn(async move { attempt_workflow.handle(&attempt_event).await }).await;

      match joined {
        Ok(Ok(())) => {
          info!(workflow = workflow.name(), attempt, "Workflow finished.");
          return DeliveryOutcome::Delivered { attempts: attempt };
        }
        Ok(Err(e)) => last_error = e.to_string(),
        Err(join_error) => last_error = format!("workflow task aborted: {}", join_error),
      }
      warn!(workflow = workflow.name(), attempt, error = %last_error, "Workflow attempt failed.");

      if attempt < self.policy.max_attempts {
        tokio::time::sleep(self.policy.backoff_after(attempt)).await;
      }
    }

    error!(workflow = workflow.name(), error = %last_error, "Retries exhausted; running failure callback.");
    let callback_workflow = workflow.clone();
    let callback_event = event.clone();
    let callback_error = last_error.clone();
    if let Err(join_error) =
      tokio::spawn(async move { callback_workflow.on_failure(&callback_event, &callback_error).await }).await
    {
      error!(error = %join_error, "Failure callback aborted.");
    }

    DeliveryOutcome::Exhausted {
      attempts: self.policy.max_attempts,
      last_error,
    }
  }

  /// Delivers events from an in-process channel, one task per event.
  pub fn spawn_channel_worker(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<PipelineEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
      info!("In-process event worker started.");
      while let Some(event) = rx.recv().await {
        let dispatcher = self.clone();
        let span = info_span!("event_worker_delivery", event = %event.name, order_id = %event.order_id);
        tokio::spawn(
          async move {
            if let Some(delay) = event.remaining_delay(Utc::now()) {
              tokio::time::sleep(delay).await;
            }
            dispatcher.deliver(event).await;
          }
          .instrument(span),
        );
      }
      info!("In-process event worker stopped.");
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn backoff_doubles_and_caps() {
    let policy = RetryPolicy {
      max_attempts: 5,
      initial_backoff: Duration::from_secs(2),
      max_backoff: Duration::from_secs(10),
    };
    assert_eq!(policy.backoff_after(1), Duration::from_secs(2));
    assert_eq!(policy.backoff_after(2), Duration::from_secs(4));
    assert_eq!(policy.backoff_after(3), Duration::from_secs(8));
    assert_eq!(policy.backoff_after(4), Duration::from_secs(10));
  }
}
