// fulfillment/src/events/channel.rs

//! In-process publisher used when no database is configured. Events do not
//! survive a restart.

use super::{EventPublisher, PipelineEvent};
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Clone)]
pub struct ChannelPublisher {
  tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl ChannelPublisher {
  pub fn new() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx }, rx)
  }
}

#[async_trait]
impl EventPublisher for ChannelPublisher {
  async fn publish(&self, event: PipelineEvent) -> Result<()> {
    debug!(event = %event.name, order_id = %event.order_id, "Queueing event in-process.");
    self
      .tx
      .send(event)
      .map_err(|_| AppError::Internal("Event worker is not running".to_string()))
  }
}
