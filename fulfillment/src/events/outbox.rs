// fulfillment/src/events/outbox.rs

//! Durable delivery through the `pipeline_events` table.
//!
//! Publishing inserts a row; order writes that announce themselves insert
//! theirs inside the same transaction (see `PgStore`). The relay claims due
//! rows with `FOR UPDATE SKIP LOCKED`, leasing them for `outbox_lease`; a row
//! whose lease ran out (crashed worker) becomes claimable again, which is what
//! makes delivery at-least-once.

use super::{DeliveryOutcome, Dispatcher, EventName, EventPublisher, PipelineEvent};
use crate::config::DispatcherConfig;
use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn, Instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct PgOutbox {
  pool: PgPool,
}

impl PgOutbox {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }
}

#[async_trait]
impl EventPublisher for PgOutbox {
  #[instrument(name = "outbox::publish", skip_all, fields(event = %event.name, order_id = %event.order_id), err(Display))]
  async fn publish(&self, event: PipelineEvent) -> Result<()> {
    insert_event(&self.pool, &event).await?;
    debug!("Event stored in outbox.");
    Ok(())
  }
}

/// Writes one outbox row. Store writes pass their open transaction so the
/// row commits with the status change.
pub(crate) async fn insert_event<'e, E>(executor: E, event: &PipelineEvent) -> std::result::Result<(), sqlx::Error>
where
  E: sqlx::PgExecutor<'e>,
{
  sqlx::query(
    "INSERT INTO pipeline_events (id, name, order_id, available_at, status) \
     VALUES ($1, $2, $3, COALESCE($4, now()), 'pending')",
  )
  .bind(event.id)
  .bind(event.name.as_str())
  .bind(event.order_id)
  .bind(event.not_before)
  .execute(executor)
  .await?;
  Ok(())
}

#[derive(Debug, FromRow)]
struct OutboxRow {
  id: Uuid,
  name: String,
  order_id: Uuid,
  available_at: DateTime<Utc>,
}

pub struct OutboxRelay {
  pool: PgPool,
  dispatcher: Arc<Dispatcher>,
  poll_interval: Duration,
  lease: Duration,
  batch_size: i64,
}

impl OutboxRelay {
  pub fn new(pool: PgPool, dispatcher: Arc<Dispatcher>, config: &DispatcherConfig) -> Self {
    Self {
      pool,
      dispatcher,
      poll_interval: config.outbox_poll_interval,
      lease: config.outbox_lease,
      batch_size: config.outbox_batch_size,
    }
  }

  async fn claim_batch(&self) -> Result<Vec<OutboxRow>> {
    let rows = sqlx::query_as(
      "UPDATE pipeline_events SET status = 'in_flight', attempts = attempts + 1, \
         locked_until = now() + make_interval(secs => $2) \
       WHERE id IN ( \
         SELECT id FROM pipeline_events \
         WHERE (status = 'pending' AND available_at <= now()) \
            OR (status = 'in_flight' AND locked_until < now()) \
         ORDER BY available_at \
         LIMIT $1 \
         FOR UPDATE SKIP LOCKED) \
       RETURNING id, name, order_id, available_at",
    )
    .bind(self.batch_size)
    .bind(self.lease.as_secs_f64())
    .fetch_all(&self.pool)
    .await?;
    Ok(rows)
  }

  async fn finish(pool: &PgPool, id: Uuid, outcome: &DeliveryOutcome) -> Result<()> {
    let (status, last_error) = match outcome {
      DeliveryOutcome::Delivered { .. } => ("done", None),
      DeliveryOutcome::Exhausted { last_error, .. } => ("failed", Some(last_error.as_str())),
      DeliveryOutcome::Unrouted => ("failed", Some("no workflow registered")),
    };
    sqlx::query(
      "UPDATE pipeline_events SET status = $2, last_error = $3, locked_until = NULL, processed_at = now() WHERE id = $1",
    )
    .bind(id)
    .bind(status)
    .bind(last_error)
    .execute(pool)
    .await?;
    Ok(())
  }

  /// Claims and delivers due events until the process stops.
  pub async fn run(self) {
    info!(poll_interval = ?self.poll_interval, "Outbox relay started.");
    loop {
      match self.claim_batch().await {
        Ok(rows) if !rows.is_empty() => {
          debug!(claimed = rows.len(), "Claimed outbox events.");
          for row in rows {
            self.spawn_delivery(row);
          }
        }
        Ok(_) => {}
        Err(e) => error!(error = %e, "Failed to claim outbox events."),
      }
      tokio::time::sleep(self.poll_interval).await;
    }
  }

  fn spawn_delivery(&self, row: OutboxRow) {
    let pool = self.pool.clone();
    let dispatcher = self.dispatcher.clone();
    let span = tracing::info_span!("outbox_delivery", event_id = %row.id, event = %row.name);
    tokio::spawn(
      async move {
        let outcome = match EventName::parse(&row.name) {
          Some(name) => {
            let event = PipelineEvent {
              id: row.id,
              name,
              order_id: row.order_id,
              not_before: Some(row.available_at),
            };
            dispatcher.deliver(event).await
          }
          None => {
            warn!("Unknown event name in outbox.");
            DeliveryOutcome::Unrouted
          }
        };
        if let Err(e) = Self::finish(&pool, row.id, &outcome).await {
          error!(error = %e, "Failed to record outbox delivery outcome; the event will be redelivered after its lease.");
        }
      }
      .instrument(span),
    );
  }
}
