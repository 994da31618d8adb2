// fulfillment/src/store/postgres.rs

//! Postgres implementation of the stores (runtime-checked sqlx queries).

use super::{
  coupon_exhausted, ensure_forward_edge, ensure_overridable, override_error_message, CouponStore, OrderStore,
  OverrideRequest,
};
use crate::errors::{AppError, Result};
use crate::events::outbox::insert_event;
use crate::events::OutboxEntry;
use crate::models::{Coupon, NewOrder, Order, OrderStatus, StatusAudit};
use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use sqlx::{Postgres, Transaction};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const ORDER_COLUMNS: &str = "id, customer_email, child, invoice, base_price_cents, discount_cents, final_price_cents, \
   coupon_code, status, script, video_job_id, video_url, error_message, notified_at, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
  pool: PgPool,
}

impl PgStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

  pub fn pool(&self) -> &PgPool {
    &self.pool
  }
}

fn db_error(context: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
  move |e| {
    error!(error = %e, "{}", context);
    AppError::Sqlx(e)
  }
}

/// Counts one use of `code` unless it is used up. `false` when nothing was
/// counted.
async fn redeem_coupon(tx: &mut Transaction<'_, Postgres>, code: &str) -> Result<bool> {
  let redeemed = sqlx::query(
    "UPDATE coupons SET times_used = times_used + 1 \
     WHERE upper(code) = upper($1) AND (max_uses IS NULL OR times_used < max_uses)",
  )
  .bind(code)
  .execute(&mut **tx)
  .await
  .map_err(db_error("Failed to redeem coupon."))?;
  Ok(redeemed.rows_affected() == 1)
}

async fn write_outbox(tx: &mut Transaction<'_, Postgres>, order_id: Uuid, outbox: &[OutboxEntry]) -> Result<()> {
  for entry in outbox {
    insert_event(&mut **tx, &entry.for_order(order_id))
      .await
      .map_err(db_error("Failed to write outbox event."))?;
  }
  Ok(())
}

#[async_trait]
impl OrderStore for PgStore {
  #[instrument(name = "pg_store::insert", skip_all, fields(status = %new_order.status), err(Display))]
  async fn insert(&self, new_order: NewOrder, outbox: &[OutboxEntry]) -> Result<Order> {
    let mut tx = self.pool.begin().await.map_err(db_error("Failed to open transaction."))?;

    let sql = format!(
      "INSERT INTO orders (id, customer_email, child, invoice, base_price_cents, discount_cents, final_price_cents, \
       coupon_code, status) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {}",
      ORDER_COLUMNS
    );
    let order: Order = sqlx::query_as(&sql)
      .bind(Uuid::new_v4())
      .bind(&new_order.customer_email)
      .bind(Json(&new_order.child))
      .bind(new_order.invoice.as_ref().map(Json))
      .bind(new_order.base_price_cents)
      .bind(new_order.discount_cents)
      .bind(new_order.final_price_cents)
      .bind(&new_order.coupon_code)
      .bind(new_order.status)
      .fetch_one(&mut *tx)
      .await
      .map_err(db_error("Failed to insert order."))?;

    if order.status == OrderStatus::Paid {
      if let Some(code) = order.coupon_code.as_deref() {
        if !redeem_coupon(&mut tx, code).await? {
          return Err(coupon_exhausted(code));
        }
      }
    }
    write_outbox(&mut tx, order.id, outbox).await?;

    tx.commit().await.map_err(db_error("Failed to commit order insert."))?;
    info!(order_id = %order.id, "Order row created.");
    Ok(order)
  }

  async fn find(&self, id: Uuid) -> Result<Option<Order>> {
    let sql = format!("SELECT {} FROM orders WHERE id = $1", ORDER_COLUMNS);
    sqlx::query_as(&sql)
      .bind(id)
      .fetch_optional(&self.pool)
      .await
      .map_err(db_error("Failed to load order."))
  }

  async fn find_for_customer(&self, id: Uuid, email: &str) -> Result<Option<Order>> {
    let sql = format!(
      "SELECT {} FROM orders WHERE id = $1 AND lower(customer_email) = lower($2)",
      ORDER_COLUMNS
    );
    sqlx::query_as(&sql)
      .bind(id)
      .bind(email.trim())
      .fetch_optional(&self.pool)
      .await
      .map_err(db_error("Failed to load order for customer."))
  }

  #[instrument(name = "pg_store::advance_status", skip(self), err(Display))]
  async fn advance_status(&self, id: Uuid, from: OrderStatus, to: OrderStatus) -> Result<Option<Order>> {
    ensure_forward_edge(from, to)?;
    let sql = format!(
      "UPDATE orders SET status = $3, updated_at = now() WHERE id = $1 AND status = $2 RETURNING {}",
      ORDER_COLUMNS
    );
    sqlx::query_as(&sql)
      .bind(id)
      .bind(from)
      .bind(to)
      .fetch_optional(&self.pool)
      .await
      .map_err(db_error("Failed to advance order status."))
  }

  async fn save_script(&self, id: Uuid, script: &str) -> Result<()> {
    sqlx::query("UPDATE orders SET script = $2, updated_at = now() WHERE id = $1")
      .bind(id)
      .bind(script)
      .execute(&self.pool)
      .await
      .map_err(db_error("Failed to store script."))?;
    Ok(())
  }

  async fn save_video_job(&self, id: Uuid, job_id: &str) -> Result<()> {
    sqlx::query("UPDATE orders SET video_job_id = $2, updated_at = now() WHERE id = $1")
      .bind(id)
      .bind(job_id)
      .execute(&self.pool)
      .await
      .map_err(db_error("Failed to store video job id."))?;
    Ok(())
  }

  async fn complete(&self, id: Uuid, video_url: &str) -> Result<Option<Order>> {
    let sql = format!(
      "UPDATE orders SET status = 'completed', video_url = $2, error_message = NULL, updated_at = now() \
       WHERE id = $1 AND status = 'merging' RETURNING {}",
      ORDER_COLUMNS
    );
    sqlx::query_as(&sql)
      .bind(id)
      .bind(video_url)
      .fetch_optional(&self.pool)
      .await
      .map_err(db_error("Failed to complete order."))
  }

  async fn mark_failed(&self, id: Uuid, message: &str) -> Result<Option<Order>> {
    let sql = format!(
      "UPDATE orders SET status = 'failed', error_message = $2, video_url = NULL, updated_at = now() \
       WHERE id = $1 AND status NOT IN ('completed', 'failed') RETURNING {}",
      ORDER_COLUMNS
    );
    sqlx::query_as(&sql)
      .bind(id)
      .bind(message)
      .fetch_optional(&self.pool)
      .await
      .map_err(db_error("Failed to mark order failed."))
  }

  #[instrument(name = "pg_store::confirm_payment", skip(self, outbox), err(Display))]
  async fn confirm_payment(&self, id: Uuid, outbox: &[OutboxEntry]) -> Result<Option<Order>> {
    let mut tx = self.pool.begin().await.map_err(db_error("Failed to open transaction."))?;

    let sql = format!(
      "UPDATE orders SET status = 'paid', updated_at = now() WHERE id = $1 AND status = 'pending_payment' RETURNING {}",
      ORDER_COLUMNS
    );
    let confirmed: Option<Order> = sqlx::query_as(&sql)
      .bind(id)
      .fetch_optional(&mut *tx)
      .await
      .map_err(db_error("Failed to confirm payment."))?;
    let Some(order) = confirmed else {
      return Ok(None);
    };

    if let Some(code) = order.coupon_code.as_deref() {
      if !redeem_coupon(&mut tx, code).await? {
        warn!(order_id = %id, coupon = %code, "Coupon has no uses left; payment confirmed without counting it.");
      }
    }
    write_outbox(&mut tx, id, outbox).await?;

    tx.commit().await.map_err(db_error("Failed to commit payment confirmation."))?;
    Ok(Some(order))
  }

  #[instrument(name = "pg_store::override_status", skip(self), err(Display))]
  async fn override_status(&self, id: Uuid, request: &OverrideRequest) -> Result<Order> {
    let mut tx = self.pool.begin().await.map_err(db_error("Failed to open transaction."))?;

    let sql = format!("SELECT {} FROM orders WHERE id = $1 FOR UPDATE", ORDER_COLUMNS);
    let current: Order = sqlx::query_as(&sql)
      .bind(id)
      .fetch_optional(&mut *tx)
      .await
      .map_err(db_error("Failed to lock order."))?
      .ok_or_else(|| AppError::NotFound(format!("Order {} not found", id)))?;
    ensure_overridable(&current, request)?;

    let sql = format!(
      "UPDATE orders SET status = $2, error_message = $3, \
       video_url = CASE WHEN $2 = 'completed'::order_status THEN video_url ELSE NULL END, updated_at = now() \
       WHERE id = $1 RETURNING {}",
      ORDER_COLUMNS
    );
    let updated: Order = sqlx::query_as(&sql)
      .bind(id)
      .bind(request.to)
      .bind(override_error_message(&current, request))
      .fetch_one(&mut *tx)
      .await
      .map_err(db_error("Failed to override order status."))?;

    sqlx::query(
      "INSERT INTO order_status_audit (id, order_id, from_status, to_status, actor, reason) VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(Uuid::new_v4())
    .bind(id)
    .bind(current.status)
    .bind(request.to)
    .bind(&request.actor)
    .bind(&request.reason)
    .execute(&mut *tx)
    .await
    .map_err(db_error("Failed to write status audit row."))?;

    tx.commit().await.map_err(db_error("Failed to commit status override."))?;
    Ok(updated)
  }

  async fn audit_trail(&self, id: Uuid) -> Result<Vec<StatusAudit>> {
    sqlx::query_as(
      "SELECT id, order_id, from_status, to_status, actor, reason, created_at FROM order_status_audit \
       WHERE order_id = $1 ORDER BY created_at",
    )
    .bind(id)
    .fetch_all(&self.pool)
    .await
    .map_err(db_error("Failed to load audit trail."))
  }

  async fn mark_notified(&self, id: Uuid) -> Result<()> {
    sqlx::query("UPDATE orders SET notified_at = now() WHERE id = $1")
      .bind(id)
      .execute(&self.pool)
      .await
      .map_err(db_error("Failed to record notification."))?;
    Ok(())
  }
}

#[async_trait]
impl CouponStore for PgStore {
  async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>> {
    sqlx::query_as(
      "SELECT code, kind, amount, max_uses, times_used, active, expires_at FROM coupons WHERE upper(code) = upper($1)",
    )
    .bind(code)
    .fetch_optional(&self.pool)
    .await
    .map_err(db_error("Failed to load coupon."))
  }
}
