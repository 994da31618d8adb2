// fulfillment/src/pipelines/intake.rs

//! Order intake: validate, price, then persist the order together with its
//! first event.

use crate::errors::AppError;
use crate::events::{EventName, OutboxEntry};
use crate::models::{ChildProfile, InvoiceDetails, NewOrder, OrderStatus};
use crate::pipelines::contexts::IntakeCtxData;
use crate::services::pricing;
use crate::state::AppState;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use stepflow::{ContextData, Pipeline, PipelineControl, Registry};
use tracing::{info, warn};

const MAX_NAME_CHARS: usize = 60;
const MAX_FREE_TEXT_CHARS: usize = 1000;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
  pub customer_email: String,
  pub child: ChildProfile,
  #[serde(default)]
  pub invoice: Option<InvoiceDetails>,
  #[serde(default)]
  pub coupon_code: Option<String>,
}

fn looks_like_email(email: &str) -> bool {
  let Some((local, domain)) = email.split_once('@') else {
    return false;
  };
  !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.') && !email.contains(' ')
}

impl CreateOrderRequest {
  /// Trims free text, normalizes the coupon code and rejects bad input.
  pub fn normalized(mut self) -> Result<Self, AppError> {
    self.customer_email = self.customer_email.trim().to_lowercase();
    if !looks_like_email(&self.customer_email) {
      return Err(AppError::Validation("A valid customer email is required.".to_string()));
    }

    let child = &mut self.child;
    child.name = child.name.trim().to_string();
    child.achievements = child.achievements.trim().to_string();
    child.preferences = child.preferences.trim().to_string();
    if child.name.is_empty() || child.name.chars().count() > MAX_NAME_CHARS {
      return Err(AppError::Validation(format!(
        "The child's name must be between 1 and {} characters.",
        MAX_NAME_CHARS
      )));
    }
    if !(1..=17).contains(&child.age) {
      return Err(AppError::Validation("The child's age must be between 1 and 17.".to_string()));
    }
    if child.achievements.chars().count() > MAX_FREE_TEXT_CHARS || child.preferences.chars().count() > MAX_FREE_TEXT_CHARS
    {
      return Err(AppError::Validation(format!(
        "Achievements and preferences are limited to {} characters each.",
        MAX_FREE_TEXT_CHARS
      )));
    }

    if let Some(invoice) = &self.invoice {
      if invoice.address.trim().is_empty() {
        return Err(AppError::Validation("Invoice address cannot be empty.".to_string()));
      }
    }

    self.coupon_code = self
      .coupon_code
      .map(|code| code.trim().to_uppercase())
      .filter(|code| !code.is_empty());
    Ok(self)
  }
}

pub fn register_intake_pipeline(registry: &Arc<Registry<AppError>>, _app_state: &AppState) {
  let mut p = Pipeline::<IntakeCtxData, AppError>::new(&[
    ("validate_request", false, None),
    ("price_order", false, None),
    ("persist_order", false, None),
  ]);

  p.on_root("validate_request", |ctx_data: ContextData<IntakeCtxData>| {
    Box::pin(async move {
      let request = ctx_data.read().request.clone();
      let normalized = request.normalized()?;
      ctx_data.write().request = normalized;
      Ok::<_, AppError>(PipelineControl::Continue)
    })
  });

  p.on_root("price_order", |ctx_data: ContextData<IntakeCtxData>| {
    Box::pin(async move {
      let (app_state, coupon_code) = {
        let guard = ctx_data.read();
        (guard.app_state.clone(), guard.request.coupon_code.clone())
      };

      let coupon = match coupon_code {
        Some(code) => {
          let coupon = app_state.coupons.find_by_code(&code).await?;
          match coupon {
            Some(c) if c.is_redeemable(Utc::now()) => Some(c),
            _ => {
              warn!(%code, "Rejected coupon at intake.");
              return Err(AppError::Validation(format!("Coupon '{}' is not valid.", code)));
            }
          }
        }
        None => None,
      };

      let quote = pricing::quote(app_state.config.base_price_cents, coupon.as_ref());
      info!(
        base = quote.base_price_cents,
        discount = quote.discount_cents,
        final_price = quote.final_price_cents,
        "Order priced."
      );
      {
        let mut guard = ctx_data.write();
        guard.coupon = coupon;
        guard.quote = Some(quote);
      }
      Ok::<_, AppError>(PipelineControl::Continue)
    })
  });

  p.on_root("persist_order", |ctx_data: ContextData<IntakeCtxData>| {
    Box::pin(async move {
      let (app_state, request, quote) = {
        let guard = ctx_data.read();
        (guard.app_state.clone(), guard.request.clone(), guard.quote)
      };
      let quote = quote.ok_or_else(|| AppError::Internal("Order reached persistence without a price".to_string()))?;

      // Free orders skip payment; nothing else may start generation before payment.
      let (status, first_event) = if quote.is_free() {
        (OrderStatus::Paid, OutboxEntry::immediate(EventName::GenerateVideoRequested))
      } else {
        (
          OrderStatus::PendingPayment,
          OutboxEntry::after(EventName::OrderCreated, app_state.config.pipeline.reminder_delay),
        )
      };
      let order = app_state
        .orders
        .insert(
          NewOrder {
            customer_email: request.customer_email,
            child: request.child,
            invoice: request.invoice,
            base_price_cents: quote.base_price_cents,
            discount_cents: quote.discount_cents,
            final_price_cents: quote.final_price_cents,
            coupon_code: request.coupon_code,
            status,
          },
          &[first_event],
        )
        .await?;
      info!(order_id = %order.id, status = %order.status, event = %first_event.name, "Order created.");

      ctx_data.write().order = Some(order);
      Ok::<_, AppError>(PipelineControl::Continue)
    })
  });

  registry.register_pipeline(p);
  info!("Order intake pipeline registered.");
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::{BehaviorCategory, ChildGender};

  fn request() -> CreateOrderRequest {
    CreateOrderRequest {
      customer_email: "  Parent@Example.com ".to_string(),
      child: ChildProfile {
        name: " Leo ".to_string(),
        age: 6,
        gender: ChildGender::Boy,
        achievements: "tidied his room".to_string(),
        preferences: "dinosaurs".to_string(),
        behavior: BehaviorCategory::MostlyNice,
      },
      invoice: None,
      coupon_code: Some(" xmas10 ".to_string()),
    }
  }

  #[test]
  fn normalization_trims_and_uppercases() {
    let normalized = request().normalized().unwrap();
    assert_eq!(normalized.customer_email, "parent@example.com");
    assert_eq!(normalized.child.name, "Leo");
    assert_eq!(normalized.coupon_code.as_deref(), Some("XMAS10"));
  }

  #[test]
  fn blank_coupon_is_dropped() {
    let mut r = request();
    r.coupon_code = Some("   ".to_string());
    assert_eq!(r.normalized().unwrap().coupon_code, None);
  }

  #[test]
  fn invalid_input_is_rejected() {
    let mut bad_email = request();
    bad_email.customer_email = "parent.example.com".to_string();
    assert!(matches!(bad_email.normalized(), Err(AppError::Validation(_))));

    let mut no_name = request();
    no_name.child.name = "   ".to_string();
    assert!(matches!(no_name.normalized(), Err(AppError::Validation(_))));

    let mut too_old = request();
    too_old.child.age = 30;
    assert!(matches!(too_old.normalized(), Err(AppError::Validation(_))));
  }
}
