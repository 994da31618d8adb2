// fulfillment/src/services/mailer.rs

//! Transactional email: provider client, a logging stand-in, and the
//! messages the workflows send.

use crate::config::EmailConfig;
use crate::errors::ProviderError;
use crate::models::Order;
use askama::Template;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};

const PROVIDER: &str = "email service";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
  pub to: String,
  pub subject: String,
  pub html: String,
}

#[derive(Debug, Clone)]
pub struct SentEmail {
  pub message_id: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
  async fn send(&self, message: &EmailMessage) -> Result<SentEmail, ProviderError>;
}

/// Resend-style API: `POST {api_base}/emails`.
pub struct ResendMailer {
  http: reqwest::Client,
  config: EmailConfig,
}

impl ResendMailer {
  pub fn new(http: reqwest::Client, config: EmailConfig) -> Self {
    Self { http, config }
  }
}

#[derive(Deserialize)]
struct SendResponse {
  id: String,
}

#[async_trait]
impl Mailer for ResendMailer {
  #[instrument(name = "mailer::send", skip(self, message), fields(subject = %message.subject), err(Display))]
  async fn send(&self, message: &EmailMessage) -> Result<SentEmail, ProviderError> {
    let mut request = self
      .http
      .post(format!("{}/emails", self.config.api_base.trim_end_matches('/')))
      .json(&json!({
        "from": self.config.sender,
        "to": [message.to],
        "subject": message.subject,
        "html": message.html,
      }));
    if let Some(key) = &self.config.api_key {
      request = request.bearer_auth(key);
    }

    let response = request.send().await.map_err(ProviderError::transport(PROVIDER))?;
    let status = response.status();
    if !status.is_success() {
      let detail = response.text().await.unwrap_or_default();
      return Err(ProviderError::Rejected {
        provider: PROVIDER,
        detail: format!("HTTP {}: {}", status, detail),
      });
    }
    let sent: SendResponse = response.json().await.map_err(|e| ProviderError::InvalidResponse {
      provider: PROVIDER,
      detail: e.to_string(),
    })?;
    info!(message_id = %sent.id, "Email accepted by provider.");
    Ok(SentEmail { message_id: sent.id })
  }
}

/// Logs emails instead of sending them. Used when no email key is configured.
pub struct LogMailer {
  sender: String,
}

impl LogMailer {
  pub fn new(sender: String) -> Self {
    Self { sender }
  }
}

#[async_trait]
impl Mailer for LogMailer {
  async fn send(&self, message: &EmailMessage) -> Result<SentEmail, ProviderError> {
    let message_id = format!("logged_email_{}", uuid::Uuid::new_v4());
    info!(
      from = %self.sender,
      to = %message.to,
      subject = %message.subject,
      %message_id,
      "Email not sent (no email provider configured)."
    );
    Ok(SentEmail { message_id })
  }
}

fn format_price(cents: i32) -> String {
  format!("${}.{:02}", cents / 100, cents % 100)
}

// Templates render with HTML escaping; every order field in them is
// customer-supplied.

#[derive(Template)]
#[template(path = "completion.html")]
struct CompletionBody<'a> {
  child_name: &'a str,
  video_url: &'a str,
  order_id: uuid::Uuid,
}

#[derive(Template)]
#[template(path = "payment_reminder.html")]
struct PaymentReminderBody<'a> {
  child_name: &'a str,
  pay_url: String,
  price: String,
}

#[derive(Template)]
#[template(path = "payment_receipt.html")]
struct PaymentReceiptBody<'a> {
  child_name: &'a str,
  order_id: uuid::Uuid,
  price: String,
}

pub fn completion_email(order: &Order, video_url: &str) -> Result<EmailMessage, ProviderError> {
  let name = &order.child.name;
  let html = CompletionBody {
    child_name: name,
    video_url,
    order_id: order.id,
  }
  .render()?;
  Ok(EmailMessage {
    to: order.customer_email.clone(),
    subject: format!("Santa's video message for {} is ready!", name),
    html,
  })
}

pub fn payment_reminder_email(order: &Order, app_base_url: &str) -> Result<EmailMessage, ProviderError> {
  let html = PaymentReminderBody {
    child_name: &order.child.name,
    pay_url: format!("{}/orders/{}/pay", app_base_url.trim_end_matches('/'), order.id),
    price: format_price(order.final_price_cents),
  }
  .render()?;
  Ok(EmailMessage {
    to: order.customer_email.clone(),
    subject: format!("Your Santa video for {} is waiting for payment", order.child.name),
    html,
  })
}

pub fn payment_receipt_email(order: &Order) -> Result<EmailMessage, ProviderError> {
  let html = PaymentReceiptBody {
    child_name: &order.child.name,
    order_id: order.id,
    price: format_price(order.final_price_cents),
  }
  .render()?;
  Ok(EmailMessage {
    to: order.customer_email.clone(),
    subject: "We received your payment".to_string(),
    html,
  })
}
