// tests/api_tests.rs
mod common;

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use common::*;
use fulfillment::events::EventName;
use fulfillment::models::OrderStatus;
use fulfillment::pipelines::run_generation;
use fulfillment::services::rate_limit::FixedWindowLimiter;
use fulfillment::web::configure_app_routes;
use serde_json::{json, Value};
use serial_test::serial;
use std::net::SocketAddr;
use std::sync::Arc;

macro_rules! app {
  ($harness:expr) => {
    test::init_service(
      App::new()
        .app_data(web::Data::new($harness.state.clone()))
        .configure(configure_app_routes),
    )
    .await
  };
}

fn bearer() -> (&'static str, String) {
  ("Authorization", format!("Bearer {}", ADMIN_TOKEN))
}

#[actix_web::test]
#[serial]
async fn health_reports_ok() {
  let harness = Harness::new();
  let app = app!(harness);

  let resp = test::call_service(&app, test::TestRequest::get().uri("/api/v1/health").to_request()).await;

  assert_eq!(resp.status(), StatusCode::OK);
  let body: Value = test::read_body_json(resp).await;
  assert_eq!(body["status"], "ok");
}

#[actix_web::test]
#[serial]
async fn order_creation_and_customer_polling() {
  let harness = Harness::new();
  let app = app!(harness);

  let req = test::TestRequest::post()
    .uri("/api/v1/orders")
    .set_json(order_request_json(None))
    .to_request();
  let resp = test::call_service(&app, req).await;
  assert_eq!(resp.status(), StatusCode::CREATED);
  let created: Value = test::read_body_json(resp).await;
  assert_eq!(created["status"], "pending_payment");
  assert_eq!(created["finalPriceCents"], 8900);
  assert_eq!(created["paymentRequired"], true);
  let order_id = created["orderId"].as_str().unwrap().to_string();

  let req = test::TestRequest::get()
    .uri(&format!("/api/v1/orders/{}/status?email=PARENT@example.com", order_id))
    .to_request();
  let resp = test::call_service(&app, req).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let view: Value = test::read_body_json(resp).await;
  assert_eq!(view["status"], "pending_payment");
  assert_eq!(view["progress"], 0);
  assert!(view["videoUrl"].is_null());

  let req = test::TestRequest::get()
    .uri(&format!("/api/v1/orders/{}/status?email=someone@else.com", order_id))
    .to_request();
  let resp = test::call_service(&app, req).await;
  assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
#[serial]
async fn invalid_order_is_a_bad_request() {
  let harness = Harness::new();
  let app = app!(harness);
  let mut body = order_request_json(None);
  body["customerEmail"] = json!("not-an-email");

  let req = test::TestRequest::post().uri("/api/v1/orders").set_json(body).to_request();
  let resp = test::call_service(&app, req).await;

  assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
#[serial]
async fn status_polling_is_rate_limited() {
  let harness = Harness::with(HarnessOptions {
    status_limiter: Arc::new(FixedWindowLimiter::per_minute(2)),
    ..Default::default()
  });
  let order = harness.insert_order(OrderStatus::Paid).await;
  let app = app!(harness);
  let uri = format!("/api/v1/orders/{}/status?email=parent@example.com", order.id);

  let mut statuses = Vec::new();
  for _ in 0..3 {
    let resp = test::call_service(&app, test::TestRequest::get().uri(&uri).to_request()).await;
    statuses.push(resp.status());
  }

  assert_eq!(statuses, vec![StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]);
}

async fn poll_from(trust_proxy_headers: bool) -> Vec<StatusCode> {
  let harness = Harness::with(HarnessOptions {
    status_limiter: Arc::new(FixedWindowLimiter::per_minute(1)),
    trust_proxy_headers,
    ..Default::default()
  });
  let order = harness.insert_order(OrderStatus::Paid).await;
  let app = app!(harness);
  let uri = format!("/api/v1/orders/{}/status?email=parent@example.com", order.id);
  let peer: SocketAddr = "203.0.113.7:40000".parse().unwrap();

  let mut statuses = Vec::new();
  for forwarded in ["198.51.100.1", "198.51.100.2"] {
    let req = test::TestRequest::get()
      .uri(&uri)
      .peer_addr(peer)
      .insert_header(("X-Forwarded-For", forwarded))
      .to_request();
    statuses.push(test::call_service(&app, req).await.status());
  }
  statuses
}

#[actix_web::test]
#[serial]
async fn forwarded_for_header_does_not_reset_the_limit() {
  assert_eq!(poll_from(false).await, vec![StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]);
}

#[actix_web::test]
#[serial]
async fn trusted_proxy_limits_per_forwarded_client() {
  assert_eq!(poll_from(true).await, vec![StatusCode::OK, StatusCode::OK]);
}

#[actix_web::test]
#[serial]
async fn failed_order_shows_only_a_generic_notice() {
  let harness = Harness::new();
  let order = harness.insert_order(OrderStatus::GeneratingVideo).await;
  harness
    .state
    .orders
    .mark_failed(order.id, "video provider rejected the request: avatar render error")
    .await
    .unwrap();
  let app = app!(harness);

  let req = test::TestRequest::get()
    .uri(&format!("/api/v1/orders/{}/status?email=parent@example.com", order.id))
    .to_request();
  let view: Value = test::call_and_read_body_json(&app, req).await;

  assert_eq!(view["status"], "failed");
  let notice = view["failureNotice"].as_str().unwrap();
  assert!(notice.contains(&order.id.to_string()));
  assert!(!view.to_string().contains("avatar render error"));
}

#[actix_web::test]
#[serial]
async fn payment_webhook_confirms_and_rejects_bad_secrets() {
  let harness = Harness::new();
  let order = harness.insert_order(OrderStatus::PendingPayment).await;
  let app = app!(harness);

  let req = test::TestRequest::post()
    .uri("/api/v1/webhooks/payment")
    .insert_header(("X-Webhook-Secret", "nope"))
    .set_payload(payment_json(order.id))
    .to_request();
  assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

  for expected in ["confirmed", "duplicate"] {
    let req = test::TestRequest::post()
      .uri("/api/v1/webhooks/payment")
      .insert_header(("X-Webhook-Secret", WEBHOOK_SECRET))
      .set_payload(payment_json(order.id))
      .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["outcome"], expected);
  }
  assert_eq!(harness.order(order.id).await.status, OrderStatus::Paid);
}

#[actix_web::test]
#[serial]
async fn payment_webhook_fails_when_generation_cannot_be_requested() {
  let harness = Harness::new();
  let order = harness.insert_order(OrderStatus::PendingPayment).await;
  harness.publisher.fail_next(EventName::GenerateVideoRequested);
  let app = app!(harness);

  let mut statuses = Vec::new();
  for _ in 0..2 {
    let req = test::TestRequest::post()
      .uri("/api/v1/webhooks/payment")
      .insert_header(("X-Webhook-Secret", WEBHOOK_SECRET))
      .set_payload(payment_json(order.id))
      .to_request();
    statuses.push(test::call_service(&app, req).await.status());
  }

  assert_eq!(statuses, vec![StatusCode::INTERNAL_SERVER_ERROR, StatusCode::OK]);
  assert_eq!(
    harness.publisher.names_for(order.id),
    vec![EventName::PaymentCompleted, EventName::GenerateVideoRequested]
  );
}

#[actix_web::test]
#[serial]
async fn admin_routes_require_the_token() {
  let harness = Harness::new();
  let order = harness.insert_order(OrderStatus::Paid).await;
  let app = app!(harness);
  let uri = format!("/api/v1/admin/orders/{}", order.id);

  let resp = test::call_service(&app, test::TestRequest::get().uri(&uri).to_request()).await;
  assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

  let req = test::TestRequest::get()
    .uri(&uri)
    .insert_header(("Authorization", "Bearer wrong-token"))
    .to_request();
  assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

  let req = test::TestRequest::get().uri(&uri).insert_header(bearer()).to_request();
  let resp = test::call_service(&app, req).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let detail: Value = test::read_body_json(resp).await;
  assert_eq!(detail["customerEmail"], "parent@example.com");
  assert_eq!(detail["child"]["name"], "Ada");
  assert_eq!(detail["auditTrail"], json!([]));
}

#[actix_web::test]
#[serial]
async fn admin_override_is_audited_and_does_not_run_the_pipeline() {
  let harness = Harness::new();
  let order = harness.insert_order(OrderStatus::GeneratingScript).await;
  let app = app!(harness);

  let req = test::TestRequest::post()
    .uri(&format!("/api/v1/admin/orders/{}/status", order.id))
    .insert_header(bearer())
    .insert_header(("X-Admin-Actor", "elf-ops"))
    .set_json(json!({ "status": "failed", "reason": "stuck after provider outage" }))
    .to_request();
  let resp = test::call_service(&app, req).await;
  assert_eq!(resp.status(), StatusCode::OK);
  let detail: Value = test::read_body_json(resp).await;

  assert_eq!(detail["status"], "failed");
  assert_eq!(detail["errorMessage"], "stuck after provider outage");
  let trail = detail["auditTrail"].as_array().unwrap();
  assert_eq!(trail.len(), 1);
  assert_eq!(trail[0]["actor"], "elf-ops");
  assert_eq!(trail[0]["from_status"], "generating_script");
  assert_eq!(trail[0]["to_status"], "failed");
  assert!(harness.publisher.events.lock().is_empty());
}

#[actix_web::test]
#[serial]
async fn override_to_completed_needs_a_video() {
  let harness = Harness::new();
  let order = harness.insert_order(OrderStatus::Merging).await;
  let app = app!(harness);

  let req = test::TestRequest::post()
    .uri(&format!("/api/v1/admin/orders/{}/status", order.id))
    .insert_header(bearer())
    .set_json(json!({ "status": "completed" }))
    .to_request();

  assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
  assert_eq!(harness.order(order.id).await.status, OrderStatus::Merging);
}

#[actix_web::test]
#[serial]
async fn requeue_only_for_paid_orders() {
  let harness = Harness::new();
  let pending = harness.insert_order(OrderStatus::PendingPayment).await;
  let paid = harness.insert_order(OrderStatus::Paid).await;
  let app = app!(harness);

  let req = test::TestRequest::post()
    .uri(&format!("/api/v1/admin/orders/{}/requeue", pending.id))
    .insert_header(bearer())
    .to_request();
  assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

  let req = test::TestRequest::post()
    .uri(&format!("/api/v1/admin/orders/{}/requeue", paid.id))
    .insert_header(bearer())
    .to_request();
  assert_eq!(test::call_service(&app, req).await.status(), StatusCode::ACCEPTED);

  assert!(harness.publisher.names_for(pending.id).is_empty());
  assert_eq!(
    harness.publisher.names_for(paid.id),
    vec![EventName::GenerateVideoRequested]
  );
}

#[actix_web::test]
#[serial]
async fn resend_notification_for_completed_orders() {
  let harness = Harness::new();
  let order = harness.insert_order(OrderStatus::Paid).await;
  let app = app!(harness);
  let uri = format!("/api/v1/admin/orders/{}/resend-notification", order.id);

  let req = test::TestRequest::post().uri(&uri).insert_header(bearer()).to_request();
  assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

  run_generation(&harness.state, order.id).await.unwrap();
  let req = test::TestRequest::post().uri(&uri).insert_header(bearer()).to_request();
  let resp = test::call_service(&app, req).await;

  assert_eq!(resp.status(), StatusCode::OK);
  assert_eq!(harness.mailer.sent.lock().len(), 2);
}
