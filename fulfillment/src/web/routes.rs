// fulfillment/src/web/routes.rs

use crate::web::handlers::{admin_handlers, order_handlers, webhook_handlers};
use actix_web::web;

async fn health_check_handler() -> actix_web::HttpResponse {
  actix_web::HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

/// Mounts the whole API under `/api/v1`.
pub fn configure_app_routes(cfg: &mut web::ServiceConfig) {
  cfg.service(
    web::scope("/api/v1")
      .route("/health", web::get().to(health_check_handler))
      .service(
        web::scope("/orders")
          .route("", web::post().to(order_handlers::create_order_handler))
          .route(
            "/{order_id}/status",
            web::get().to(order_handlers::order_status_handler),
          ),
      )
      .service(
        web::scope("/webhooks").route(
          "/payment",
          web::post().to(webhook_handlers::payment_webhook_handler),
        ),
      )
      .service(
        web::scope("/admin/orders")
          .route("/{order_id}", web::get().to(admin_handlers::order_detail_handler))
          .route(
            "/{order_id}/status",
            web::post().to(admin_handlers::override_status_handler),
          )
          .route(
            "/{order_id}/resend-notification",
            web::post().to(admin_handlers::resend_notification_handler),
          )
          .route(
            "/{order_id}/requeue",
            web::post().to(admin_handlers::requeue_generation_handler),
          ),
      ),
  );
}
