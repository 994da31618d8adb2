// fulfillment/src/state.rs
use crate::config::AppConfig;
use crate::errors::AppError;
use crate::events::EventPublisher;
use crate::pipelines;
use crate::services::rate_limit::RateLimiter;
use crate::services::Providers;
use crate::store::{CouponStore, OrderStore};
use std::sync::Arc;
use stepflow::Registry;

/// Shared application state. Every collaborator is injected, so tests can
/// swap any of them for a fake.
#[derive(Clone)]
pub struct AppState {
  pub config: Arc<AppConfig>,
  pub orders: Arc<dyn OrderStore>,
  pub coupons: Arc<dyn CouponStore>,
  pub providers: Providers,
  pub events: Arc<dyn EventPublisher>,
  pub status_limiter: Arc<dyn RateLimiter>,
  pub engine: Arc<Registry<AppError>>,
}

impl AppState {
  /// Builds the state and registers every pipeline with its engine.
  pub fn assemble(
    config: Arc<AppConfig>,
    orders: Arc<dyn OrderStore>,
    coupons: Arc<dyn CouponStore>,
    providers: Providers,
    events: Arc<dyn EventPublisher>,
    status_limiter: Arc<dyn RateLimiter>,
  ) -> Self {
    let state = Self {
      config,
      orders,
      coupons,
      providers,
      events,
      status_limiter,
      engine: Arc::new(Registry::new()),
    };
    pipelines::register_all_pipelines(&state.engine, &state);
    state
  }
}
