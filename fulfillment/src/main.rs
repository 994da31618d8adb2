// fulfillment/src/main.rs

use fulfillment::config::AppConfig;
use fulfillment::events::outbox::{OutboxRelay, PgOutbox};
use fulfillment::events::workflows::build_dispatcher;
use fulfillment::events::{ChannelPublisher, EventPublisher};
use fulfillment::services::admin_auth::hash_admin_token;
use fulfillment::services::rate_limit::FixedWindowLimiter;
use fulfillment::services::Providers;
use fulfillment::state::AppState;
use fulfillment::store::{CouponStore, MemoryStore, OrderStore, PgStore};
use fulfillment::web::configure_app_routes;

use actix_web::{web as actix_data, App, HttpServer};
use sqlx::postgres::PgPoolOptions;
use std::io;
use std::sync::Arc;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_span_events(FmtSpan::CLOSE);

  if std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
    builder.json().init();
  } else {
    builder.init();
  }
}

/// `fulfillment_server hash-admin-token <token>` prints the value for `ADMIN_TOKEN_HASH`.
fn run_hash_admin_token(token: Option<String>) -> io::Result<()> {
  let token = token.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "usage: hash-admin-token <token>"))?;
  let hash = hash_admin_token(&token).map_err(io::Error::other)?;
  println!("{}", hash);
  Ok(())
}

#[actix_web::main]
async fn main() -> io::Result<()> {
  let mut args = std::env::args().skip(1);
  if let Some(command) = args.next() {
    if command == "hash-admin-token" {
      return run_hash_admin_token(args.next());
    }
    return Err(io::Error::new(
      io::ErrorKind::InvalidInput,
      format!("unknown command '{}'", command),
    ));
  }

  init_tracing();
  tracing::info!("Starting fulfillment server...");

  let app_config = match AppConfig::from_env() {
    Ok(cfg) => Arc::new(cfg),
    Err(e) => {
      tracing::error!(error = %e, "Failed to load application configuration.");
      return Err(io::Error::other(e));
    }
  };
  if app_config.admin_token_hash.is_none() {
    tracing::warn!("ADMIN_TOKEN_HASH not set; admin endpoints will reject every request.");
  }

  let providers = Providers::from_config(&app_config).map_err(io::Error::other)?;
  let status_limiter = Arc::new(FixedWindowLimiter::per_minute(app_config.status_rate_limit_per_minute));

  let app_state = match &app_config.database_url {
    Some(database_url) => {
      let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| {
          tracing::error!(error = %e, "Failed to connect to the database.");
          io::Error::other(e)
        })?;
      tracing::info!("Connected to the database; using the durable outbox.");

      let store = Arc::new(PgStore::new(pool.clone()));
      let orders: Arc<dyn OrderStore> = store.clone();
      let coupons: Arc<dyn CouponStore> = store;
      let events: Arc<dyn EventPublisher> = Arc::new(PgOutbox::new(pool.clone()));
      let state = AppState::assemble(app_config.clone(), orders, coupons, providers, events, status_limiter);

      let dispatcher = Arc::new(build_dispatcher(&state));
      let relay = OutboxRelay::new(pool, dispatcher, &app_config.dispatcher);
      tokio::spawn(relay.run());
      state
    }
    None => {
      tracing::warn!("DATABASE_URL not set; orders and events live in memory only.");
      let (publisher, rx) = ChannelPublisher::new();
      let events: Arc<dyn EventPublisher> = Arc::new(publisher);
      let store = Arc::new(MemoryStore::new(events.clone()));
      let orders: Arc<dyn OrderStore> = store.clone();
      let coupons: Arc<dyn CouponStore> = store;
      let state = AppState::assemble(app_config.clone(), orders, coupons, providers, events, status_limiter);

      let dispatcher = Arc::new(build_dispatcher(&state));
      dispatcher.spawn_channel_worker(rx);
      state
    }
  };

  let server_address = format!("{}:{}", app_config.server_host, app_config.server_port);
  tracing::info!("Binding server to {}...", server_address);

  HttpServer::new(move || {
    App::new()
      .app_data(actix_data::Data::new(app_state.clone()))
      .wrap(tracing_actix_web::TracingLogger::default())
      .configure(configure_app_routes)
  })
  .bind(&server_address)?
  .run()
  .await
}
