// tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use fulfillment::config::AppConfig;
use fulfillment::errors::{AppError, ProviderError, Result as AppResult};
use fulfillment::events::{EventName, EventPublisher, OutboxEntry, PipelineEvent};
use fulfillment::models::{
  BehaviorCategory, ChildGender, ChildProfile, Coupon, CouponKind, NewOrder, Order, OrderStatus, StatusAudit,
};
use fulfillment::services::admin_auth::hash_admin_token;
use fulfillment::services::avatar_video::{RenderStatus, VideoProvider};
use fulfillment::services::mailer::{EmailMessage, Mailer, SentEmail};
use fulfillment::services::object_storage::ObjectStorage;
use fulfillment::services::rate_limit::{RateLimiter, Unlimited};
use fulfillment::services::script_llm::{ScriptGenerator, ScriptPrompt};
use fulfillment::services::video_compose::VideoComposer;
use fulfillment::services::video_fetch::VideoFetcher;
use fulfillment::services::Providers;
use fulfillment::state::AppState;
use fulfillment::store::{CouponStore, MemoryStore, OrderStore, OverrideRequest};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const ADMIN_TOKEN: &str = "north-pole-ops";
pub const JOB_ID: &str = "J1";
pub const RENDERED_URL: &str = "U1";
pub const UPLOADED_URL: &str = "U2";
pub const MAIN_VIDEO: &[u8] = b"main-video";

static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer()
    .try_init()
    .ok();
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}

static ADMIN_TOKEN_HASH: Lazy<String> = Lazy::new(|| hash_admin_token(ADMIN_TOKEN).unwrap());

// --- Fake providers ---

pub struct FakeScript {
  reply: String,
  pub calls: AtomicUsize,
  pub prompts: Mutex<Vec<ScriptPrompt>>,
}

impl FakeScript {
  pub fn returning(reply: &str) -> Self {
    Self {
      reply: reply.to_string(),
      calls: AtomicUsize::new(0),
      prompts: Mutex::new(Vec::new()),
    }
  }
}

#[async_trait]
impl ScriptGenerator for FakeScript {
  async fn generate_script(&self, prompt: &ScriptPrompt) -> Result<String, ProviderError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.prompts.lock().push(prompt.clone());
    Ok(self.reply.clone())
  }
}

/// Hands out the queued statuses in order and repeats the last one forever.
pub struct ScriptedVideoProvider {
  statuses: Mutex<VecDeque<RenderStatus>>,
  last: Mutex<RenderStatus>,
  pub submits: AtomicUsize,
  pub polls: AtomicUsize,
  pub submitted_scripts: Mutex<Vec<String>>,
}

impl ScriptedVideoProvider {
  pub fn new(statuses: Vec<RenderStatus>) -> Self {
    Self {
      statuses: Mutex::new(statuses.into()),
      last: Mutex::new(RenderStatus::Processing),
      submits: AtomicUsize::new(0),
      polls: AtomicUsize::new(0),
      submitted_scripts: Mutex::new(Vec::new()),
    }
  }

  pub fn completing_after(polls: usize, video_url: &str) -> Self {
    let mut statuses = vec![RenderStatus::Processing; polls.saturating_sub(1)];
    statuses.push(RenderStatus::Completed {
      video_url: video_url.to_string(),
    });
    Self::new(statuses)
  }

  pub fn never_finishing() -> Self {
    Self::new(vec![RenderStatus::Pending])
  }
}

#[async_trait]
impl VideoProvider for ScriptedVideoProvider {
  async fn submit(&self, _order_id: Uuid, script: &str) -> Result<String, ProviderError> {
    self.submits.fetch_add(1, Ordering::SeqCst);
    self.submitted_scripts.lock().push(script.to_string());
    Ok(JOB_ID.to_string())
  }

  async fn status(&self, job_id: &str) -> Result<RenderStatus, ProviderError> {
    assert_eq!(job_id, JOB_ID);
    self.polls.fetch_add(1, Ordering::SeqCst);
    let next = self.statuses.lock().pop_front();
    match next {
      Some(status) => {
        *self.last.lock() = status.clone();
        Ok(status)
      }
      None => Ok(self.last.lock().clone()),
    }
  }
}

pub struct FakeFetcher {
  pub fetched: Mutex<Vec<String>>,
}

#[async_trait]
impl VideoFetcher for FakeFetcher {
  async fn fetch(&self, url: &str) -> Result<Vec<u8>, ProviderError> {
    self.fetched.lock().push(url.to_string());
    Ok(MAIN_VIDEO.to_vec())
  }
}

pub struct RecordingStorage {
  pub uploads: Mutex<Vec<(String, Vec<u8>)>>,
}

#[async_trait]
impl ObjectStorage for RecordingStorage {
  async fn put_video(&self, key: &str, bytes: Vec<u8>) -> Result<String, ProviderError> {
    self.uploads.lock().push((key.to_string(), bytes));
    Ok(UPLOADED_URL.to_string())
  }
}

pub struct FakeComposer {
  pub fail: bool,
}

#[async_trait]
impl VideoComposer for FakeComposer {
  async fn compose(&self, _order_id: Uuid, main: Vec<u8>) -> Result<Vec<u8>, ProviderError> {
    if self.fail {
      return Err(ProviderError::Composition("ffmpeg exited with status 1".to_string()));
    }
    let mut composed = b"intro|".to_vec();
    composed.extend(main);
    composed.extend_from_slice(b"|outro");
    Ok(composed)
  }
}

pub struct RecordingMailer {
  pub fail: bool,
  pub sent: Mutex<Vec<EmailMessage>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
  async fn send(&self, message: &EmailMessage) -> Result<SentEmail, ProviderError> {
    if self.fail {
      return Err(ProviderError::Rejected {
        provider: "email service",
        detail: "mailbox unavailable".to_string(),
      });
    }
    let mut sent = self.sent.lock();
    sent.push(message.clone());
    Ok(SentEmail {
      message_id: format!("msg-{}", sent.len()),
    })
  }
}

#[derive(Default)]
pub struct RecordingPublisher {
  pub events: Mutex<Vec<PipelineEvent>>,
  fail_once: Mutex<Vec<EventName>>,
}

impl RecordingPublisher {
  pub fn names_for(&self, order_id: Uuid) -> Vec<EventName> {
    self
      .events
      .lock()
      .iter()
      .filter(|e| e.order_id == order_id)
      .map(|e| e.name)
      .collect()
  }

  /// The next publish of `name` fails.
  pub fn fail_next(&self, name: EventName) {
    self.fail_once.lock().push(name);
  }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
  async fn publish(&self, event: PipelineEvent) -> AppResult<()> {
    {
      let mut fail_once = self.fail_once.lock();
      if let Some(pos) = fail_once.iter().position(|name| *name == event.name) {
        fail_once.remove(pos);
        return Err(AppError::Internal("event bus unavailable".to_string()));
      }
    }
    self.events.lock().push(event);
    Ok(())
  }
}

/// Delegates to the memory store, failing the first `find_failures` lookups
/// with a database error.
pub struct FlakyOrders {
  inner: Arc<MemoryStore>,
  find_failures: AtomicUsize,
}

#[async_trait]
impl OrderStore for FlakyOrders {
  async fn insert(&self, new_order: NewOrder, outbox: &[OutboxEntry]) -> AppResult<Order> {
    self.inner.insert(new_order, outbox).await
  }

  async fn find(&self, id: Uuid) -> AppResult<Option<Order>> {
    let remaining = self.find_failures.load(Ordering::SeqCst);
    if remaining > 0 {
      self.find_failures.store(remaining - 1, Ordering::SeqCst);
      return Err(AppError::Sqlx(sqlx::Error::PoolTimedOut));
    }
    self.inner.find(id).await
  }

  async fn find_for_customer(&self, id: Uuid, email: &str) -> AppResult<Option<Order>> {
    self.inner.find_for_customer(id, email).await
  }

  async fn advance_status(&self, id: Uuid, from: OrderStatus, to: OrderStatus) -> AppResult<Option<Order>> {
    self.inner.advance_status(id, from, to).await
  }

  async fn save_script(&self, id: Uuid, script: &str) -> AppResult<()> {
    self.inner.save_script(id, script).await
  }

  async fn save_video_job(&self, id: Uuid, job_id: &str) -> AppResult<()> {
    self.inner.save_video_job(id, job_id).await
  }

  async fn complete(&self, id: Uuid, video_url: &str) -> AppResult<Option<Order>> {
    self.inner.complete(id, video_url).await
  }

  async fn mark_failed(&self, id: Uuid, message: &str) -> AppResult<Option<Order>> {
    self.inner.mark_failed(id, message).await
  }

  async fn confirm_payment(&self, id: Uuid, outbox: &[OutboxEntry]) -> AppResult<Option<Order>> {
    self.inner.confirm_payment(id, outbox).await
  }

  async fn override_status(&self, id: Uuid, request: &OverrideRequest) -> AppResult<Order> {
    self.inner.override_status(id, request).await
  }

  async fn audit_trail(&self, id: Uuid) -> AppResult<Vec<StatusAudit>> {
    self.inner.audit_trail(id).await
  }

  async fn mark_notified(&self, id: Uuid) -> AppResult<()> {
    self.inner.mark_notified(id).await
  }
}

// --- Harness ---

pub struct HarnessOptions {
  pub statuses: Vec<RenderStatus>,
  pub script_reply: String,
  pub composer: Option<FakeComposer>,
  pub mailer_fails: bool,
  pub poll_interval: Duration,
  pub poll_budget: Duration,
  pub coupons: Vec<Coupon>,
  pub status_limiter: Arc<dyn RateLimiter>,
  pub trust_proxy_headers: bool,
  /// Order lookups that fail with a database error before the store recovers.
  pub find_failures: usize,
}

impl Default for HarnessOptions {
  fn default() -> Self {
    Self {
      statuses: vec![
        RenderStatus::Processing,
        RenderStatus::Processing,
        RenderStatus::Completed {
          video_url: RENDERED_URL.to_string(),
        },
      ],
      script_reply: "Ho ho ho, Ada! Santa heard you learned to ride a bike.".to_string(),
      composer: None,
      mailer_fails: false,
      poll_interval: Duration::from_millis(5),
      poll_budget: Duration::from_secs(2),
      coupons: Vec::new(),
      status_limiter: Arc::new(Unlimited),
      trust_proxy_headers: false,
      find_failures: 0,
    }
  }
}

pub struct Harness {
  pub state: AppState,
  pub store: Arc<MemoryStore>,
  pub script: Arc<FakeScript>,
  pub video: Arc<ScriptedVideoProvider>,
  pub fetcher: Arc<FakeFetcher>,
  pub storage: Arc<RecordingStorage>,
  pub mailer: Arc<RecordingMailer>,
  pub publisher: Arc<RecordingPublisher>,
}

impl Harness {
  pub fn new() -> Self {
    Self::with(HarnessOptions::default())
  }

  pub fn with(options: HarnessOptions) -> Self {
    setup_tracing();

    let mut config = AppConfig::default();
    config.webhook_secret = WEBHOOK_SECRET.to_string();
    config.admin_token_hash = Some(ADMIN_TOKEN_HASH.clone());
    config.pipeline.poll_interval = options.poll_interval;
    config.pipeline.poll_budget = options.poll_budget;
    config.pipeline.reminder_delay = Duration::from_secs(3600);
    config.dispatcher.initial_backoff = Duration::from_millis(5);
    config.dispatcher.max_backoff = Duration::from_millis(20);
    config.trust_proxy_headers = options.trust_proxy_headers;

    let publisher = Arc::new(RecordingPublisher::default());
    let store = Arc::new(MemoryStore::with_coupons(publisher.clone(), options.coupons));
    let script = Arc::new(FakeScript::returning(&options.script_reply));
    let video = Arc::new(ScriptedVideoProvider::new(options.statuses));
    let fetcher = Arc::new(FakeFetcher {
      fetched: Mutex::new(Vec::new()),
    });
    let storage = Arc::new(RecordingStorage {
      uploads: Mutex::new(Vec::new()),
    });
    let mailer = Arc::new(RecordingMailer {
      fail: options.mailer_fails,
      sent: Mutex::new(Vec::new()),
    });

    let providers = Providers {
      script: script.clone(),
      video: video.clone(),
      fetcher: fetcher.clone(),
      storage: storage.clone(),
      composer: options
        .composer
        .map(|composer| Arc::new(composer) as Arc<dyn VideoComposer>),
      mailer: mailer.clone(),
    };

    let orders: Arc<dyn OrderStore> = if options.find_failures > 0 {
      Arc::new(FlakyOrders {
        inner: store.clone(),
        find_failures: AtomicUsize::new(options.find_failures),
      })
    } else {
      store.clone()
    };
    let coupons: Arc<dyn CouponStore> = store.clone();
    let state = AppState::assemble(
      Arc::new(config),
      orders,
      coupons,
      providers,
      publisher.clone(),
      options.status_limiter,
    );

    Self {
      state,
      store,
      script,
      video,
      fetcher,
      storage,
      mailer,
      publisher,
    }
  }

  pub async fn insert_order(&self, status: OrderStatus) -> Order {
    self.state.orders.insert(new_order(status, None), &[]).await.unwrap()
  }

  pub async fn order(&self, id: Uuid) -> Order {
    self.state.orders.find(id).await.unwrap().unwrap()
  }
}

// --- Fixtures ---

pub fn child() -> ChildProfile {
  ChildProfile {
    name: "Ada".to_string(),
    age: 7,
    gender: ChildGender::Girl,
    achievements: "learned to ride a bike".to_string(),
    preferences: "dinosaurs and hot chocolate".to_string(),
    behavior: BehaviorCategory::Nice,
  }
}

pub fn new_order(status: OrderStatus, coupon_code: Option<&str>) -> NewOrder {
  NewOrder {
    customer_email: "parent@example.com".to_string(),
    child: child(),
    invoice: None,
    base_price_cents: 8900,
    discount_cents: 0,
    final_price_cents: 8900,
    coupon_code: coupon_code.map(str::to_string),
    status,
  }
}

pub fn coupon(code: &str, kind: CouponKind, amount: i32) -> Coupon {
  Coupon {
    code: code.to_string(),
    kind,
    amount,
    max_uses: None,
    times_used: 0,
    active: true,
    expires_at: None,
  }
}

pub fn order_request_json(coupon_code: Option<&str>) -> serde_json::Value {
  serde_json::json!({
    "customerEmail": "Parent@Example.com",
    "child": {
      "name": "Ada",
      "age": 7,
      "gender": "girl",
      "achievements": "learned to ride a bike",
      "preferences": "dinosaurs and hot chocolate",
      "behavior": "nice"
    },
    "couponCode": coupon_code,
  })
}

pub fn payment_json(order_id: Uuid) -> Vec<u8> {
  serde_json::json!({ "type": "payment.succeeded", "data": { "orderId": order_id } })
    .to_string()
    .into_bytes()
}

pub fn is_provider_error(err: &AppError) -> bool {
  matches!(err, AppError::Provider(_))
}
