// tests/common/mod.rs
#![allow(dead_code)]

use stepflow::{ContextData, PipelineControl, StepflowError};
use tracing::Level;

/// Mimics a fulfillment run: a status that steps advance and a trail of
/// executed steps for ordering assertions.
#[derive(Clone, Debug, Default)]
pub struct JobContext {
  pub status: String,
  pub trail: Vec<String>,
  pub attempts: u32,
  pub halt_at: Option<String>,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum TestError {
  #[error("Stepflow error: {0}")]
  Framework(String),

  #[error("Provider failed: {0}")]
  Provider(String),
}

impl From<StepflowError> for TestError {
  fn from(err: StepflowError) -> Self {
    TestError::Framework(format!("{:?}", err))
  }
}

/// Records its own name in the trail, sets `status`, and stops when the
/// context asks to halt at this step.
pub fn advancing_handler(
  step_name: &'static str,
  new_status: &'static str,
) -> stepflow::Handler<JobContext, TestError> {
  Box::new(move |ctx: ContextData<JobContext>| {
    Box::pin(async move {
      let halt = ctx.update(|job| {
        job.trail.push(step_name.to_string());
        job.status = new_status.to_string();
        job.halt_at.as_deref() == Some(step_name)
      });
      tracing::debug!(target: "test_handlers", step = step_name, status = new_status, "handler executed");
      if halt {
        return Ok(PipelineControl::Stop);
      }
      Ok(PipelineControl::Continue)
    })
  })
}

pub fn failing_handler(step_name: &'static str, message: &'static str) -> stepflow::Handler<JobContext, TestError> {
  Box::new(move |ctx: ContextData<JobContext>| {
    Box::pin(async move {
      ctx.write().trail.push(step_name.to_string());
      tracing::warn!(target: "test_handlers", step = step_name, "failing with: '{}'", message);
      Err(TestError::Provider(message.to_string()))
    })
  })
}

use once_cell::sync::Lazy;
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
