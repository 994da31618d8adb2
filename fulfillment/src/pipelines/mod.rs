// fulfillment/src/pipelines/mod.rs

//! Pipelines registered with the stepflow engine.

use crate::errors::AppError;
use crate::state::AppState;
use std::sync::Arc;
use stepflow::Registry;

pub mod common_steps;
pub mod contexts;
pub mod generation;
pub mod intake;
pub mod payment;
pub mod polling;

pub use generation::{run_generation, GenerationOutcome};

/// Registers every pipeline of the service. Called once while assembling `AppState`.
pub fn register_all_pipelines(registry: &Arc<Registry<AppError>>, app_state: &AppState) {
  tracing::info!("Registering pipelines...");

  intake::register_intake_pipeline(registry, app_state);
  payment::register_payment_pipeline(registry, app_state);
  generation::register_generation_pipeline(registry, app_state);

  tracing::info!("All application pipelines registered.");
}
