// stepflow/src/pipeline/definition.rs

//! The `Pipeline<TData, Err>` struct and its structural operations.

use crate::core::context::Handler;
use crate::core::step::{SkipCondition, StepDef};
use crate::error::StepflowError;
use std::collections::HashMap;

/// An ordered set of steps over context data `TData`, whose handlers fail
/// with `Err`.
///
/// `Err` must be constructible from [`StepflowError`] so that framework
/// failures (e.g. a required step without handlers) surface through the same
/// error type as handler failures.
pub struct Pipeline<TData, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<StepflowError> + Send + Sync + 'static,
{
  pub(crate) steps: Vec<StepDef<TData>>,

  pub(crate) before: HashMap<String, Vec<Handler<TData, Err>>>,
  pub(crate) on: HashMap<String, Vec<Handler<TData, Err>>>,
  pub(crate) after: HashMap<String, Vec<Handler<TData, Err>>>,
}

impl<TData, Err> Pipeline<TData, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<StepflowError> + Send + Sync + 'static,
{
  /// Creates a pipeline from `(name, optional, skip_if)` tuples, in order.
  pub fn new(step_defs: &[(&str, bool, Option<SkipCondition<TData>>)]) -> Self {
    let steps = step_defs
      .iter()
      .map(|(name, optional, skip_if)| StepDef::new(*name, *optional, skip_if.clone()))
      .collect();

    Self {
      steps,
      before: HashMap::new(),
      on: HashMap::new(),
      after: HashMap::new(),
    }
  }

  /// Step names in execution order.
  pub fn step_names(&self) -> Vec<&str> {
    self.steps.iter().map(|s| s.name.as_str()).collect()
  }

  pub fn has_step(&self, step_name: &str) -> bool {
    self.steps.iter().any(|s| s.name == step_name)
  }

  /// Panics when `step_name` is not part of the pipeline. Registering a
  /// handler for an unknown step is a wiring bug, not a runtime condition.
  pub(crate) fn ensure_step_exists(&self, step_name: &str) {
    if !self.has_step(step_name) {
      panic!("Stepflow setup error: Step '{}' not found in pipeline definition.", step_name);
    }
  }

  /// Inserts a new step directly after `existing_step_name`.
  ///
  /// Used to splice in steps that only exist under some configurations.
  /// Panics if the anchor step is unknown or the new name is already taken.
  pub fn insert_after_step<S: Into<String>>(
    &mut self,
    existing_step_name: &str,
    new_step_name: S,
    optional: bool,
    skip_if: Option<SkipCondition<TData>>,
  ) {
    let Some(idx) = self.steps.iter().position(|s| s.name == existing_step_name) else {
      panic!(
        "Stepflow setup error: Step '{}' not found in pipeline definition.",
        existing_step_name
      );
    };
    let name: String = new_step_name.into();
    if self.has_step(&name) {
      panic!("Stepflow setup error: Step '{}' already exists in pipeline definition.", name);
    }
    self.steps.insert(idx + 1, StepDef::new(name, optional, skip_if));
  }
}
