// stepflow/src/core/control.rs

//! Flow-control signals returned by handlers and the outcome of a run.

/// Returned by a handler to either keep going or halt the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineControl {
  Continue,
  /// Halt immediately. Remaining handlers of the current step and all later
  /// steps are not executed. This is not an error: it is how a handler says
  /// "nothing (more) to do here", e.g. a duplicate delivery.
  Stop,
}

/// Outcome of a pipeline run that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineResult {
  /// Every step ran, was skipped by its condition, or was an optional step
  /// whose failure was tolerated.
  Completed,
  /// A handler returned [`PipelineControl::Stop`] during `step`.
  Stopped { step: String },
}

impl PipelineResult {
  pub fn is_completed(&self) -> bool {
    matches!(self, PipelineResult::Completed)
  }

  /// Name of the step that halted the run, if any.
  pub fn stopped_at(&self) -> Option<&str> {
    match self {
      PipelineResult::Completed => None,
      PipelineResult::Stopped { step } => Some(step.as_str()),
    }
  }
}
