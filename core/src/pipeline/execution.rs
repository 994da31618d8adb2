// stepflow/src/pipeline/execution.rs

//! `Pipeline::run()`: executes steps in order against one context.

use crate::core::context::Handler;
use crate::core::context_data::ContextData;
use crate::core::control::{PipelineControl, PipelineResult};
use crate::core::step::StepDef;
use crate::error::StepflowError;
use crate::pipeline::definition::Pipeline;
use tracing::{debug_span, event, info_span, instrument, Instrument, Level};

enum StepProgress {
  Continue,
  Stopped,
}

impl<TData, Err> Pipeline<TData, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<StepflowError> + Send + Sync + 'static,
{
  /// Executes every step in order against `ctx_data`.
  ///
  /// For each step: the skip condition is evaluated first, then the
  /// `before`, `on` and `after` handlers run in registration order. A `Stop`
  /// from any handler ends the run with [`PipelineResult::Stopped`]. A handler
  /// error ends the run with that error, unless the step is optional, in which
  /// case the error is logged and the next step starts.
  #[instrument(
        name = "Pipeline::run",
        skip_all,
        fields(
            pipeline_context_data_type = %std::any::type_name::<TData>(),
            num_steps = self.steps.len(),
        ),
        err(Display)
    )]
  pub async fn run(&self, ctx_data: ContextData<TData>) -> Result<PipelineResult, Err> {
    event!(Level::DEBUG, "Pipeline execution starting.");

    for (step_idx, step_def) in self.steps.iter().enumerate() {
      let step_span = info_span!(
        "pipeline_step_execution",
        step_name = %step_def.name,
        step_index = step_idx,
        optional = step_def.optional
      );
      match self.run_step(step_def, ctx_data.clone()).instrument(step_span).await? {
        StepProgress::Continue => {}
        StepProgress::Stopped => {
          return Ok(PipelineResult::Stopped {
            step: step_def.name.clone(),
          });
        }
      }
    }

    event!(Level::DEBUG, "Pipeline execution completed.");
    Ok(PipelineResult::Completed)
  }

  async fn run_step(&self, step_def: &StepDef<TData>, ctx_data: ContextData<TData>) -> Result<StepProgress, Err> {
    if let Some(skip_cond_fn) = &step_def.skip_if {
      if skip_cond_fn(ctx_data.clone()) {
        event!(Level::INFO, "Step skipped due to 'skip_if' condition.");
        return Ok(StepProgress::Continue);
      }
    }

    let step_name = step_def.name.as_str();
    let phases: [(&'static str, Option<&Vec<Handler<TData, Err>>>); 3] = [
      ("before", self.before.get(step_name)),
      ("on", self.on.get(step_name)),
      ("after", self.after.get(step_name)),
    ];

    if phases.iter().all(|(_, handlers)| handlers.map_or(true, |v| v.is_empty())) {
      if step_def.optional {
        event!(Level::DEBUG, "Optional step has no handlers, skipping.");
        return Ok(StepProgress::Continue);
      }
      event!(Level::ERROR, "Non-optional step has no handlers.");
      return Err(Err::from(StepflowError::HandlerMissing {
        step_name: step_def.name.clone(),
      }));
    }

    for (phase, handlers) in phases {
      let Some(handlers) = handlers else { continue };
      for (handler_idx, handler_fn) in handlers.iter().enumerate() {
        let handler_span = debug_span!("step_handler", phase, handler_index = handler_idx);
        match handler_fn(ctx_data.clone()).instrument(handler_span).await {
          Ok(PipelineControl::Continue) => {}
          Ok(PipelineControl::Stop) => {
            event!(Level::INFO, phase, "Pipeline stopped by a handler.");
            return Ok(StepProgress::Stopped);
          }
          Err(e) if step_def.optional => {
            event!(Level::WARN, phase, error = %e, "Optional step failed; continuing with the next step.");
            return Ok(StepProgress::Continue);
          }
          Err(e) => {
            event!(Level::ERROR, phase, error = %e, "Step handler failed.");
            return Err(e);
          }
        }
      }
    }

    event!(Level::DEBUG, "Step finished.");
    Ok(StepProgress::Continue)
  }
}
