// stepflow/src/registry.rs

//! `Registry<E>`: pipelines keyed by the type of their context data.
//!
//! Callers register one `Pipeline<TData, HandlerErr>` per context type and
//! later run it with `registry.run(ContextData::new(data))`. Results come back
//! in the application-level error type `E`.

use crate::core::context_data::ContextData;
use crate::core::control::PipelineResult;
use crate::error::StepflowError;
use crate::pipeline::definition::Pipeline;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{event, instrument, Level};

#[async_trait]
trait AnyPipelineRunner<ApplicationError>: Send + Sync
where
  ApplicationError: std::error::Error + Send + Sync + 'static,
{
  /// `ctx_obj` must hold the `ContextData<TData>` this runner was built for.
  async fn run_erased(&self, ctx_obj: Box<dyn Any + Send>) -> Result<PipelineResult, ApplicationError>;

  fn step_names(&self) -> Vec<String>;
}

struct PipelineRunner<TData, HandlerErr, ApplicationError>
where
  TData: 'static + Send + Sync,
  HandlerErr: std::error::Error + From<StepflowError> + Send + Sync + 'static,
{
  pipeline: Arc<Pipeline<TData, HandlerErr>>,
  _app_err: PhantomData<fn() -> ApplicationError>,
}

#[async_trait]
impl<TData, HandlerErr, ApplicationError> AnyPipelineRunner<ApplicationError>
  for PipelineRunner<TData, HandlerErr, ApplicationError>
where
  TData: 'static + Send + Sync,
  HandlerErr: std::error::Error + From<StepflowError> + Send + Sync + 'static,
  ApplicationError: std::error::Error + From<HandlerErr> + From<StepflowError> + Send + Sync + 'static,
{
  #[instrument(
        name = "PipelineRunner::run_erased",
        skip_all,
        fields(target_tdata_type = %std::any::type_name::<TData>()),
        err(Display)
    )]
  async fn run_erased(&self, ctx_obj: Box<dyn Any + Send>) -> Result<PipelineResult, ApplicationError> {
    let typed_ctx_data = match ctx_obj.downcast::<ContextData<TData>>() {
      Ok(boxed) => *boxed,
      Err(_) => {
        let expected_type = std::any::type_name::<ContextData<TData>>().to_string();
        event!(Level::ERROR, %expected_type, "Context object type mismatch.");
        return Err(ApplicationError::from(StepflowError::TypeMismatch {
          step_name: "registry_dispatch".to_string(),
          expected_type,
        }));
      }
    };

    self.pipeline.run(typed_ctx_data).await.map_err(ApplicationError::from)
  }

  fn step_names(&self) -> Vec<String> {
    self.pipeline.step_names().into_iter().map(str::to_string).collect()
  }
}

/// Type-keyed pipeline registry returning `ApplicationError`.
pub struct Registry<ApplicationError = StepflowError>
where
  ApplicationError: std::error::Error + From<StepflowError> + Send + Sync + 'static,
{
  pipelines: RwLock<HashMap<TypeId, Arc<dyn AnyPipelineRunner<ApplicationError>>>>,
}

impl<ApplicationError> Default for Registry<ApplicationError>
where
  ApplicationError: std::error::Error + From<StepflowError> + Send + Sync + 'static,
{
  fn default() -> Self {
    Self::new()
  }
}

impl<ApplicationError> Registry<ApplicationError>
where
  ApplicationError: std::error::Error + From<StepflowError> + Send + Sync + 'static,
{
  pub fn new() -> Self {
    Self {
      pipelines: RwLock::new(HashMap::new()),
    }
  }

  /// Registers `pipeline` for its context type, replacing any previous one.
  pub fn register_pipeline<TData, HandlerErr>(&self, pipeline: Pipeline<TData, HandlerErr>)
  where
    TData: 'static + Send + Sync,
    HandlerErr: std::error::Error + From<StepflowError> + Send + Sync + 'static,
    ApplicationError: From<HandlerErr>,
  {
    event!(
      Level::DEBUG,
      tdata_type = %std::any::type_name::<TData>(),
      steps = ?pipeline.step_names(),
      "Registering pipeline."
    );
    let runner = PipelineRunner::<TData, HandlerErr, ApplicationError> {
      pipeline: Arc::new(pipeline),
      _app_err: PhantomData,
    };
    let previous = self.pipelines.write().insert(TypeId::of::<TData>(), Arc::new(runner));
    if previous.is_some() {
      event!(Level::WARN, tdata_type = %std::any::type_name::<TData>(), "Replaced an already registered pipeline.");
    }
  }

  pub fn is_registered<TData: 'static + Send + Sync>(&self) -> bool {
    self.pipelines.read().contains_key(&TypeId::of::<TData>())
  }

  /// Step names of the pipeline registered for `TData`, in execution order.
  pub fn step_names<TData: 'static + Send + Sync>(&self) -> Option<Vec<String>> {
    self.pipelines.read().get(&TypeId::of::<TData>()).map(|runner| runner.step_names())
  }

  /// Runs the pipeline registered for `TData` against `ctx_data`.
  pub async fn run<TData>(&self, ctx_data: ContextData<TData>) -> Result<PipelineResult, ApplicationError>
  where
    TData: 'static + Send + Sync,
  {
    let runner = self.pipelines.read().get(&TypeId::of::<TData>()).cloned();
    let Some(runner) = runner else {
      let type_name = std::any::type_name::<TData>();
      event!(Level::ERROR, "No pipeline registered for TData type {}.", type_name);
      return Err(ApplicationError::from(StepflowError::ConfigurationError {
        step_name: "Registry::run".to_string(),
        message: format!("No pipeline registered for TData type {}", type_name),
      }));
    };

    runner.run_erased(Box::new(ctx_data)).await
  }
}
