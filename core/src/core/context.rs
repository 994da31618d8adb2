// stepflow/src/core/context.rs

//! The boxed handler type stored by pipelines for every step phase.

use crate::core::context_data::ContextData;
use crate::core::control::PipelineControl;
use std::future::Future;
use std::pin::Pin;

/// A pipeline step handler.
///
/// Handlers receive a clone of the run's `ContextData<TData>` (a cheap `Arc`
/// clone) and resolve to either a [`PipelineControl`] or the pipeline's error
/// type `Err`.
///
/// Lock guards taken through `read()`/`write()` are blocking and must be
/// dropped before the handler awaits anything; in practice handlers copy what
/// they need out of the context inside a small block, await their I/O, then
/// take a second short write lock to store the result.
pub type Handler<TData, Err> = Box<
  dyn Fn(ContextData<TData>) -> Pin<Box<dyn Future<Output = Result<PipelineControl, Err>> + Send>>
    + Send
    + Sync,
>;
