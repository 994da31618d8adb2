// stepflow/src/lib.rs

//! Stepflow: asynchronous, type-safe step pipelines.
//!
//! A [`Pipeline`] is an ordered list of named steps operating on a shared
//! [`ContextData`]. Each step may carry `before`/`on`/`after` handlers, a skip
//! condition and an `optional` flag. Optional steps are best-effort: a missing
//! handler or a failing handler is logged and the run moves on to the next
//! step. Any handler can halt the run by returning [`PipelineControl::Stop`],
//! which the caller observes as [`PipelineResult::Stopped`] together with the
//! step that stopped it.
//!
//! The [`Registry`] stores pipelines keyed by their context type, so callers
//! only need to build a context and hand it to `registry.run(..)`.

pub mod core;
pub mod error;
pub mod pipeline;
pub mod registry;

pub use crate::core::context::Handler;
pub use crate::core::context_data::ContextData;
pub use crate::core::control::{PipelineControl, PipelineResult};
pub use crate::core::step::{SkipCondition, StepDef};

pub use crate::error::{StepflowError, StepflowResult};
pub use crate::pipeline::definition::Pipeline;
pub use crate::registry::Registry;
