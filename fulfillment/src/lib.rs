// fulfillment/src/lib.rs

//! Order fulfillment for personalized Santa video messages.
//!
//! Orders come in through intake, get paid through the payment webhook and
//! then flow through the generation pipeline: script, avatar video render,
//! optional intro/outro, upload and a completion email. Pipelines run on the
//! `stepflow` engine; events between them go through the [`events`]
//! dispatcher.

pub mod config;
pub mod errors;
pub mod events;
pub mod models;
pub mod pipelines;
pub mod projection;
pub mod services;
pub mod state;
pub mod store;
pub mod web;
