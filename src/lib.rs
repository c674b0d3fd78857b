//! Stage-driven load generation with live metric aggregation and
//! threshold checks.
//!
//! A [`plan::Plan`] says how many VUs should be running at any moment; the
//! [`engine::Engine`] ramps a [`vu::VuGroup`] to follow it while every
//! iteration feeds samples into a [`stats::Registry`]. Once a second the
//! [`threshold::ThresholdSet`] judges the aggregated sinks.

pub mod cli;
pub mod engine;
pub mod error;
pub mod plan;
pub mod redis_runner;
pub mod server;
pub mod stats;
pub mod status;
pub mod summary;
pub mod threshold;
pub mod vu;

pub use error::{Error, Result};
