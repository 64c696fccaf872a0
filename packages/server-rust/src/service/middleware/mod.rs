//! Tower middleware layers for the dispatch pipeline.
//!
//! - [`accounting`]: Active/executed/error call counters
//! - [`metrics`]: Call timing and outcome via `tracing` spans and `metrics`
//! - [`timeout`]: Per-call deadline from `request_timeout`
//! - [`recover`]: Panic containment at the call boundary
//! - [`pipeline`]: Composes all layers around the dispatcher

pub mod accounting;
pub mod metrics;
pub mod pipeline;
pub mod recover;
pub mod timeout;

pub use accounting::AccountingLayer;
pub use metrics::MetricsLayer;
pub use pipeline::{build_dispatch_pipeline, DispatchPipeline};
pub use recover::RecoverLayer;
pub use timeout::TimeoutLayer;
