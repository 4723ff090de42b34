//! Run tracing and usage accounting for Caduceus.
//!
//! [`TelemetryEngine`] is an in-memory [`caduceus_core::TraceSink`]: it
//! groups trace records into one [`Trace`] per run (model calls and
//! capability calls as spans), keeps a bounded number of traces, and serves
//! running totals as a [`UsageSnapshot`].

pub mod engine;
pub mod model;

pub use engine::TelemetryEngine;
pub use model::{ModelUsage, Span, SpanKind, Trace, UsageSnapshot};
