//! # Caduceus Core
//!
//! Domain types, traits, and error definitions for the Caduceus clinical
//! reasoning runtime. This crate has **zero framework dependencies** — it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every collaborator the agent loop talks to is a trait or a plain value
//! here. Implementations live in their respective crates:
//! - `Provider` — text generation back-ends (`caduceus-providers`)
//! - `TraceSink` — best-effort observability (`caduceus-telemetry`)
//! - `Capability` — request-scoped tools (`caduceus-tools`, or caller closures)

pub mod capability;
pub mod error;
pub mod observe;
pub mod provider;
pub mod step;

// Re-export key types at crate root for ergonomics
pub use capability::{Capability, CapabilityRegistry, ToolArgs};
pub use error::{CapabilityError, ProviderError, TransportError};
pub use observe::{BestEffortSink, NoopSink, TraceEvent, TraceRecord, TraceSink};
pub use provider::{GenerateOptions, GenerateRequest, Generation, Provider, Usage};
pub use step::{Step, StepKind, Transcript};
