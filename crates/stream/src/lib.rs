//! The live progress stream between a running agent loop and a remote
//! observer.
//!
//! Frames are server-sent-event style, one JSON event per frame:
//!
//! ```text
//! data: {"type":"thought","iteration":1,"thought":"...","timestamp":"..."}
//!
//! data: {"type":"final","result":{...}}
//!
//! data: [DONE]
//! ```
//!
//! [`wire`] defines the events and their encoding, [`decoder`] turns
//! arbitrary byte chunks back into frames, [`consumer`] dispatches decoded
//! events to a [`StreamHandler`], and [`client`] feeds an HTTP response
//! body through the consumer.

pub mod client;
pub mod consumer;
pub mod decoder;
pub mod wire;

pub use consumer::{ConsumeSummary, StepCollector, StreamHandler, consume};
pub use decoder::{Frame, FrameDecoder};
pub use wire::{DONE_FRAME, WireEvent, encode};
