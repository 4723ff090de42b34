//! Dispatching decoded frames to a handler.

use std::collections::HashSet;
use std::fmt::Display;

use caduceus_core::{Step, TransportError};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::decoder::{Frame, FrameDecoder};
use crate::wire::WireEvent;

/// Receives stream events as they are decoded. Every callback defaults to
/// doing nothing.
pub trait StreamHandler: Send {
    fn on_thought(&mut self, _iteration: u32, _thought: &str, _timestamp: DateTime<Utc>) {}

    fn on_action(
        &mut self,
        _iteration: u32,
        _tool: &str,
        _args: &Map<String, Value>,
        _timestamp: DateTime<Utc>,
    ) {
    }

    fn on_observation(&mut self, _iteration: u32, _observation: &str, _timestamp: DateTime<Utc>) {}

    fn on_final(&mut self, _result: &Value) {}

    fn on_error(&mut self, _error: &str) {}

    fn on_done(&mut self) {}
}

/// What a completed consumption saw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumeSummary {
    /// Well-formed events dispatched, excluding the sentinel.
    pub events: usize,
    /// Frames skipped because they could not be decoded.
    pub malformed: usize,
    /// Highest iteration seen on a step event.
    pub last_iteration: u32,
    /// Whether a `final` frame arrived.
    pub saw_final: bool,
    /// Whether an `error` frame arrived.
    pub saw_error: bool,
}

/// Per-stream ordering bookkeeping.
#[derive(Default)]
struct Tracker {
    summary: ConsumeSummary,
    acted: HashSet<u32>,
}

impl Tracker {
    fn frame<H: StreamHandler + ?Sized>(&mut self, frame: Frame, handler: &mut H) -> bool {
        match frame {
            Frame::Done => {
                handler.on_done();
                return true;
            }
            Frame::Malformed { payload, reason } => {
                let preview: String = payload.chars().take(120).collect();
                warn!(%reason, payload = %preview, "Skipping malformed stream frame");
                self.summary.malformed += 1;
            }
            Frame::Event(event) => {
                self.check_order(&event);
                self.summary.events += 1;
                dispatch(event, handler, &mut self.summary);
            }
        }
        false
    }

    fn check_order(&mut self, event: &WireEvent) {
        let Some(iteration) = event.iteration() else {
            return;
        };
        if iteration < self.summary.last_iteration {
            warn!(
                iteration,
                last = self.summary.last_iteration,
                "Stream iteration went backwards"
            );
        }
        self.summary.last_iteration = self.summary.last_iteration.max(iteration);
        match event {
            WireEvent::Action { .. } => {
                self.acted.insert(iteration);
            }
            WireEvent::Observation { .. } if !self.acted.contains(&iteration) => {
                // Legal for malformed-response and parse-failure observations.
                debug!(iteration, "Observation without a preceding action");
            }
            _ => {}
        }
    }
}

fn dispatch<H: StreamHandler + ?Sized>(
    event: WireEvent,
    handler: &mut H,
    summary: &mut ConsumeSummary,
) {
    match event {
        WireEvent::Thought {
            iteration,
            thought,
            timestamp,
        } => handler.on_thought(iteration, &thought, timestamp),
        WireEvent::Action {
            iteration,
            tool,
            args,
            timestamp,
        } => handler.on_action(iteration, &tool, &args, timestamp),
        WireEvent::Observation {
            iteration,
            observation,
            timestamp,
        } => handler.on_observation(iteration, &observation, timestamp),
        WireEvent::Final { result } => {
            summary.saw_final = true;
            handler.on_final(&result);
        }
        WireEvent::Error { error } => {
            summary.saw_error = true;
            handler.on_error(&error);
        }
    }
}

/// Drive a byte stream through the decoder into `handler` until the
/// sentinel frame.
///
/// Returns [`TransportError::Read`] when the underlying stream fails and
/// [`TransportError::Truncated`] when it ends before the sentinel. Events
/// received before either failure have already been dispatched.
pub async fn consume<S, B, E, H>(
    stream: S,
    handler: &mut H,
) -> Result<ConsumeSummary, TransportError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
    H: StreamHandler + ?Sized,
{
    let mut stream = std::pin::pin!(stream);
    let mut decoder = FrameDecoder::new();
    let mut tracker = Tracker::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| TransportError::Read(e.to_string()))?;
        for frame in decoder.push(chunk.as_ref()) {
            if tracker.frame(frame, handler) {
                return Ok(tracker.summary);
            }
        }
    }

    if let Some(frame) = decoder.finish()
        && tracker.frame(frame, handler)
    {
        return Ok(tracker.summary);
    }

    warn!(events = tracker.summary.events, "Stream ended without [DONE]");
    Err(TransportError::Truncated)
}

/// A handler that rebuilds the transcript and keeps the terminal payload.
#[derive(Debug, Default)]
pub struct StepCollector {
    pub steps: Vec<Step>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub done: bool,
}

impl StepCollector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamHandler for StepCollector {
    fn on_thought(&mut self, iteration: u32, thought: &str, timestamp: DateTime<Utc>) {
        self.steps.push(Step {
            iteration,
            kind: caduceus_core::StepKind::Thought {
                text: thought.to_string(),
            },
            timestamp,
        });
    }

    fn on_action(
        &mut self,
        iteration: u32,
        tool: &str,
        args: &Map<String, Value>,
        timestamp: DateTime<Utc>,
    ) {
        self.steps.push(Step {
            iteration,
            kind: caduceus_core::StepKind::Action {
                tool: tool.to_string(),
                args: args.clone(),
            },
            timestamp,
        });
    }

    fn on_observation(&mut self, iteration: u32, observation: &str, timestamp: DateTime<Utc>) {
        self.steps.push(Step {
            iteration,
            kind: caduceus_core::StepKind::Observation {
                text: observation.to_string(),
            },
            timestamp,
        });
    }

    fn on_final(&mut self, result: &Value) {
        self.result = Some(result.clone());
    }

    fn on_error(&mut self, error: &str) {
        self.error = Some(error.to_string());
    }

    fn on_done(&mut self) {
        self.done = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{DONE_FRAME, encode};
    use futures::stream;
    use serde_json::json;
    use std::convert::Infallible;

    fn frames(events: &[WireEvent], done: bool) -> String {
        let mut out: String = events.iter().map(|e| encode(e).unwrap()).collect();
        if done {
            out.push_str(DONE_FRAME);
        }
        out
    }

    fn chunked(text: &str, size: usize) -> Vec<Result<Vec<u8>, Infallible>> {
        text.as_bytes().chunks(size).map(|c| Ok(c.to_vec())).collect()
    }

    fn cycle(iteration: u32) -> Vec<WireEvent> {
        vec![
            WireEvent::from(&Step::thought(iteration, "consider renal function")),
            WireEvent::from(&Step::action(iteration, "crcl", Map::new())),
            WireEvent::from(&Step::observation(iteration, "42 mL/min")),
        ]
    }

    #[tokio::test]
    async fn collects_steps_in_order() {
        let mut events = cycle(1);
        events.extend(cycle(2));
        events.push(WireEvent::Final {
            result: json!({"answer": "reduce dose"}),
        });
        let text = frames(&events, true);

        let mut collector = StepCollector::new();
        let summary = consume(stream::iter(chunked(&text, 7)), &mut collector)
            .await
            .unwrap();

        assert_eq!(summary.events, 7);
        assert_eq!(summary.malformed, 0);
        assert_eq!(summary.last_iteration, 2);
        assert!(summary.saw_final);
        assert!(collector.done);
        assert_eq!(collector.steps.len(), 6);
        assert_eq!(collector.steps[3].iteration, 2);
        assert_eq!(collector.result.unwrap()["answer"], "reduce dose");
    }

    #[tokio::test]
    async fn malformed_frames_are_skipped() {
        let mut text = frames(&cycle(1), false);
        text.push_str("data: {\"type\":\"mystery\"}\n\n");
        text.push_str(&frames(
            &[WireEvent::Error {
                error: "provider unavailable".into(),
            }],
            true,
        ));

        let mut collector = StepCollector::new();
        let summary = consume(stream::iter(chunked(&text, 5)), &mut collector)
            .await
            .unwrap();
        assert_eq!(summary.malformed, 1);
        assert_eq!(collector.steps.len(), 3);
        assert_eq!(collector.error.as_deref(), Some("provider unavailable"));
        assert!(summary.saw_error);
    }

    #[tokio::test]
    async fn missing_sentinel_is_truncation() {
        let text = frames(&cycle(1), false);
        let mut collector = StepCollector::new();
        let err = consume(stream::iter(chunked(&text, 64)), &mut collector)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Truncated));
        assert_eq!(collector.steps.len(), 3);
    }

    #[tokio::test]
    async fn read_error_surfaces_after_delivered_events() {
        let text = frames(&cycle(1), false);
        let items: Vec<Result<Vec<u8>, String>> = vec![
            Ok(text.into_bytes()),
            Err("connection reset".to_string()),
        ];
        let mut collector = StepCollector::new();
        let err = consume(stream::iter(items), &mut collector).await.unwrap_err();
        assert!(matches!(err, TransportError::Read(ref m) if m.contains("reset")));
        assert_eq!(collector.steps.len(), 3);
    }

    #[tokio::test]
    async fn frames_after_sentinel_are_ignored() {
        let mut text = frames(&[], true);
        text.push_str(&frames(&cycle(9), false));
        let mut collector = StepCollector::new();
        let summary = consume(stream::iter(chunked(&text, 3)), &mut collector)
            .await
            .unwrap();
        assert_eq!(summary.events, 0);
        assert!(collector.steps.is_empty());
    }
}
