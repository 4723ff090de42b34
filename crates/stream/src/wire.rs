//! Wire events and frame encoding.

use caduceus_core::{Step, StepKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The terminal sentinel frame. Always the last frame of a stream.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// The payload that marks the end of a stream.
pub const DONE_PAYLOAD: &str = "[DONE]";

/// One event on the progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    Thought {
        iteration: u32,
        thought: String,
        timestamp: DateTime<Utc>,
    },
    Action {
        iteration: u32,
        tool: String,
        #[serde(default)]
        args: Map<String, Value>,
        timestamp: DateTime<Utc>,
    },
    Observation {
        iteration: u32,
        observation: String,
        timestamp: DateTime<Utc>,
    },
    /// The serialized run report.
    Final { result: Value },
    Error { error: String },
}

impl WireEvent {
    /// The cycle a step event belongs to; `None` for terminal events.
    pub fn iteration(&self) -> Option<u32> {
        match self {
            Self::Thought { iteration, .. }
            | Self::Action { iteration, .. }
            | Self::Observation { iteration, .. } => Some(*iteration),
            Self::Final { .. } | Self::Error { .. } => None,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Thought { .. } => "thought",
            Self::Action { .. } => "action",
            Self::Observation { .. } => "observation",
            Self::Final { .. } => "final",
            Self::Error { .. } => "error",
        }
    }

    /// Rebuild the transcript step a step event was encoded from.
    pub fn into_step(self) -> Option<Step> {
        let (iteration, kind, timestamp) = match self {
            Self::Thought {
                iteration,
                thought,
                timestamp,
            } => (iteration, StepKind::Thought { text: thought }, timestamp),
            Self::Action {
                iteration,
                tool,
                args,
                timestamp,
            } => (iteration, StepKind::Action { tool, args }, timestamp),
            Self::Observation {
                iteration,
                observation,
                timestamp,
            } => (
                iteration,
                StepKind::Observation { text: observation },
                timestamp,
            ),
            Self::Final { .. } | Self::Error { .. } => return None,
        };
        Some(Step {
            iteration,
            kind,
            timestamp,
        })
    }
}

impl From<&Step> for WireEvent {
    fn from(step: &Step) -> Self {
        let iteration = step.iteration;
        let timestamp = step.timestamp;
        match &step.kind {
            StepKind::Thought { text } => Self::Thought {
                iteration,
                thought: text.clone(),
                timestamp,
            },
            StepKind::Action { tool, args } => Self::Action {
                iteration,
                tool: tool.clone(),
                args: args.clone(),
                timestamp,
            },
            StepKind::Observation { text } => Self::Observation {
                iteration,
                observation: text.clone(),
                timestamp,
            },
        }
    }
}

/// Encode one event as a complete frame, `data: <json>\n\n`.
pub fn encode(event: &WireEvent) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(event)?;
    Ok(format!("data: {json}\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn thought_frame_shape() {
        let step = Step::thought(2, "eGFR is low");
        let frame = encode(&WireEvent::from(&step)).unwrap();
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("}\n\n"));

        let body: Value = serde_json::from_str(&frame[6..frame.len() - 2]).unwrap();
        assert_eq!(body["type"], "thought");
        assert_eq!(body["iteration"], 2);
        assert_eq!(body["thought"], "eGFR is low");
        assert!(body["timestamp"].is_string());
    }

    #[test]
    fn action_frame_carries_args() {
        let mut args = Map::new();
        args.insert("weight_kg".into(), json!(80));
        let event = WireEvent::from(&Step::action(1, "bmi", args));
        let body = serde_json::to_value(&event).unwrap();
        assert_eq!(body["type"], "action");
        assert_eq!(body["tool"], "bmi");
        assert_eq!(body["args"]["weight_kg"], 80);
    }

    #[test]
    fn terminal_events_shape() {
        let fin = serde_json::to_value(WireEvent::Final {
            result: json!({"outcome": "answer"}),
        })
        .unwrap();
        assert_eq!(fin, json!({"type": "final", "result": {"outcome": "answer"}}));

        let err = serde_json::to_value(WireEvent::Error {
            error: "provider down".into(),
        })
        .unwrap();
        assert_eq!(err, json!({"type": "error", "error": "provider down"}));
        assert_eq!(DONE_FRAME, "data: [DONE]\n\n");
    }

    #[test]
    fn step_survives_the_wire() {
        let step = Step::observation(3, "CrCl 38 mL/min");
        let event = WireEvent::from(&step);
        assert_eq!(event.iteration(), Some(3));
        assert_eq!(event.event_type(), "observation");
        assert_eq!(event.into_step().unwrap(), step);
    }
}
