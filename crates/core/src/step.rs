//! Reasoning steps and the append-only transcript of a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What happened in a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    /// The model's reasoning text.
    Thought { text: String },
    /// A capability invocation requested by the model.
    Action {
        tool: String,
        args: serde_json::Map<String, serde_json::Value>,
    },
    /// The (bounded) result of an action, or a description of what went wrong.
    Observation { text: String },
}

/// A single immutable entry in a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// 1-based cycle index.
    pub iteration: u32,
    #[serde(flatten)]
    pub kind: StepKind,
    pub timestamp: DateTime<Utc>,
}

impl Step {
    pub fn thought(iteration: u32, text: impl Into<String>) -> Self {
        Self::new(iteration, StepKind::Thought { text: text.into() })
    }

    pub fn action(
        iteration: u32,
        tool: impl Into<String>,
        args: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self::new(
            iteration,
            StepKind::Action {
                tool: tool.into(),
                args,
            },
        )
    }

    pub fn observation(iteration: u32, text: impl Into<String>) -> Self {
        Self::new(iteration, StepKind::Observation { text: text.into() })
    }

    fn new(iteration: u32, kind: StepKind) -> Self {
        Self {
            iteration,
            kind,
            timestamp: Utc::now(),
        }
    }

    /// Short label used in rendered traces.
    pub fn label(&self) -> &'static str {
        match self.kind {
            StepKind::Thought { .. } => "Thought",
            StepKind::Action { .. } => "Action",
            StepKind::Observation { .. } => "Observation",
        }
    }

    /// One-line rendering: `[Action] lookup({"code":"I10"})`.
    pub fn render(&self) -> String {
        match &self.kind {
            StepKind::Thought { text } | StepKind::Observation { text } => {
                format!("[{}] {}", self.label(), text)
            }
            StepKind::Action { tool, args } => {
                let args = serde_json::to_string(args).unwrap_or_default();
                format!("[{}] {}({})", self.label(), tool, args)
            }
        }
    }
}

/// The ordered, append-only list of steps in a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    steps: Vec<Step>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step. Steps must arrive in non-decreasing iteration order.
    pub fn push(&mut self, step: Step) {
        debug_assert!(
            self.steps
                .last()
                .is_none_or(|last| last.iteration <= step.iteration),
            "transcript iteration went backwards"
        );
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last(&self) -> Option<&Step> {
        self.steps.last()
    }

    /// Flattened, newline-separated rendering for audit logs.
    pub fn render(&self) -> String {
        self.steps
            .iter()
            .map(|s| format!("#{} {}", s.iteration, s.render()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn into_steps(self) -> Vec<Step> {
        self.steps
    }
}
