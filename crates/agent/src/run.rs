//! Run inputs, outputs, and the two failures that escape a run.

use caduceus_core::{CapabilityRegistry, ProviderError, Step, TransportError, Usage};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default cycle budget when the caller does not set one.
pub const DEFAULT_MAX_ITERATIONS: u32 = 6;

/// One task for the agent loop.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub prompt: String,
    /// Replaces the built-in role instructions when set.
    pub system_prompt: Option<String>,
    pub tools: CapabilityRegistry,
    pub max_iterations: u32,
    /// Correlates logs, traces, and the report. Generated when absent.
    pub thread_id: Option<String>,
    /// Opaque caller data, forwarded to the trace sink.
    pub metadata: Map<String, Value>,
}

impl RunRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            tools: CapabilityRegistry::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            thread_id: None,
            metadata: Map::new(),
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_tools(mut self, tools: CapabilityRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The model gave a final answer.
    Answer,
    /// The cycle budget ran out first. No answer is invented.
    Exhausted,
    /// The provider or the transport failed.
    Failed { reason: String },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Answer => "answer",
            Self::Exhausted => "exhausted",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Everything a finished (or failed) run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub thread_id: String,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    pub steps: Vec<Step>,
    /// Completed cycles.
    pub iterations: u32,
    /// Distinct capabilities invoked, in first-use order.
    pub tools_used: Vec<String>,
    /// Flattened transcript for audit logs.
    pub reasoning_trace: String,
    pub usage: Usage,
    pub model_calls: u32,
}

impl RunReport {
    pub fn is_answer(&self) -> bool {
        self.outcome == Outcome::Answer
    }
}

/// A failure that ends a run. The partial report carries every step
/// committed before the failure.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("provider failed: {source}")]
    Provider {
        source: ProviderError,
        report: Box<RunReport>,
    },

    #[error("transport failed: {source}")]
    Transport {
        source: TransportError,
        report: Box<RunReport>,
    },
}

impl RunError {
    pub fn report(&self) -> &RunReport {
        match self {
            Self::Provider { report, .. } | Self::Transport { report, .. } => report,
        }
    }

    pub fn into_report(self) -> RunReport {
        match self {
            Self::Provider { report, .. } | Self::Transport { report, .. } => *report,
        }
    }

    /// Whether the caller may retry the whole run.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider { source, .. } => source.is_retryable(),
            Self::Transport { .. } => false,
        }
    }
}
