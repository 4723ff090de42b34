//! Data model for run traces, spans, and usage summaries.

use caduceus_core::Usage;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Span ──────────────────────────────────────────────────────────────────

/// The kind of work a span represents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    /// A text-generation call.
    ModelCall,
    /// A capability invocation.
    CapabilityCall,
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ModelCall => write!(f, "model_call"),
            Self::CapabilityCall => write!(f, "capability_call"),
        }
    }
}

/// A single traced execution unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub id: String,
    pub kind: SpanKind,
    /// Model name or capability name.
    pub label: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub success: bool,
}

impl Span {
    /// A span that finished at `ended_at` after `duration_ms`.
    pub fn completed(
        kind: SpanKind,
        label: impl Into<String>,
        ended_at: DateTime<Utc>,
        duration_ms: u64,
        success: bool,
    ) -> Self {
        let elapsed = Duration::milliseconds(i64::try_from(duration_ms).unwrap_or(i64::MAX));
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            label: label.into(),
            started_at: ended_at.checked_sub_signed(elapsed).unwrap_or(ended_at),
            ended_at,
            duration_ms,
            usage: None,
            success,
        }
    }

    pub fn with_usage(mut self, usage: Option<Usage>) -> Self {
        self.usage = usage;
        self
    }

    /// Total tokens, or 0 if not reported.
    pub fn total_tokens(&self) -> u32 {
        self.usage.map_or(0, |u| u.total_tokens)
    }
}

// ── Trace ─────────────────────────────────────────────────────────────────

/// All spans for one run, keyed by its thread id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub thread_id: String,
    pub spans: Vec<Span>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Terminal outcome label, once the run finished.
    pub outcome: Option<String>,
    pub iterations: u32,
    pub parse_failures: u32,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Trace {
    pub fn new(thread_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            thread_id: thread_id.into(),
            spans: Vec::new(),
            started_at,
            ended_at: None,
            outcome: None,
            iterations: 0,
            parse_failures: 0,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn add_span(&mut self, span: Span) {
        self.spans.push(span);
    }

    pub fn end(&mut self, outcome: impl Into<String>, iterations: u32, at: DateTime<Utc>) {
        self.outcome = Some(outcome.into());
        self.iterations = iterations;
        self.ended_at = Some(at);
    }

    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Summed token usage across model calls.
    pub fn usage(&self) -> Usage {
        let mut total = Usage::default();
        for usage in self.spans.iter().filter_map(|s| s.usage.as_ref()) {
            total.accumulate(usage);
        }
        total
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.spans.iter().map(|s| s.duration_ms).sum()
    }

    pub fn model_call_count(&self) -> usize {
        self.count(SpanKind::ModelCall)
    }

    pub fn capability_call_count(&self) -> usize {
        self.count(SpanKind::CapabilityCall)
    }

    fn count(&self, kind: SpanKind) -> usize {
        self.spans.iter().filter(|s| s.kind == kind).count()
    }
}

// ── Aggregated views ──────────────────────────────────────────────────────

/// Point-in-time totals since the engine was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub runs_started: u64,
    pub runs_answered: u64,
    pub runs_exhausted: u64,
    pub runs_failed: u64,
    pub model_calls: u64,
    pub model_failures: u64,
    pub capability_calls: u64,
    pub capability_failures: u64,
    pub parse_failures: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    /// Traces currently retained.
    pub trace_count: u64,
    /// Per-model breakdown, most tokens first.
    pub by_model: Vec<ModelUsage>,
}

/// Usage for a single model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub model: String,
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(prompt: u32, completion: u32) -> Option<Usage> {
        Some(Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
        })
    }

    #[test]
    fn completed_span_backdates_start() {
        let now = Utc::now();
        let span = Span::completed(SpanKind::ModelCall, "claude-sonnet-4", now, 1500, true)
            .with_usage(usage(100, 50));
        assert_eq!(span.ended_at - span.started_at, Duration::milliseconds(1500));
        assert_eq!(span.total_tokens(), 150);
    }

    #[test]
    fn trace_aggregation() {
        let now = Utc::now();
        let mut trace = Trace::new("thread-1", now);

        trace.add_span(
            Span::completed(SpanKind::ModelCall, "m", now, 10, true).with_usage(usage(100, 50)),
        );
        trace.add_span(Span::completed(SpanKind::CapabilityCall, "bmi", now, 2, true));
        trace.add_span(
            Span::completed(SpanKind::ModelCall, "m", now, 20, true).with_usage(usage(200, 100)),
        );
        trace.end("answer", 2, now);

        assert_eq!(trace.usage().total_tokens, 450);
        assert_eq!(trace.total_duration_ms(), 32);
        assert_eq!(trace.model_call_count(), 2);
        assert_eq!(trace.capability_call_count(), 1);
        assert!(trace.is_finished());
        assert_eq!(trace.outcome.as_deref(), Some("answer"));
    }

    #[test]
    fn span_kind_display() {
        assert_eq!(SpanKind::ModelCall.to_string(), "model_call");
        assert_eq!(SpanKind::CapabilityCall.to_string(), "capability_call");
    }

    #[test]
    fn trace_serialization_roundtrip() {
        let now = Utc::now();
        let mut trace = Trace::new("thread-42", now);
        trace.add_span(Span::completed(SpanKind::CapabilityCall, "crcl", now, 1, false));
        trace.end("exhausted", 6, now);

        let json = serde_json::to_string(&trace).unwrap();
        let roundtrip: Trace = serde_json::from_str(&json).unwrap();

        assert_eq!(roundtrip.thread_id, "thread-42");
        assert_eq!(roundtrip.spans.len(), 1);
        assert!(!roundtrip.spans[0].success);
    }
}
