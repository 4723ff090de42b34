//! Thread-safe telemetry engine: turns trace records into per-run traces
//! and running usage totals.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use caduceus_config::TelemetryConfig;
use caduceus_core::{TraceEvent, TraceRecord, TraceSink, Usage};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::model::*;

/// The in-memory trace sink.
///
/// Keeps at most `max_traces` traces; finished traces are evicted oldest
/// first. Totals cover every record since creation, evicted or not.
pub struct TelemetryEngine {
    max_traces: usize,
    /// Oldest first.
    traces: RwLock<Vec<Trace>>,
    totals: RwLock<RunningTotals>,
}

#[derive(Debug, Default)]
struct RunningTotals {
    snapshot: UsageSnapshot,
    by_model: HashMap<String, ModelUsage>,
}

impl TelemetryEngine {
    pub fn new(max_traces: usize) -> Self {
        Self {
            max_traces: max_traces.max(1),
            traces: RwLock::new(Vec::new()),
            totals: RwLock::new(RunningTotals::default()),
        }
    }

    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self::new(config.max_traces)
    }

    // ── Recording ─────────────────────────────────────────────────────

    fn apply(&self, record: TraceRecord) {
        let TraceRecord {
            thread_id,
            event,
            timestamp,
        } = record;

        self.count(&event);

        let mut traces = self.traces.write().unwrap_or_else(PoisonError::into_inner);
        let trace = match traces.iter().rposition(|t| t.thread_id == thread_id) {
            Some(pos) => &mut traces[pos],
            None => {
                self.evict(&mut traces);
                traces.push(Trace::new(&thread_id, timestamp));
                let last = traces.len() - 1;
                &mut traces[last]
            }
        };

        match event {
            TraceEvent::RunStarted { metadata, .. } => {
                trace.started_at = timestamp;
                trace.metadata = metadata;
            }
            TraceEvent::ModelCall {
                model,
                duration_ms,
                usage,
                success,
            } => trace.add_span(
                Span::completed(SpanKind::ModelCall, model, timestamp, duration_ms, success)
                    .with_usage(usage),
            ),
            TraceEvent::CapabilityCall {
                name,
                duration_ms,
                success,
            } => trace.add_span(Span::completed(
                SpanKind::CapabilityCall,
                name,
                timestamp,
                duration_ms,
                success,
            )),
            TraceEvent::ParseFailure { .. } => trace.parse_failures += 1,
            TraceEvent::RunFinished {
                outcome,
                iterations,
            } => {
                debug!(%thread_id, %outcome, iterations, "Trace closed");
                trace.end(outcome, iterations, timestamp);
            }
        }
    }

    /// Make room for one more trace.
    fn evict(&self, traces: &mut Vec<Trace>) {
        while traces.len() >= self.max_traces {
            let pos = traces.iter().position(Trace::is_finished).unwrap_or(0);
            let evicted = traces.remove(pos);
            debug!(thread_id = %evicted.thread_id, "Evicting trace");
        }
    }

    fn count(&self, event: &TraceEvent) {
        let mut totals = self.totals.write().unwrap_or_else(PoisonError::into_inner);
        let RunningTotals { snapshot, by_model } = &mut *totals;
        match event {
            TraceEvent::RunStarted { .. } => snapshot.runs_started += 1,
            TraceEvent::ModelCall {
                model,
                usage,
                success,
                ..
            } => {
                snapshot.model_calls += 1;
                if !success {
                    snapshot.model_failures += 1;
                }
                let entry = by_model.entry(model.clone()).or_insert_with(|| ModelUsage {
                    model: model.clone(),
                    ..ModelUsage::default()
                });
                entry.calls += 1;
                if let Some(Usage {
                    prompt_tokens,
                    completion_tokens,
                    total_tokens,
                }) = usage
                {
                    snapshot.prompt_tokens += u64::from(*prompt_tokens);
                    snapshot.completion_tokens += u64::from(*completion_tokens);
                    snapshot.total_tokens += u64::from(*total_tokens);
                    entry.prompt_tokens += u64::from(*prompt_tokens);
                    entry.completion_tokens += u64::from(*completion_tokens);
                }
            }
            TraceEvent::CapabilityCall { success, .. } => {
                snapshot.capability_calls += 1;
                if !success {
                    snapshot.capability_failures += 1;
                }
            }
            TraceEvent::ParseFailure { .. } => snapshot.parse_failures += 1,
            TraceEvent::RunFinished { outcome, .. } => match outcome.as_str() {
                "answer" => snapshot.runs_answered += 1,
                "exhausted" => snapshot.runs_exhausted += 1,
                _ => snapshot.runs_failed += 1,
            },
        }
    }

    // ── Queries ───────────────────────────────────────────────────────

    /// The most recent trace for a thread.
    pub fn get_trace(&self, thread_id: &str) -> Option<Trace> {
        let traces = self.traces.read().unwrap_or_else(PoisonError::into_inner);
        traces.iter().rev().find(|t| t.thread_id == thread_id).cloned()
    }

    /// Most recent first.
    pub fn recent_traces(&self, limit: usize) -> Vec<Trace> {
        let traces = self.traces.read().unwrap_or_else(PoisonError::into_inner);
        traces.iter().rev().take(limit).cloned().collect()
    }

    pub fn trace_count(&self) -> usize {
        self.traces
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn usage_snapshot(&self) -> UsageSnapshot {
        let totals = self.totals.read().unwrap_or_else(PoisonError::into_inner);
        let mut by_model: Vec<ModelUsage> = totals.by_model.values().cloned().collect();
        by_model.sort_by(|a, b| {
            (b.prompt_tokens + b.completion_tokens)
                .cmp(&(a.prompt_tokens + a.completion_tokens))
                .then_with(|| a.model.cmp(&b.model))
        });

        UsageSnapshot {
            trace_count: self.trace_count() as u64,
            by_model,
            ..totals.snapshot.clone()
        }
    }

    /// Drop traces that started before `cutoff`. Returns how many.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut traces = self.traces.write().unwrap_or_else(PoisonError::into_inner);
        let before = traces.len();
        traces.retain(|t| t.started_at >= cutoff);
        before - traces.len()
    }
}

impl TraceSink for TelemetryEngine {
    fn record(&self, record: TraceRecord) {
        self.apply(record);
    }
}

impl Default for TelemetryEngine {
    fn default() -> Self {
        Self::from_config(&TelemetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::Map;

    fn started(thread: &str) -> TraceRecord {
        TraceRecord::new(
            thread,
            TraceEvent::RunStarted {
                max_iterations: 6,
                capabilities: vec!["bmi".into()],
                metadata: Map::new(),
            },
        )
    }

    fn model_call(thread: &str, model: &str, prompt: u32, completion: u32) -> TraceRecord {
        TraceRecord::new(
            thread,
            TraceEvent::ModelCall {
                model: model.into(),
                duration_ms: 120,
                usage: Some(Usage {
                    prompt_tokens: prompt,
                    completion_tokens: completion,
                    total_tokens: prompt + completion,
                }),
                success: true,
            },
        )
    }

    fn finished(thread: &str, outcome: &str) -> TraceRecord {
        TraceRecord::new(
            thread,
            TraceEvent::RunFinished {
                outcome: outcome.into(),
                iterations: 2,
            },
        )
    }

    #[test]
    fn run_lifecycle_builds_one_trace() {
        let engine = TelemetryEngine::new(10);
        engine.record(started("t-1"));
        engine.record(model_call("t-1", "claude-sonnet-4", 100, 50));
        engine.record(TraceRecord::new(
            "t-1",
            TraceEvent::CapabilityCall {
                name: "bmi".into(),
                duration_ms: 1,
                success: false,
            },
        ));
        engine.record(TraceRecord::new(
            "t-1",
            TraceEvent::ParseFailure {
                iteration: 2,
                reason: "no JSON".into(),
            },
        ));
        engine.record(finished("t-1", "answer"));

        assert_eq!(engine.trace_count(), 1);
        let trace = engine.get_trace("t-1").unwrap();
        assert_eq!(trace.model_call_count(), 1);
        assert_eq!(trace.capability_call_count(), 1);
        assert_eq!(trace.parse_failures, 1);
        assert_eq!(trace.usage().total_tokens, 150);
        assert_eq!(trace.outcome.as_deref(), Some("answer"));

        let snapshot = engine.usage_snapshot();
        assert_eq!(snapshot.runs_started, 1);
        assert_eq!(snapshot.runs_answered, 1);
        assert_eq!(snapshot.capability_failures, 1);
        assert_eq!(snapshot.parse_failures, 1);
        assert_eq!(snapshot.total_tokens, 150);
    }

    #[test]
    fn events_without_run_start_open_a_trace() {
        let engine = TelemetryEngine::new(10);
        engine.record(model_call("assess-1", "m", 10, 5));
        let trace = engine.get_trace("assess-1").unwrap();
        assert_eq!(trace.spans.len(), 1);
        assert!(!trace.is_finished());
    }

    #[test]
    fn retention_is_bounded_and_prefers_finished() {
        let engine = TelemetryEngine::new(3);
        engine.record(started("running"));
        for i in 0..5 {
            let thread = format!("done-{i}");
            engine.record(started(&thread));
            engine.record(finished(&thread, "exhausted"));
        }

        assert_eq!(engine.trace_count(), 3);
        assert!(engine.get_trace("running").is_some());
        assert!(engine.get_trace("done-0").is_none());
        assert!(engine.get_trace("done-4").is_some());

        let snapshot = engine.usage_snapshot();
        assert_eq!(snapshot.runs_started, 6);
        assert_eq!(snapshot.runs_exhausted, 5);
        assert_eq!(snapshot.trace_count, 3);
    }

    #[test]
    fn usage_by_model_sorted_by_tokens() {
        let engine = TelemetryEngine::new(10);
        engine.record(model_call("a", "small", 10, 10));
        engine.record(model_call("a", "large", 500, 100));
        engine.record(model_call("b", "small", 10, 10));

        let snapshot = engine.usage_snapshot();
        assert_eq!(snapshot.model_calls, 3);
        assert_eq!(snapshot.by_model[0].model, "large");
        assert_eq!(snapshot.by_model[1].calls, 2);
        assert_eq!(snapshot.prompt_tokens, 520);
    }

    #[test]
    fn recent_traces_newest_first() {
        let engine = TelemetryEngine::new(10);
        for i in 0..5 {
            engine.record(started(&format!("t-{i}")));
        }
        let recent = engine.recent_traces(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].thread_id, "t-4");
        assert_eq!(recent[2].thread_id, "t-2");
    }

    #[test]
    fn failed_outcome_counted() {
        let engine = TelemetryEngine::default();
        engine.record(started("t"));
        engine.record(finished("t", "failed"));
        assert_eq!(engine.usage_snapshot().runs_failed, 1);
    }

    #[test]
    fn prune_old_traces() {
        let engine = TelemetryEngine::new(10);
        engine.record(started("t-1"));
        engine.record(started("t-2"));

        let future = Utc::now() + Duration::hours(1);
        assert_eq!(engine.prune_before(future), 2);
        assert_eq!(engine.trace_count(), 0);
    }
}
