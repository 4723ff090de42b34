//! Observability side-channel.
//!
//! The agent loop reports what it does to a [`TraceSink`]. Sinks are
//! best-effort: recording must never block the loop and a failing sink must
//! never fail a run. Wrap untrusted sinks in [`BestEffortSink`].

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::provider::Usage;

/// Something worth tracing that happened during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    RunStarted {
        max_iterations: u32,
        capabilities: Vec<String>,
        #[serde(default)]
        metadata: serde_json::Map<String, serde_json::Value>,
    },
    ModelCall {
        model: String,
        duration_ms: u64,
        usage: Option<Usage>,
        success: bool,
    },
    CapabilityCall {
        name: String,
        duration_ms: u64,
        success: bool,
    },
    ParseFailure {
        iteration: u32,
        reason: String,
    },
    RunFinished {
        outcome: String,
        iterations: u32,
    },
}

/// A trace event tagged with the run it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub thread_id: String,
    pub event: TraceEvent,
    pub timestamp: DateTime<Utc>,
}

impl TraceRecord {
    pub fn new(thread_id: impl Into<String>, event: TraceEvent) -> Self {
        Self {
            thread_id: thread_id.into(),
            event,
            timestamp: Utc::now(),
        }
    }
}

/// A consumer of trace records.
pub trait TraceSink: Send + Sync {
    fn record(&self, record: TraceRecord);
}

/// A sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl TraceSink for NoopSink {
    fn record(&self, _record: TraceRecord) {}
}

/// Shields the caller from a misbehaving sink: panics are caught and logged.
#[derive(Clone)]
pub struct BestEffortSink {
    inner: Arc<dyn TraceSink>,
}

impl BestEffortSink {
    pub fn new(inner: Arc<dyn TraceSink>) -> Self {
        Self { inner }
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopSink))
    }
}

impl TraceSink for BestEffortSink {
    fn record(&self, record: TraceRecord) {
        let thread_id = record.thread_id.clone();
        let inner = &self.inner;
        if catch_unwind(AssertUnwindSafe(|| inner.record(record))).is_err() {
            warn!(%thread_id, "Trace sink panicked; record dropped");
        }
    }
}

impl std::fmt::Debug for BestEffortSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BestEffortSink")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Collecting(Mutex<Vec<TraceRecord>>);

    impl TraceSink for Collecting {
        fn record(&self, record: TraceRecord) {
            self.0.lock().unwrap().push(record);
        }
    }

    struct Exploding;

    impl TraceSink for Exploding {
        fn record(&self, _record: TraceRecord) {
            panic!("sink is down");
        }
    }

    fn finished() -> TraceRecord {
        TraceRecord::new(
            "t-1",
            TraceEvent::RunFinished {
                outcome: "answer".into(),
                iterations: 2,
            },
        )
    }

    #[test]
    fn best_effort_forwards_records() {
        let inner = Arc::new(Collecting(Mutex::new(Vec::new())));
        let sink = BestEffortSink::new(inner.clone());
        sink.record(finished());
        assert_eq!(inner.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn best_effort_swallows_panics() {
        let sink = BestEffortSink::new(Arc::new(Exploding));
        sink.record(finished());
    }

    #[test]
    fn trace_event_serialization() {
        let json = serde_json::to_string(&finished()).unwrap();
        assert!(json.contains(r#""event":"run_finished""#));
        assert!(json.contains(r#""thread_id":"t-1""#));
    }
}
