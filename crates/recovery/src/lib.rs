//! Recovery of structured data from unreliable model text.
//!
//! Models wrap JSON in reasoning blocks and code fences, leave trailing
//! commas, and get cut off mid-array when they hit a token limit. This crate
//! extracts one JSON object or array from such text, escalating effort:
//!
//! ```text
//! 0. the whole text decodes as-is
//! 1. strip <think> blocks and ``` fences
//! 2. first opening bracket .. matching last closer
//! 3. same span with trailing commas removed
//! 4. truncation recovery: cut at a closer, append the missing closers
//! ```
//!
//! Nothing here panics on any input; every failure is a [`RecoveryError`].

pub mod extract;
pub mod strip;
pub mod truncation;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

pub use strip::strip_wrappers;

/// How many leading characters of the input a diagnostic quotes.
const DIAGNOSTIC_PREFIX_CHARS: usize = 200;

/// How many distinct opening brackets are tried as extraction starts.
const MAX_START_CANDIDATES: usize = 8;

/// Why no structured value could be recovered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecoveryError {
    #[error("no JSON object or array found in: {prefix:?}")]
    NoStructure { prefix: String },

    #[error("could not recover JSON (truncated or malformed): {prefix:?}")]
    Unrecoverable { prefix: String },

    #[error("recovered JSON does not match the expected shape: {reason}")]
    Shape { reason: String },
}

/// Which stage produced the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMethod {
    Direct,
    Extracted,
    TrailingCommas,
    Truncated,
}

/// A successfully recovered value.
#[derive(Debug, Clone, PartialEq)]
pub struct Recovered {
    pub value: Value,
    pub method: RecoveryMethod,
}

/// Recover one JSON object or array from `text`.
pub fn recover(text: &str) -> Result<Value, RecoveryError> {
    recover_detailed(text).map(|r| r.value)
}

/// Recover and deserialize into `T`.
pub fn recover_as<T: DeserializeOwned>(text: &str) -> Result<T, RecoveryError> {
    let value = recover(text)?;
    serde_json::from_value(value).map_err(|e| RecoveryError::Shape {
        reason: e.to_string(),
    })
}

/// Recover, also reporting which stage succeeded.
pub fn recover_detailed(text: &str) -> Result<Recovered, RecoveryError> {
    let trimmed = text.trim();
    if let Some(value) = decode_structured(trimmed) {
        return Ok(Recovered {
            value,
            method: RecoveryMethod::Direct,
        });
    }

    let stripped = strip_wrappers(text);
    let starts = extract::opening_positions(&stripped, MAX_START_CANDIDATES);
    if starts.is_empty() {
        return Err(RecoveryError::NoStructure {
            prefix: prefix(text),
        });
    }

    for &start in &starts {
        if let Some(recovered) = recover_from(&stripped[start..]) {
            debug!(method = ?recovered.method, start, "Recovered structured output");
            return Ok(recovered);
        }
    }

    Err(RecoveryError::Unrecoverable {
        prefix: prefix(text),
    })
}

/// Run stages 2–4 on text that begins with an opening bracket.
fn recover_from(text: &str) -> Option<Recovered> {
    let span = extract::bracket_span(text);

    if let Some(value) = decode_structured(span) {
        return Some(Recovered {
            value,
            method: RecoveryMethod::Extracted,
        });
    }

    let cleaned = extract::strip_trailing_commas(span);
    if let Some(value) = decode_structured(&cleaned) {
        return Some(Recovered {
            value,
            method: RecoveryMethod::TrailingCommas,
        });
    }

    truncation::recover_truncated(text).map(|value| Recovered {
        value,
        method: RecoveryMethod::Truncated,
    })
}

/// Decode only objects and arrays.
pub(crate) fn decode_structured(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(v @ (Value::Object(_) | Value::Array(_))) => Some(v),
        _ => None,
    }
}

fn prefix(text: &str) -> String {
    text.chars().take(DIAGNOSTIC_PREFIX_CHARS).collect()
}
