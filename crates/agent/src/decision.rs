//! Classifying one model response as a capability invocation or a final
//! answer.
//!
//! Accepted shapes, most specific first:
//!
//! ```text
//! {"thought": "...", "action": {"tool": "bmi", "args": {...}}}
//! {"thought": "...", "action": {"tool": "final_answer", "args": {"answer": ...}}}
//! {"thought": "...", "action": "bmi", "args": {...}}          (also "action_input")
//! {"thought": "...", "tool": "bmi", "args": {...}}
//! {"thought": "...", "action": "final_answer", "action_input": ...}
//! {"thought": "...", "final_answer": ...}                      (also "answer")
//! ```
//!
//! When a response carries both an invocation and an answer, the
//! invocation wins. A non-string answer is kept as its JSON text.

use serde_json::{Map, Value};

/// What the model asked for.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Invoke {
        thought: Option<String>,
        tool: String,
        args: Value,
    },
    Final {
        thought: Option<String>,
        answer: String,
    },
}

impl Decision {
    pub fn thought(&self) -> Option<&str> {
        match self {
            Self::Invoke { thought, .. } | Self::Final { thought, .. } => thought.as_deref(),
        }
    }
}

/// Action names that mean "I am done".
const FINAL_ACTIONS: &[&str] = &["final_answer", "final", "finish", "answer"];

/// Parse a raw response. The error is a short reason suitable for an
/// Observation.
pub fn parse(text: &str) -> Result<Decision, String> {
    let value = caduceus_recovery::recover(text).map_err(|e| e.to_string())?;
    let object = match value {
        Value::Object(map) => map,
        Value::Array(items) => match items.into_iter().next() {
            Some(Value::Object(map)) => map,
            _ => return Err("expected a JSON object, got an array".into()),
        },
        _ => return Err("expected a JSON object".into()),
    };
    classify(object)
}

fn classify(mut object: Map<String, Value>) -> Result<Decision, String> {
    let thought = take_text(&object, &["thought", "reasoning", "thinking"]);

    if let Some((tool, args)) = invocation(&mut object) {
        return Ok(Decision::Invoke {
            thought,
            tool,
            args,
        });
    }

    if let Some(answer) = final_answer(&mut object) {
        return Ok(Decision::Final { thought, answer });
    }

    Err("response has neither an action nor a final_answer".into())
}

fn invocation(object: &mut Map<String, Value>) -> Option<(String, Value)> {
    match object.get("action") {
        Some(Value::Object(action)) => {
            let tool = action
                .get("tool")
                .or_else(|| action.get("name"))
                .and_then(Value::as_str)?
                .to_string();
            if is_final_action(&tool) {
                return None;
            }
            let args = ["args", "arguments", "input"]
                .iter()
                .find_map(|k| action.get(*k).cloned())
                .unwrap_or(Value::Null);
            Some((tool, args))
        }
        Some(Value::String(tool)) if !is_final_action(tool) && !tool.trim().is_empty() => {
            let tool = tool.trim().to_string();
            let args = take_value(object, &["args", "action_input", "arguments"]);
            Some((tool, args))
        }
        _ => {
            let tool = object.get("tool").and_then(Value::as_str)?.trim().to_string();
            if tool.is_empty() {
                return None;
            }
            let args = take_value(object, &["args", "arguments", "input"]);
            Some((tool, args))
        }
    }
}

fn final_answer(object: &mut Map<String, Value>) -> Option<String> {
    let flat_final = object
        .get("action")
        .and_then(Value::as_str)
        .is_some_and(is_final_action);
    let value = if flat_final {
        object.remove("action_input")
    } else {
        match object.get_mut("action") {
            Some(Value::Object(action)) => nested_final(action),
            _ => None,
        }
    };

    let value = value
        .or_else(|| object.remove("final_answer"))
        .or_else(|| object.remove("answer"))?;

    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// `{"tool": "final_answer", "args": ...}`: the answer is the single
/// answer-like field of `args` when there is one, else `args` itself.
fn nested_final(action: &mut Map<String, Value>) -> Option<Value> {
    let tool = action
        .get("tool")
        .or_else(|| action.get("name"))
        .and_then(Value::as_str)?;
    if !is_final_action(tool) {
        return None;
    }
    let args = take_value(action, &["args", "arguments", "input"]);
    match args {
        Value::Object(mut map) => {
            let field = ["answer", "final_answer", "text", "result"]
                .iter()
                .find_map(|k| map.remove(*k));
            match field {
                Some(value) => Some(value),
                None if map.is_empty() => None,
                None => Some(Value::Object(map)),
            }
        }
        other => Some(other),
    }
}

fn is_final_action(name: &str) -> bool {
    FINAL_ACTIONS.contains(&name.trim().to_ascii_lowercase().as_str())
}

fn take_text(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| object.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn take_value(object: &mut Map<String, Value>, keys: &[&str]) -> Value {
    keys.iter()
        .find_map(|k| object.remove(*k))
        .unwrap_or(Value::Null)
}
