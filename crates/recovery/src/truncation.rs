//! Recovery of output cut off mid-structure, usually by a token limit.
//!
//! Candidate cut points are closing brackets, scanned from the end. A cut
//! that closes a direct child of the root container is preferred over a cut
//! inside a nested value, so a half-written element is never returned as if
//! it were whole.

use serde_json::Value;

use crate::decode_structured;
use crate::extract::strip_trailing_commas;

/// Bound on the number of cut points tried.
const MAX_CUT_ATTEMPTS: usize = 512;

/// Recover the longest non-empty prefix of a truncated object or array.
pub fn recover_truncated(text: &str) -> Option<Value> {
    let cuts: Vec<usize> = text
        .char_indices()
        .rev()
        .filter(|&(_, c)| c == '}' || c == ']')
        .map(|(i, _)| i)
        .take(MAX_CUT_ATTEMPTS)
        .collect();

    let mut nested = Vec::new();
    for &cut in &cuts {
        let slice = &text[..cut + 1];
        let Some(missing) = missing_closers(slice) else {
            continue;
        };
        if missing.len() == 1 {
            if let Some(value) = close_and_decode(slice, &missing) {
                return Some(value);
            }
        } else if !missing.is_empty() {
            nested.push((slice, missing));
        }
    }

    nested
        .into_iter()
        .find_map(|(slice, missing)| close_and_decode(slice, &missing))
}

fn close_and_decode(slice: &str, missing: &[char]) -> Option<Value> {
    let mut candidate = String::with_capacity(slice.len() + missing.len());
    candidate.push_str(slice);
    candidate.extend(missing.iter().rev());
    match decode_structured(&strip_trailing_commas(&candidate))? {
        Value::Array(items) if items.is_empty() => None,
        Value::Object(map) if map.is_empty() => None,
        value => Some(value),
    }
}

/// Closers still owed at the end of `slice`, innermost last. `None` when the
/// slice has a mismatched closer or ends inside a string literal.
fn missing_closers(slice: &str) -> Option<Vec<char>> {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in slice.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(c) {
                    return None;
                }
            }
            _ => {}
        }
    }

    (!in_string).then_some(stack)
}
