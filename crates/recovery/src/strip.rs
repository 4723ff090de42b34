//! Removal of non-data wrapping: reasoning blocks and code fences.

use std::ops::Range;
use std::sync::OnceLock;

use regex_lite::{Match, Regex};

/// Upper bound on strip passes; each productive pass shortens the text.
const MAX_PASSES: usize = 8;

fn paired_reasoning() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(think|thinking|reasoning)>.*?</(think|thinking|reasoning)>")
            .expect("valid regex")
    })
}

fn open_reasoning() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<(think|thinking|reasoning)>").expect("valid regex"))
}

fn close_reasoning() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)</(think|thinking|reasoning)>").expect("valid regex"))
}

fn fence() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"```[A-Za-z0-9_+-]*").expect("valid regex"))
}

/// Strip reasoning blocks and fence markers, to a fixed point.
///
/// Idempotent: `strip_wrappers(&strip_wrappers(x)) == strip_wrappers(x)`.
pub fn strip_wrappers(text: &str) -> String {
    let mut current = text.trim().to_string();
    for _ in 0..MAX_PASSES {
        let next = strip_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn strip_once(text: &str) -> String {
    let without_pairs = replace_outside_strings(paired_reasoning(), text);
    let without_open = strip_unterminated(&without_pairs);
    let without_close = strip_orphan_close(&without_open);
    replace_outside_strings(fence(), &without_close)
        .trim()
        .to_string()
}

/// An opening delimiter with no closer: keep the structured suffix if one
/// exists after it, otherwise drop the whole block.
fn strip_unterminated(text: &str) -> String {
    let Some(m) = find_outside_strings(open_reasoning(), text) else {
        return text.to_string();
    };
    let before = &text[..m.start()];
    let after = &text[m.end()..];
    match after.find(['{', '[']) {
        Some(pos) => format!("{before}{}", &after[pos..]),
        None => before.to_string(),
    }
}

/// A closing delimiter with no opener means the reasoning started before
/// the captured text; everything up to it is reasoning.
fn strip_orphan_close(text: &str) -> String {
    match find_outside_strings(close_reasoning(), text) {
        Some(m) => text[m.end()..].to_string(),
        None => text.to_string(),
    }
}

fn replace_outside_strings(re: &Regex, text: &str) -> String {
    let spans = string_spans(text);
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for m in re.find_iter(text).filter(|m| !in_spans(&spans, m.start())) {
        out.push_str(&text[last..m.start()]);
        last = m.end();
    }
    out.push_str(&text[last..]);
    out
}

fn find_outside_strings<'t>(re: &Regex, text: &'t str) -> Option<Match<'t>> {
    let spans = string_spans(text);
    re.find_iter(text).find(|m| !in_spans(&spans, m.start()))
}

fn in_spans(spans: &[Range<usize>], pos: usize) -> bool {
    spans.iter().any(|span| span.contains(&pos))
}

/// Byte ranges of JSON string literals, quotes included.
///
/// A quote only opens a string inside a bracketed region, so quotes in the
/// surrounding prose are ignored. An unterminated string runs to the end.
fn string_spans(text: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut depth = 0usize;
    let mut open: Option<usize> = None;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if let Some(start) = open {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                spans.push(start..i + 1);
                open = None;
            }
            continue;
        }
        match c {
            '{' | '[' => depth += 1,
            '}' | ']' => depth = depth.saturating_sub(1),
            '"' if depth > 0 => open = Some(i),
            _ => {}
        }
    }
    if let Some(start) = open {
        spans.push(start..text.len());
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_paired_block() {
        assert_eq!(strip_wrappers("<think>hmm {no}</think>\n[1]"), "[1]");
        assert_eq!(strip_wrappers("<THINKING>x</THINKING>{}"), "{}");
    }

    #[test]
    fn unterminated_block_keeps_structured_suffix() {
        assert_eq!(
            strip_wrappers("<think>the answer is clearly {\"a\": 1}"),
            "{\"a\": 1}"
        );
    }

    #[test]
    fn unterminated_block_without_brackets_is_dropped() {
        assert_eq!(strip_wrappers("prefix <think>still going"), "prefix");
    }

    #[test]
    fn orphan_close_drops_leading_reasoning() {
        assert_eq!(strip_wrappers("long reasoning</think>{\"x\": 2}"), "{\"x\": 2}");
    }

    #[test]
    fn fences_removed() {
        assert_eq!(strip_wrappers("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_wrappers("```\n[1,2]\n```"), "[1,2]");
    }

    #[test]
    fn fences_inside_strings_are_kept() {
        let text = "Here:\n```json\n{\"note\": \"wrap code in ```rust``` fences\"}\n```";
        assert_eq!(
            strip_wrappers(text),
            "Here:\n\n{\"note\": \"wrap code in ```rust``` fences\"}"
        );
    }

    #[test]
    fn reasoning_tags_inside_strings_are_kept() {
        assert_eq!(
            strip_wrappers("Result: {\"a\": \"<think>x</think>\", \"b\": 1}"),
            "Result: {\"a\": \"<think>x</think>\", \"b\": 1}"
        );
        assert_eq!(
            strip_wrappers("{\"msg\": \"a stray </think> tag\"} trailing"),
            "{\"msg\": \"a stray </think> tag\"} trailing"
        );
        assert_eq!(
            strip_wrappers("{\"msg\": \"opens <think> only\"}"),
            "{\"msg\": \"opens <think> only\"}"
        );
    }

    #[test]
    fn quotes_in_prose_do_not_hide_wrappers() {
        assert_eq!(
            strip_wrappers("He said \"ok\" <think>hmm</think> {\"a\": 1}"),
            "He said \"ok\"  {\"a\": 1}"
        );
    }

    #[test]
    fn escaped_quotes_stay_inside_the_string() {
        let text = "{\"q\": \"say \\\"</think>\\\" now\"}";
        assert_eq!(strip_wrappers(text), text);
    }

    #[test]
    fn stripping_is_idempotent() {
        let inputs = [
            "<think>a</think>```json\n{}\n```",
            "``````{\"a\":1}````",
            "<think>x<think>y</think>[1]",
            "plain text",
            "</think></think>{}",
            "<think>open [1] <think> [2]",
            "{\"a\": \"```</think>\"} ```",
            "[\"unterminated <think>",
        ];
        for input in inputs {
            let once = strip_wrappers(input);
            assert_eq!(strip_wrappers(&once), once, "input: {input:?}");
        }
    }
}
