//! Locating a bracketed span and light repairs on it.

/// Byte offsets of up to `max` opening brackets (`{` or `[`), in order.
pub fn opening_positions(text: &str, max: usize) -> Vec<usize> {
    text.char_indices()
        .filter(|&(_, c)| c == '{' || c == '[')
        .map(|(i, _)| i)
        .take(max)
        .collect()
}

/// From the opening bracket at the start of `text` to the last matching
/// closer character. Returns all of `text` when no closer exists.
pub fn bracket_span(text: &str) -> &str {
    let closer = match text.chars().next() {
        Some('{') => '}',
        Some('[') => ']',
        _ => return text,
    };
    match text.rfind(closer) {
        Some(end) => &text[..=end],
        None => text,
    }
}

/// Drop commas that directly precede a closing bracket, ignoring string
/// contents.
pub fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
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
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }

    out
}
