//! Delimiter-scanning JSON parser
//!
//! Each container is parsed by first splitting its interior at top-level
//! separators (tracking quotes, escapes and nesting), then parsing every
//! slice recursively. Offsets in errors are byte offsets into the input.

use super::{JsonError, JsonErrorKind, JsonObject, JsonString, JsonValue};

/// Deepest container nesting accepted
pub const MAX_DEPTH: usize = 128;

/// Parse JSON text into a value tree
pub fn parse(text: &str) -> Result<JsonValue, JsonError> {
    let bytes = text.as_bytes();
    let (start, end) = trim(bytes, 0, bytes.len());
    if start == end {
        return Err(JsonError::new(0, JsonErrorKind::Empty));
    }
    parse_range(text, start, end, 0)
}

fn is_ws(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

/// Narrow `start..end` to exclude surrounding whitespace
fn trim(bytes: &[u8], mut start: usize, mut end: usize) -> (usize, usize) {
    while start < end && is_ws(bytes[start]) {
        start += 1;
    }
    while end > start && is_ws(bytes[end - 1]) {
        end -= 1;
    }
    (start, end)
}

/// Parse a trimmed, non-empty range. `depth` counts the enclosing containers.
fn parse_range(text: &str, start: usize, end: usize, depth: usize) -> Result<JsonValue, JsonError> {
    let bytes = text.as_bytes();
    match bytes[start] {
        b'{' | b'[' if depth >= MAX_DEPTH => {
            Err(JsonError::new(start, JsonErrorKind::TooDeep(MAX_DEPTH)))
        }
        b'{' => {
            let close = find_close(bytes, start, end)?;
            ensure_consumed(bytes, close + 1, end)?;
            parse_object(text, start + 1, close, depth + 1)
        }
        b'[' => {
            let close = find_close(bytes, start, end)?;
            ensure_consumed(bytes, close + 1, end)?;
            parse_array(text, start + 1, close, depth + 1)
        }
        b'"' => {
            let close = find_string_end(bytes, start, end)?;
            ensure_consumed(bytes, close + 1, end)?;
            validate_escapes(bytes, start + 1, close)?;
            Ok(JsonValue::String(JsonString::from_source(&text[start + 1..close])))
        }
        b't' | b'f' | b'n' => parse_literal(text, start, end),
        b'-' | b'+' | b'.' | b'0'..=b'9' => parse_number(text, start, end),
        other => Err(JsonError::new(
            start,
            JsonErrorKind::UnexpectedCharacter(char::from(other)),
        )),
    }
}

/// Anything left after a complete value is an error
fn ensure_consumed(bytes: &[u8], from: usize, end: usize) -> Result<(), JsonError> {
    let (rest, _) = trim(bytes, from, end);
    if rest < end {
        return Err(JsonError::new(
            rest,
            JsonErrorKind::UnexpectedCharacter(char::from(bytes[rest])),
        ));
    }
    Ok(())
}

/// Index of the closing quote of the string opening at `start`
fn find_string_end(bytes: &[u8], start: usize, end: usize) -> Result<usize, JsonError> {
    let mut i = start + 1;
    while i < end {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => return Ok(i),
            _ => i += 1,
        }
    }
    Err(JsonError::new(start, JsonErrorKind::UnterminatedString))
}

/// Index of the delimiter closing the container opening at `start`.
///
/// Validates the nesting of everything in between.
fn find_close(bytes: &[u8], start: usize, end: usize) -> Result<usize, JsonError> {
    let mut stack: Vec<(u8, usize)> = Vec::new();
    let mut i = start;
    while i < end {
        match bytes[i] {
            b'"' => {
                i = find_string_end(bytes, i, end)?;
            }
            open @ (b'{' | b'[') => stack.push((open, i)),
            close @ (b'}' | b']') => {
                let Some((open, _)) = stack.pop() else {
                    return Err(JsonError::new(
                        i,
                        JsonErrorKind::UnexpectedCharacter(char::from(close)),
                    ));
                };
                let expected = if open == b'{' { b'}' } else { b']' };
                if close != expected {
                    return Err(JsonError::new(
                        i,
                        JsonErrorKind::MismatchedDelimiter {
                            expected: char::from(expected),
                            found: char::from(close),
                        },
                    ));
                }
                if stack.is_empty() {
                    return Ok(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    let (open, at) = stack.last().copied().unwrap_or((bytes[start], start));
    Err(JsonError::new(at, JsonErrorKind::UnclosedDelimiter(char::from(open))))
}

/// Split `start..end` at top-level occurrences of `separator`.
///
/// Returns untrimmed sub-ranges. Nesting inside the range has already been
/// validated by `find_close` on the enclosing container.
fn split_top_level(
    bytes: &[u8],
    start: usize,
    end: usize,
    separator: u8,
) -> Result<Vec<(usize, usize)>, JsonError> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut part_start = start;
    let mut i = start;
    while i < end {
        match bytes[i] {
            b'"' => i = find_string_end(bytes, i, end)?,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => depth = depth.saturating_sub(1),
            b if b == separator && depth == 0 => {
                parts.push((part_start, i));
                part_start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push((part_start, end));
    Ok(parts)
}

/// Position of the first top-level `:` in a member range
fn find_colon(bytes: &[u8], start: usize, end: usize) -> Result<Option<usize>, JsonError> {
    let mut i = start;
    while i < end {
        match bytes[i] {
            b'"' => i = find_string_end(bytes, i, end)?,
            b':' => return Ok(Some(i)),
            _ => {}
        }
        i += 1;
    }
    Ok(None)
}

fn parse_object(
    text: &str,
    start: usize,
    end: usize,
    depth: usize,
) -> Result<JsonValue, JsonError> {
    let bytes = text.as_bytes();
    let mut members = JsonObject::new();
    let (inner_start, inner_end) = trim(bytes, start, end);
    if inner_start == inner_end {
        return Ok(JsonValue::Object(members));
    }

    for (part_start, part_end) in split_top_level(bytes, start, end, b',')? {
        let (ms, me) = trim(bytes, part_start, part_end);
        if ms == me {
            return Err(JsonError::new(ms, JsonErrorKind::EmptyElement));
        }
        if bytes[ms] != b'"' {
            return Err(JsonError::new(ms, JsonErrorKind::MissingKey));
        }
        let colon = find_colon(bytes, ms, me)?
            .ok_or_else(|| JsonError::new(ms, JsonErrorKind::MissingColon))?;

        let (ks, ke) = trim(bytes, ms, colon);
        let key = match parse_range(text, ks, ke, depth)? {
            JsonValue::String(s) => s.into_string(),
            _ => return Err(JsonError::new(ks, JsonErrorKind::MissingKey)),
        };

        let (vs, ve) = trim(bytes, colon + 1, me);
        if vs == ve {
            return Err(JsonError::new(vs, JsonErrorKind::EmptyElement));
        }
        let value = parse_range(text, vs, ve, depth)?;
        members.insert(key, value);
    }
    Ok(JsonValue::Object(members))
}

fn parse_array(
    text: &str,
    start: usize,
    end: usize,
    depth: usize,
) -> Result<JsonValue, JsonError> {
    let bytes = text.as_bytes();
    let (inner_start, inner_end) = trim(bytes, start, end);
    if inner_start == inner_end {
        return Ok(JsonValue::Array(Vec::new()));
    }

    let mut items = Vec::new();
    for (part_start, part_end) in split_top_level(bytes, start, end, b',')? {
        let (s, e) = trim(bytes, part_start, part_end);
        if s == e {
            return Err(JsonError::new(s, JsonErrorKind::EmptyElement));
        }
        items.push(parse_range(text, s, e, depth)?);
    }
    Ok(JsonValue::Array(items))
}

fn parse_literal(text: &str, start: usize, end: usize) -> Result<JsonValue, JsonError> {
    match &text[start..end] {
        "true" => Ok(JsonValue::Bool(true)),
        "false" => Ok(JsonValue::Bool(false)),
        "null" => Ok(JsonValue::Null),
        _ => Err(JsonError::new(start, JsonErrorKind::InvalidLiteral)),
    }
}

/// Permissive decimal grammar: sign, digits, fraction and exponent in any
/// combination the float parser accepts.
fn parse_number(text: &str, start: usize, end: usize) -> Result<JsonValue, JsonError> {
    let slice = &text[start..end];
    if let Some(pos) = slice
        .bytes()
        .position(|b| !matches!(b, b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E'))
    {
        let bad = slice.as_bytes()[pos];
        return Err(JsonError::new(
            start + pos,
            JsonErrorKind::UnexpectedCharacter(char::from(bad)),
        ));
    }
    slice
        .parse::<f64>()
        .map(JsonValue::Number)
        .map_err(|_| JsonError::new(start, JsonErrorKind::InvalidNumber))
}

/// Check every backslash escape between `start` and `end`
fn validate_escapes(bytes: &[u8], start: usize, end: usize) -> Result<(), JsonError> {
    let mut i = start;
    while i < end {
        if bytes[i] == b'\\' {
            match bytes.get(i + 1) {
                Some(b'n' | b'r' | b't' | b'b' | b'f' | b'"' | b'\\' | b'/') => i += 2,
                Some(b'u') => {
                    let digits = bytes.get(i + 2..i + 6);
                    match digits {
                        Some(d) if i + 6 <= end && d.iter().all(u8::is_ascii_hexdigit) => i += 6,
                        _ => return Err(JsonError::new(i, JsonErrorKind::InvalidEscape)),
                    }
                }
                _ => return Err(JsonError::new(i, JsonErrorKind::InvalidEscape)),
            }
        } else {
            i += 1;
        }
    }
    Ok(())
}
