//! Structured Output Transformer (§4.F): turns a stream of text deltas into
//! typed `object` chunks plus one final validated `object-result`.
//!
//! Written as a tolerant incremental parser over streamed provider payloads,
//! in the style of an SSE client accumulating and interpreting partial wire
//! state — here as a small stack-based scanner per §9's guidance: "keep it
//! independent and total".

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parse outcome of [`parse_partial_json`] for one accumulated text buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParseState {
    /// The buffer is a syntactically incomplete JSON value; `value` is the
    /// deepest value that could be recovered from the complete prefix.
    PartialParse,
    /// The buffer parsed as complete, valid JSON.
    SuccessfulParse,
    /// The buffer didn't parse as-is, but closing the open structures it
    /// implies (braces/brackets/quotes) produced a valid value.
    RepairedParse,
}

/// Result of [`parse_partial_json`]: the best-effort value, or `None` when
/// not even a partial prefix could be recovered (e.g. totally empty input).
#[derive(Debug, Clone)]
pub struct PartialJsonResult {
    pub value: Option<Value>,
    pub state: ParseState,
}

/// A small stack-based incremental JSON scanner: for *any* input prefix,
/// including a string literal truncated mid-escape, it returns the last
/// complete value it could recover plus a [`ParseState`] describing how
/// confident that recovery is. Total: never panics, never returns `Err`.
pub fn parse_partial_json(input: &str) -> PartialJsonResult {
    if let Ok(value) = serde_json::from_str::<Value>(input) {
        return PartialJsonResult {
            value: Some(value),
            state: ParseState::SuccessfulParse,
        };
    }

    // Try progressively closing the input: track bracket/brace/quote depth
    // and append the matching closers, trimming a dangling comma or colon
    // first since those can never be legally closed.
    let repaired = close_partial_json(input);
    if let Some(repaired) = &repaired {
        if let Ok(value) = serde_json::from_str::<Value>(repaired) {
            return PartialJsonResult {
                value: Some(value),
                state: ParseState::RepairedParse,
            };
        }
    }

    // Fall back to the deepest valid JSON prefix achievable by trimming from
    // the end one token at a time; total-ness only requires *some* answer,
    // so an empty partial object is a safe floor.
    PartialJsonResult {
        value: deepest_valid_prefix(input),
        state: ParseState::PartialParse,
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Frame {
    Object,
    Array,
}

/// Closes every open brace/bracket/string implied by `input`'s structure,
/// trimming a trailing comma, colon, or partial token first.
fn close_partial_json(input: &str) -> Option<String> {
    let mut stack: Vec<Frame> = Vec::new();
    let mut in_string = false;
    let mut escape = false;
    let mut last_significant = 0usize;

    for (i, ch) in input.char_indices() {
        if in_string {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => stack.push(Frame::Object),
            '[' => stack.push(Frame::Array),
            '}' | ']' => {
                stack.pop();
            }
            c if !c.is_whitespace() => last_significant = i,
            _ => {}
        }
    }

    if stack.is_empty() && !in_string {
        return None;
    }

    let mut truncated = input.to_string();
    if in_string {
        // Close the open string literal, possibly dropping a trailing
        // backslash that can't be the start of a valid escape.
        if truncated.ends_with('\\') {
            truncated.pop();
        }
        truncated.push('"');
    } else {
        let trimmed = truncated.trim_end();
        if trimmed.ends_with(',') || trimmed.ends_with(':') {
            truncated = trimmed[..trimmed.len() - 1].to_string();
        }
    }
    let _ = last_significant;

    for frame in stack.iter().rev() {
        match frame {
            Frame::Object => truncated.push('}'),
            Frame::Array => truncated.push(']'),
        }
    }
    Some(truncated)
}

/// Last-resort recovery: walk the input backward, trying each prefix ending
/// at a plausible boundary (`,`, `}`, `]`) until one produces a valid value
/// after closing. Returns `None` only for input with no recoverable value at
/// all (e.g. a bare `{"a":` with the key itself still incomplete).
fn deepest_valid_prefix(input: &str) -> Option<Value> {
    let boundaries: Vec<usize> = input
        .char_indices()
        .filter(|(_, c)| matches!(c, ',' | '{' | '['))
        .map(|(i, _)| i)
        .collect();
    for &boundary in boundaries.iter().rev() {
        let prefix = &input[..=boundary];
        let prefix = if prefix.ends_with(',') {
            &prefix[..prefix.len() - 1]
        } else {
            prefix
        };
        if let Some(repaired) = close_partial_json(prefix) {
            if let Ok(value) = serde_json::from_str::<Value>(&repaired) {
                return Some(value);
            }
        }
    }
    None
}

/// Output shape requested by the caller's schema, detected from its top-level
/// JSON Schema-ish shape (§4.F "Format detection").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Object-shaped schema: parsed and emitted directly.
    Object,
    /// List-shaped schema: the adapter asks the model for `{elements: [...]}`
    /// internally for generation reliability; unwrapped before emission.
    Array,
    /// Fixed value-set schema: the adapter asks for `{result: "..."}`
    /// internally; unwrapped before emission.
    Enum { values: Vec<String> },
}

/// What error-handling mode to use when final validation fails (§4.F "Error strategy").
#[derive(Debug, Clone)]
pub enum ErrorStrategy {
    Throw,
    Warn,
    Fallback(Value),
}

/// One chunk the transformer can emit, mirroring the wire shape in §6.
#[derive(Debug, Clone, PartialEq)]
pub enum StructuredChunk {
    Object(Value),
    ObjectResult(Value),
    Error(String),
}

/// Strips a `<|message|>` tail, unwraps a fenced ```json code block if
/// present (or a still-open one), and escapes raw control characters inside
/// JSON string literals, per §4.F step 2.
fn preprocess(accumulated: &str) -> String {
    let text = match accumulated.find("<|message|>") {
        Some(idx) => &accumulated[..idx],
        None => accumulated,
    };
    let trimmed = text.trim_start();
    let unfenced = if let Some(rest) = trimmed.strip_prefix("```json") {
        match rest.find("```") {
            Some(end) => rest[..end].trim(),
            None => rest.trim_start(),
        }
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        match rest.find("```") {
            Some(end) => rest[..end].trim(),
            None => rest.trim_start(),
        }
    } else {
        trimmed
    };
    escape_raw_control_chars_in_json_strings(unfenced)
}

/// Models often stream raw newlines/tabs inside a JSON string value instead
/// of the `\n`/`\t` escape sequence, which `serde_json` rejects outright.
/// Walks the text tracking whether we're inside a string literal (respecting
/// existing `\` escapes) and rewrites unescaped `\n`, `\r`, `\t` to their
/// escape sequences so the scanner below sees legal JSON.
fn escape_raw_control_chars_in_json_strings(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut in_string = false;
    let mut escape = false;
    for ch in input.chars() {
        if in_string {
            if escape {
                result.push(ch);
                escape = false;
                continue;
            }
            match ch {
                '\\' => {
                    escape = true;
                    result.push(ch);
                }
                '"' => {
                    in_string = false;
                    result.push(ch);
                }
                '\n' => result.push_str("\\n"),
                '\r' => result.push_str("\\r"),
                '\t' => result.push_str("\\t"),
                _ => result.push(ch),
            }
            continue;
        }
        if ch == '"' {
            in_string = true;
        }
        result.push(ch);
    }
    result
}

/// Incrementally folds text deltas into typed chunks for one structured-output
/// call. One instance per LLM turn; not reusable across turns.
pub struct StructuredOutputTransformer {
    format: OutputFormat,
    error_strategy: ErrorStrategy,
    accumulated: String,
    last_emitted: Option<Value>,
}

impl StructuredOutputTransformer {
    pub fn new(format: OutputFormat, error_strategy: ErrorStrategy) -> Self {
        Self {
            format,
            error_strategy,
            accumulated: String::new(),
            last_emitted: None,
        }
    }

    /// Feeds one text delta, returning zero or one [`StructuredChunk::Object`]
    /// per §4.F step 4's routing rules (object/array/enum).
    pub fn push_delta(&mut self, delta: &str) -> Option<StructuredChunk> {
        self.accumulated.push_str(delta);
        let preprocessed = preprocess(&self.accumulated);
        let parsed = parse_partial_json(&preprocessed);

        match &self.format {
            OutputFormat::Object => self.route_object(parsed),
            OutputFormat::Array => self.route_array(parsed),
            OutputFormat::Enum { values } => {
                let values = values.clone();
                self.route_enum(parsed, &values)
            }
        }
    }

    fn emit_if_changed(&mut self, candidate: Value) -> Option<StructuredChunk> {
        if self.last_emitted.as_ref() == Some(&candidate) {
            return None;
        }
        self.last_emitted = Some(candidate.clone());
        Some(StructuredChunk::Object(candidate))
    }

    fn route_object(&mut self, parsed: PartialJsonResult) -> Option<StructuredChunk> {
        if !matches!(parsed.state, ParseState::SuccessfulParse | ParseState::RepairedParse) {
            return None;
        }
        let value = parsed.value?;
        if !value.is_object() {
            return None;
        }
        self.emit_if_changed(value)
    }

    fn route_array(&mut self, parsed: PartialJsonResult) -> Option<StructuredChunk> {
        let value = parsed.value?;
        let elements = value.get("elements").cloned().unwrap_or(Value::Array(vec![]));
        let Value::Array(mut elements) = elements else {
            return None;
        };

        if parsed.state == ParseState::PartialParse {
            if let Some(last) = elements.last() {
                if is_trivially_empty(last) {
                    elements.pop();
                }
            }
        }

        let candidate = Value::Array(elements);
        if self.last_emitted.is_none() {
            self.last_emitted = Some(Value::Array(vec![]));
            return Some(StructuredChunk::Object(Value::Array(vec![])));
        }
        self.emit_if_changed(candidate)
    }

    fn route_enum(&mut self, parsed: PartialJsonResult, values: &[String]) -> Option<StructuredChunk> {
        let value = parsed.value?;
        let partial_result = value.get("result").and_then(|v| v.as_str())?.to_string();
        if partial_result.is_empty() {
            return None;
        }

        let matches: Vec<&String> = values.iter().filter(|v| v.starts_with(&partial_result)).collect();
        let candidate = if matches.len() == 1 {
            matches[0].clone()
        } else if matches.is_empty() {
            longest_common_prefix(values, &partial_result)
        } else {
            longest_common_prefix_of(&matches)
        };
        if candidate.is_empty() {
            return None;
        }
        self.emit_if_changed(Value::String(candidate))
    }

    /// Called on `text-end`: validates the final accumulated value against
    /// `validate` and produces the terminal chunk per the error strategy.
    pub fn finish<F>(&mut self, validate: F) -> StructuredChunk
    where
        F: FnOnce(&Value) -> Result<Value, String>,
    {
        let preprocessed = preprocess(&self.accumulated);
        let parsed = parse_partial_json(&preprocessed);
        let raw = match (&self.format, parsed.value) {
            (OutputFormat::Array, Some(v)) => v.get("elements").cloned().unwrap_or(Value::Array(vec![])),
            (OutputFormat::Enum { .. }, Some(v)) => v.get("result").cloned().unwrap_or(Value::Null),
            (_, Some(v)) => v,
            (_, None) => Value::Null,
        };

        match validate(&raw) {
            Ok(validated) => StructuredChunk::ObjectResult(validated),
            Err(message) => match &self.error_strategy {
                ErrorStrategy::Throw => StructuredChunk::Error(message),
                ErrorStrategy::Warn => {
                    tracing::warn!(%message, "structured output validation failed; dropping");
                    StructuredChunk::ObjectResult(raw)
                }
                ErrorStrategy::Fallback(fallback) => StructuredChunk::ObjectResult(fallback.clone()),
            },
        }
    }
}

fn is_trivially_empty(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.is_empty(),
        Value::String(s) => s.is_empty(),
        Value::Null => true,
        _ => false,
    }
}

fn longest_common_prefix(candidates: &[String], seed: &str) -> String {
    let matches: Vec<&String> = candidates.iter().filter(|v| v.as_str().starts_with(seed) || seed.starts_with(v.as_str())).collect();
    if matches.is_empty() {
        return String::new();
    }
    longest_common_prefix_of(&matches)
}

fn longest_common_prefix_of(values: &[&String]) -> String {
    let Some(first) = values.first() else {
        return String::new();
    };
    let mut prefix = first.as_str();
    for value in &values[1..] {
        let mut end = 0;
        for (a, b) in prefix.chars().zip(value.chars()) {
            if a == b {
                end += a.len_utf8();
            } else {
                break;
            }
        }
        prefix = &prefix[..end];
    }
    prefix.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn partial_object_prefix_does_not_parse() {
        let result = parse_partial_json(r#"{"a":"#);
        assert_eq!(result.state, ParseState::PartialParse);
    }

    #[test]
    fn complete_object_parses_successfully() {
        let result = parse_partial_json(r#"{"a":1}"#);
        assert_eq!(result.state, ParseState::SuccessfulParse);
        assert_eq!(result.value, Some(json!({"a": 1})));
    }

    #[test]
    fn truncated_string_value_repairs() {
        let result = parse_partial_json(r#"{"a":"hel"#);
        assert_eq!(result.state, ParseState::RepairedParse);
        assert_eq!(result.value, Some(json!({"a": "hel"})));
    }

    #[test]
    fn object_transformer_emits_one_chunk_per_change() {
        let mut transformer = StructuredOutputTransformer::new(OutputFormat::Object, ErrorStrategy::Throw);
        assert!(transformer.push_delta(r#"{"a":"#).is_none());
        let chunk = transformer.push_delta(r#"1}"#).unwrap();
        assert_eq!(chunk, StructuredChunk::Object(json!({"a": 1})));
    }

    #[test]
    fn array_transformer_emits_growing_arrays_seed_scenario_c() {
        let mut transformer = StructuredOutputTransformer::new(OutputFormat::Array, ErrorStrategy::Throw);
        let first = transformer.push_delta(r#"{"elements":["#).unwrap();
        assert_eq!(first, StructuredChunk::Object(json!([])));
        let second = transformer.push_delta(r#"{"name":"A"}"#).unwrap();
        assert_eq!(second, StructuredChunk::Object(json!([{"name": "A"}])));
        let third = transformer.push_delta(r#",{"name":"B"}"#).unwrap();
        assert_eq!(third, StructuredChunk::Object(json!([{"name": "A"}, {"name": "B"}])));
        let fourth = transformer.push_delta("]}");
        assert!(fourth.is_none() || fourth == Some(StructuredChunk::Object(json!([{"name": "A"}, {"name": "B"}]))));

        let result = transformer.finish(|v| Ok(v.clone()));
        assert_eq!(result, StructuredChunk::ObjectResult(json!([{"name": "A"}, {"name": "B"}])));
    }

    #[test]
    fn enum_transformer_matches_unique_prefix() {
        let mut transformer = StructuredOutputTransformer::new(
            OutputFormat::Enum { values: vec!["yes".to_string(), "no".to_string()] },
            ErrorStrategy::Throw,
        );
        let chunk = transformer.push_delta(r#"{"result":"y"#).unwrap();
        assert_eq!(chunk, StructuredChunk::Object(json!("yes")));
    }

    #[test]
    fn enum_transformer_emits_longest_common_prefix_when_ambiguous() {
        let mut transformer = StructuredOutputTransformer::new(
            OutputFormat::Enum {
                values: vec!["maybe-yes".to_string(), "maybe-no".to_string()],
            },
            ErrorStrategy::Throw,
        );
        let chunk = transformer.push_delta(r#"{"result":"may"#).unwrap();
        assert_eq!(chunk, StructuredChunk::Object(json!("maybe-")));
    }

    #[test]
    fn finish_validates_and_emits_error_under_throw_strategy() {
        let mut transformer = StructuredOutputTransformer::new(OutputFormat::Object, ErrorStrategy::Throw);
        transformer.push_delta(r#"{"a":1}"#);
        let result = transformer.finish(|_| Err("schema mismatch".to_string()));
        assert_eq!(result, StructuredChunk::Error("schema mismatch".to_string()));
    }

    #[test]
    fn finish_falls_back_under_fallback_strategy() {
        let mut transformer = StructuredOutputTransformer::new(OutputFormat::Object, ErrorStrategy::Fallback(json!({"ok": false})));
        transformer.push_delta(r#"{"a":1}"#);
        let result = transformer.finish(|_| Err("bad".to_string()));
        assert_eq!(result, StructuredChunk::ObjectResult(json!({"ok": false})));
    }

    #[test]
    fn preprocess_unwraps_fenced_json_block() {
        assert_eq!(preprocess("```json\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn preprocess_strips_message_tail() {
        assert_eq!(preprocess("{\"a\":1}<|message|>ignored"), "{\"a\":1}");
    }

    #[test]
    fn preprocess_escapes_raw_control_chars_inside_string_literals() {
        let raw = "{\"a\":\"line one\nline two\ttabbed\r\"}";
        let result = preprocess(raw);
        assert_eq!(result, "{\"a\":\"line one\\nline two\\ttabbed\\r\"}");
        let parsed: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(parsed, json!({"a": "line one\nline two\ttabbed\r"}));
    }

    #[test]
    fn preprocess_leaves_control_chars_outside_strings_untouched() {
        let raw = "{\n  \"a\": 1\n}";
        assert_eq!(preprocess(raw), raw);
    }

    #[test]
    fn transformer_handles_raw_newline_inside_streamed_string_value() {
        let mut transformer = StructuredOutputTransformer::new(OutputFormat::Object, ErrorStrategy::Throw);
        let chunk = transformer.push_delta("{\"note\":\"first\nsecond\"}").unwrap();
        assert_eq!(chunk, StructuredChunk::Object(json!({"note": "first\nsecond"})));
    }
}
