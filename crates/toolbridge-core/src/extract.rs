//! Manual Tool-Call Extraction
//!
//! Backends without native function calling are told to answer with
//! `{"tool_name": ..., "tool_args": {...}}`, but in practice they wrap calls in
//! whatever markup their chat template produces. This module recovers
//! [`ToolCall`]s from that text.
//!
//! Recognised forms, all scanned over the whole text:
//!
//! ```text
//! 1. {"tool_name": "add", "tool_args": {"a": 2, "b": 3}}
//! 2. to=getWeather tool_input {"city": "Jakarta"}
//!    assistant<|channel|>analysis to=functions.lookup code<|message|>{"q": "x"}
//! 3. to=convert<<json
//!    {"km": 5}
//! 4. to= list_categories code<|message|>{"limit": 5}
//! 5. {"name": "ping", "arguments": {"host": "1.1.1.1"}}
//! ```
//!
//! Forms 2-4 may carry nested arguments, so the object is bounded by counting
//! braces rather than by the regex. Forms 4 and 5 are skipped when a call with
//! the same name was already collected. That dedup is by name only, so two
//! genuinely different calls to one tool in those forms collapse into the
//! first; this is a known limitation.

use regex::Regex;
use serde_json::{Number, Value};
use std::sync::LazyLock;

use crate::tool::{Arguments, ToolCall};

static CANONICAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{\s*"tool_name"\s*:\s*"([^"]+)"\s*,\s*"tool_args"\s*:\s*(\{[^{}]*\})\s*\}"#)
        .expect("canonical pattern is valid")
});

static MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"to=(?:(?:functions|tool)\.)?(\w+)[^{]*\{").expect("marker pattern is valid")
});

static MARKER_JSON_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"to=(?:(?:functions|tool)\.)?(\w+)<<json\s*\{").expect("json tag pattern is valid")
});

static MARKER_SPACED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"to=\s+(?:(?:functions|tool)\.)?(\w+)[^{]*\{").expect("spaced marker pattern is valid")
});

static INLINE_FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\{\s*["']name["']\s*:\s*["'](\w+)["']\s*,\s*["']arguments["']\s*:\s*(\{[^}]*\})\s*\}"#,
    )
    .expect("inline function pattern is valid")
});

static ANALYSIS_PREAMBLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)^.*?<\|end\|>").expect("preamble pattern is valid"));

static FINAL_CHANNEL_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<\|start\|>assistant<\|channel\|>[^>]*>").expect("channel pattern is valid")
});

const CONTROL_TOKENS: &[&str] = &[
    "<|start|>",
    "<|end|>",
    "<|im_start|>",
    "<|im_end|>",
    "<|im_reply|>",
    "<|channel|>",
    "<|message|>",
    "<|call|>",
    "<|return|>",
];

/// Calls collected during one parse, with ids synthesized on insertion
struct Collector {
    stamp: i64,
    calls: Vec<ToolCall>,
}

impl Collector {
    fn new() -> Self {
        Self {
            stamp: chrono::Utc::now().timestamp_millis(),
            calls: Vec::new(),
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.calls.iter().any(|c| c.name == name)
    }

    fn push(&mut self, name: &str, arguments: Arguments) {
        let id = format!("call_{}_{}_{}", self.stamp, self.calls.len(), name);
        tracing::debug!(tool = %name, %id, "Extracted manual tool call");
        self.calls.push(ToolCall::new(id, name, arguments));
    }
}

/// Recover tool calls from the free text of one assistant turn.
///
/// Never fails: fragments that match a pattern but hold malformed JSON are
/// dropped individually.
pub fn extract_tool_calls(text: &str) -> Vec<ToolCall> {
    let mut found = Collector::new();

    for caps in CANONICAL.captures_iter(text) {
        if let Some(mut args) = parse_arguments(&caps[1], &caps[2]) {
            coerce_numeric_strings(&mut args);
            found.push(&caps[1], args);
        }
    }

    for caps in MARKER.captures_iter(text) {
        let (Some(name), Some(whole)) = (caps.get(1), caps.get(0)) else {
            continue;
        };
        // `<<json` markers belong to the tagged form below
        if text[name.end()..].starts_with("<<") {
            continue;
        }
        if let Some(args) = marker_arguments(text, name.as_str(), whole.end() - 1) {
            found.push(name.as_str(), args);
        }
    }

    for caps in MARKER_JSON_TAG.captures_iter(text) {
        let (Some(name), Some(whole)) = (caps.get(1), caps.get(0)) else {
            continue;
        };
        if let Some(args) = marker_arguments(text, name.as_str(), whole.end() - 1) {
            found.push(name.as_str(), args);
        }
    }

    for caps in MARKER_SPACED.captures_iter(text) {
        let (Some(name), Some(whole)) = (caps.get(1), caps.get(0)) else {
            continue;
        };
        if found.contains(name.as_str()) {
            continue;
        }
        if let Some(args) = marker_arguments(text, name.as_str(), whole.end() - 1) {
            found.push(name.as_str(), args);
        }
    }

    for caps in INLINE_FUNCTION.captures_iter(text) {
        if found.contains(&caps[1]) {
            continue;
        }
        if let Some(args) = parse_arguments(&caps[1], &caps[2]) {
            found.push(&caps[1], args);
        }
    }

    found.calls
}

/// Strip chat-template control tokens from a final manual-mode answer
pub fn clean_response(text: &str) -> String {
    let cleaned = ANALYSIS_PREAMBLE.replace(text, "");
    let mut cleaned = FINAL_CHANNEL_PREFIX.replace_all(&cleaned, "").into_owned();
    for token in CONTROL_TOKENS {
        cleaned = cleaned.replace(token, "");
    }
    cleaned.trim().to_string()
}

fn marker_arguments(text: &str, name: &str, open: usize) -> Option<Arguments> {
    let Some(fragment) = balanced_object(text, open) else {
        tracing::warn!(tool = %name, "Unbalanced arguments after tool marker, skipping");
        return None;
    };
    parse_arguments(name, fragment)
}

/// Slice of `text` from the `{` at `open` to its matching `}`.
///
/// Braces inside JSON strings are ignored.
fn balanced_object(text: &str, open: usize) -> Option<&str> {
    let bytes = text.as_bytes();
    if bytes.get(open) != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &byte) in bytes.iter().enumerate().skip(open) {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[open..=i]);
                }
            }
            _ => {}
        }
    }

    None
}

fn parse_arguments(name: &str, fragment: &str) -> Option<Arguments> {
    match serde_json::from_str::<Value>(fragment) {
        Ok(Value::Object(args)) => Some(args),
        Ok(other) => {
            tracing::warn!(tool = %name, "Tool arguments are not an object: {}", other);
            None
        }
        Err(e) => {
            tracing::warn!(tool = %name, fragment, "Failed to parse tool arguments: {}", e);
            None
        }
    }
}

/// Some models send `"5"` where the tool expects `5`
fn coerce_numeric_strings(args: &mut Arguments) {
    for value in args.values_mut() {
        let Value::String(text) = value else {
            continue;
        };
        let trimmed = text.trim();
        let number = trimmed
            .parse::<i64>()
            .map(Number::from)
            .ok()
            .or_else(|| trimmed.parse::<f64>().ok().and_then(Number::from_f64));
        if let Some(number) = number {
            *value = Value::Number(number);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_canonical_form() {
        let calls = extract_tool_calls(r#"{"tool_name": "add", "tool_args": {"a": 2, "b": 3}}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "add");
        assert_eq!(calls[0].arguments, args(json!({"a": 2, "b": 3})));
    }

    #[test]
    fn test_canonical_form_coerces_numbers() {
        let calls = extract_tool_calls(
            r#"Sure. {"tool_name":"add","tool_args":{"a":"2","b":" 3.5 ","unit":"km","x":"NaN"}}"#,
        );
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["a"], json!(2));
        assert_eq!(calls[0].arguments["b"], json!(3.5));
        assert_eq!(calls[0].arguments["unit"], json!("km"));
        assert_eq!(calls[0].arguments["x"], json!("NaN"));
    }

    #[test]
    fn test_marker_with_tool_input() {
        let calls = extract_tool_calls(r#"to=getWeather tool_input {"city":"Jakarta"}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "getWeather");
        assert_eq!(calls[0].arguments, args(json!({"city": "Jakarta"})));
    }

    #[test]
    fn test_marker_with_channel_tokens_and_nested_args() {
        let text = r#"assistant<|channel|>analysis to=functions.search code<|message|>{"filter":{"status":"active","tags":["a}"]}}"#;
        let calls = extract_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "search");
        assert_eq!(
            calls[0].arguments,
            args(json!({"filter": {"status": "active", "tags": ["a}"]}}))
        );
    }

    #[test]
    fn test_marker_with_angle_bracket() {
        let calls = extract_tool_calls(r#"to=search_products_by_name>{"name":"tablet"}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "search_products_by_name");
    }

    #[test]
    fn test_json_tag_form() {
        let calls = extract_tool_calls("to=convert<<json\n{\"km\": 5}");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "convert");
        assert_eq!(calls[0].arguments, args(json!({"km": 5})));
    }

    #[test]
    fn test_spaced_marker() {
        let calls = extract_tool_calls(r#"to= list_categories code<|message|>{"limit": 5}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "list_categories");
        assert_eq!(calls[0].arguments, args(json!({"limit": 5})));
    }

    #[test]
    fn test_inline_function_form() {
        let calls = extract_tool_calls(r#"{'name': 'ping', 'arguments': {"host": "1.1.1.1"}}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "ping");
        assert_eq!(calls[0].arguments, args(json!({"host": "1.1.1.1"})));
    }

    #[test]
    fn test_unbalanced_braces_emit_nothing() {
        let calls = extract_tool_calls(r#"to=add {"a": {"b": 1}"#);
        assert!(calls.is_empty());
    }

    #[test]
    fn test_malformed_json_drops_only_that_candidate() {
        let text = "to=broken {a: 1}\nto=convert<<json\n{\"km\": 5}";
        let calls = extract_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "convert");
    }

    #[test]
    fn test_dedup_between_marker_and_inline_forms() {
        let text = "to=ping {\"host\": \"1.1.1.1\"}\n{\"name\": \"ping\", \"arguments\": {\"host\": \"1.1.1.1\"}}";
        let calls = extract_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "ping");
    }

    #[test]
    fn test_dedup_spaced_marker_against_earlier_forms() {
        let text = "to=ping {\"host\": \"a\"}\nto= ping {\"host\": \"b\"}";
        let calls = extract_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["host"], json!("a"));
    }

    #[test]
    fn test_multiple_calls_get_distinct_ids() {
        let text = r#"{"tool_name": "add", "tool_args": {"a": 1, "b": 2}}
{"tool_name": "add", "tool_args": {"a": 3, "b": 4}}
to=getWeather tool_input {"city": "Bandung"}"#;
        let calls = extract_tool_calls(text);
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].arguments["a"], json!(1));
        assert_eq!(calls[1].arguments["a"], json!(3));
        assert_eq!(calls[2].name, "getWeather");
        assert_ne!(calls[0].id, calls[1].id);
        assert!(calls.iter().all(|c| c.id.starts_with("call_") && c.id.ends_with(&c.name)));
    }

    #[test]
    fn test_plain_text_yields_nothing() {
        for text in ["", "The answer is 5.", "{not json}", "to=", "to= ", "{\"tool_name\": 3}"] {
            assert!(extract_tool_calls(text).is_empty(), "unexpected call in {text:?}");
        }
    }

    #[test]
    fn test_balanced_object() {
        let text = r#"x {"a": {"b": "}"}} tail"#;
        assert_eq!(balanced_object(text, 2), Some(r#"{"a": {"b": "}"}}"#));
        assert_eq!(balanced_object(text, 0), None);
        assert_eq!(balanced_object("{\"a\": 1", 0), None);
    }

    #[test]
    fn test_clean_response() {
        let raw = "thinking about it<|end|><|start|>assistant<|channel|>final<|message|>It is 30°C in Jakarta.<|return|>";
        assert_eq!(clean_response(raw), "It is 30°C in Jakarta.");
        assert_eq!(clean_response("<|im_start|>Hello<|im_end|>"), "Hello");
        assert_eq!(clean_response("  plain answer "), "plain answer");
    }
}
