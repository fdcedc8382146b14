//! Tool-call / tool-response tagged-string envelope: a matched parse/format
//! pair built around a single shared regex, as required by the model↔agent
//! contract.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{AfeError, Result};

/// Matches either `<function_call name="NAME">JSON</function_call>` or the
/// mirrored `<function_response name="NAME">JSON</function_response>` form.
/// The `regex` crate has no backreferences, so the two tag spellings are
/// given as two alternatives of one pattern (rather than two independent
/// statics) so both `extract_tool_calls` and `parse_response` consult the
/// same compiled regex; each alternative keeps the open and close tag in
/// lockstep by construction, so a `function_call` open can never match a
/// `function_response` close.
static ENVELOPE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)<function_call name="([A-Za-z_][A-Za-z0-9_-]*)">(.*?)</function_call>|<function_response name="([A-Za-z_][A-Za-z0-9_-]*)">(.*?)</function_response>"#,
    )
    .unwrap()
});

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
}

/// Scan `text` for zero or more non-overlapping, leftmost-first tool-call
/// directives. Malformed JSON bodies are dropped with a warning, not fatal
/// to the scan. `<function_response>` matches are ignored here; this scans
/// model output for calls, not the mirror envelope.
pub fn extract_tool_calls(text: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    for capture in ENVELOPE_REGEX.captures_iter(text) {
        let (Some(name), Some(body)) = (capture.get(1), capture.get(2)) else {
            continue;
        };
        let name = name.as_str().to_string();
        match serde_json::from_str::<Value>(body.as_str()) {
            Ok(arguments) => calls.push(ToolCall { name, arguments }),
            Err(e) => tracing::warn!("dropping malformed function_call directive for {name}: {e}"),
        }
    }
    calls
}

/// Format the mirror envelope shown back to the model: the agent's `data`
/// on success, or `{"error": ERR}` on failure.
pub fn format_response(name: &str, result: std::result::Result<&Value, &str>) -> String {
    let body = match result {
        Ok(data) => data.to_string(),
        Err(err) => serde_json::json!({ "error": err }).to_string(),
    };
    format!(r#"<function_response name="{name}">{body}</function_response>"#)
}

/// Parse a single `<function_response name="N">JSON</function_response>`
/// envelope, the mirror inverse of [`format_response`]. Used by tests (and
/// any future orchestrator feature that re-parses model context) to verify
/// the round-trip law.
pub fn parse_response(input: &str) -> Result<(String, Value)> {
    let captures = ENVELOPE_REGEX
        .captures(input)
        .ok_or_else(|| AfeError::config("not a well-formed function_response envelope"))?;
    let (Some(name), Some(body)) = (captures.get(3), captures.get(4)) else {
        return Err(AfeError::config("not a well-formed function_response envelope"));
    };
    let data: Value = serde_json::from_str(body.as_str())?;
    Ok((name.as_str().to_string(), data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_a_mutual_inverse() {
        let data = serde_json::json!({"path": ".", "entries": ["a", "b"]});
        let formatted = format_response("ls", Ok(&data));
        let (name, parsed) = parse_response(&formatted).unwrap();
        assert_eq!(name, "ls");
        assert_eq!(parsed, data);
    }

    #[test]
    fn error_round_trip() {
        let formatted = format_response("ls", Err("boom"));
        let (name, parsed) = parse_response(&formatted).unwrap();
        assert_eq!(name, "ls");
        assert_eq!(parsed, serde_json::json!({"error": "boom"}));
    }

    #[test]
    fn extracts_one_call_embedded_in_prose() {
        let text = r#"hello <function_call name="ls">{"path": "."}</function_call> bye"#;
        let calls = extract_tool_calls(text);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "ls");
        assert_eq!(calls[0].arguments, serde_json::json!({"path": "."}));
    }

    #[test]
    fn zero_directives_yields_empty_vec() {
        assert!(extract_tool_calls("just plain text").is_empty());
    }

    #[test]
    fn malformed_json_is_dropped_not_fatal() {
        let text = r#"<function_call name="ls">{not json}</function_call>"#;
        assert!(extract_tool_calls(text).is_empty());
    }

    #[test]
    fn non_overlapping_leftmost_first_extraction() {
        let text = r#"<function_call name="ls">{}</function_call><function_call name="cat">{"f":"x"}</function_call>"#;
        let calls = extract_tool_calls(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "ls");
        assert_eq!(calls[1].name, "cat");
    }

    #[test]
    fn extract_tool_calls_ignores_function_response_envelopes() {
        let text = r#"<function_response name="ls">{"ok":true}</function_response>"#;
        assert!(extract_tool_calls(text).is_empty());
    }
}
