// src/agentverse/parser.rs

use serde_json::Value;

/// Extracts a JSON value from free-form model output, tolerant of
/// code-fenced wrappers and trailing prose. Never panics or propagates an
/// error: on any failure to decode, returns `default` (P3).
pub fn parse_structured(text: &str, default: Value) -> Value {
    let trimmed = strip_code_fence(text.trim());

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return value;
    }

    if let Some(braced) = extract_braced_substring(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(braced) {
            return value;
        }
    }

    default
}

fn strip_code_fence(text: &str) -> &str {
    let mut s = text;
    if let Some(rest) = s.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        let rest = rest.strip_prefix('\n').unwrap_or(rest);
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

fn extract_braced_substring(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}
