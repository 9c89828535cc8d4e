//! Best-effort recovery of JSON documents embedded in model output.
//!
//! Models routinely wrap JSON in code fences, surround it with prose, put raw
//! newlines inside string literals, and leave trailing commas. Recovery runs
//! in a fixed order:
//!
//! 1. strip a surrounding code fence
//! 2. cut from the first `{` or `[` to the last matching closer
//! 3. escape raw control characters inside string literals
//! 4. drop trailing commas before `}` or `]`
//! 5. parse strictly with `serde_json`
//!
//! Already-valid JSON passes through every step unchanged.

use serde_json::Value;
use thiserror::Error;

/// Model output that could not be turned into JSON.
#[derive(Debug, Clone, Error)]
#[error("Malformed model response: {reason}")]
pub struct MalformedResponse {
    pub reason: String,
    /// The untouched model text, for diagnostics.
    pub raw: String,
}

impl MalformedResponse {
    pub fn new(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            raw: raw.into(),
        }
    }
}

/// Recover one JSON object or array from `raw`.
pub fn recover_json(raw: &str) -> Result<Value, MalformedResponse> {
    let unfenced = strip_code_fence(raw);
    let candidate = extract_candidate(unfenced)
        .ok_or_else(|| MalformedResponse::new("no JSON object or array found", raw))?;
    let escaped = escape_string_controls(candidate);
    let cleaned = remove_trailing_commas(&escaped);

    serde_json::from_str(&cleaned).map_err(|e| MalformedResponse::new(e.to_string(), raw))
}

/// Recover and deserialize into `T`.
pub fn recover_as<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, MalformedResponse> {
    let value = recover_json(raw)?;
    serde_json::from_value(value).map_err(|e| MalformedResponse::new(e.to_string(), raw))
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the info string (`json`, `JSON`, ...) on the opening line.
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// The slice from the first opener to the last occurrence of its closer.
fn extract_candidate(text: &str) -> Option<&str> {
    let start = match (text.find('{'), text.find('[')) {
        (Some(brace), Some(bracket)) => brace.min(bracket),
        (Some(brace), None) => brace,
        (None, Some(bracket)) => bracket,
        (None, None) => return None,
    };
    let closer = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(closer)?;
    (end > start).then(|| &text[start..=end])
}

fn escape_string_controls(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for ch in text.chars() {
        if !in_string {
            if ch == '"' {
                in_string = true;
            }
            out.push(ch);
            continue;
        }

        if escaped {
            escaped = false;
            out.push(ch);
            continue;
        }

        match ch {
            '\\' => {
                escaped = true;
                out.push(ch);
            }
            '"' => {
                in_string = false;
                out.push(ch);
            }
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => {}
            _ => out.push(ch),
        }
    }

    out
}

fn remove_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &ch) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            out.push(ch);
            continue;
        }

        if ch == '"' {
            in_string = true;
        } else if ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_trailing_comma_in_object() {
        let value = recover_json(r#"{"health": {"current": 10,}}"#).unwrap();
        assert_eq!(value, json!({"health": {"current": 10}}));
    }

    #[test]
    fn test_trailing_comma_in_array() {
        let value = recover_json("[1, 2, 3,\n]").unwrap();
        assert_eq!(value, json!([1, 2, 3]));
    }

    #[test]
    fn test_comma_inside_string_kept() {
        let value = recover_json(r#"{"note": "a, }", "n": 1,}"#).unwrap();
        assert_eq!(value, json!({"note": "a, }", "n": 1}));
    }

    #[test]
    fn test_code_fence_stripped() {
        let raw = "```json\n{\"level\": 3}\n```";
        assert_eq!(recover_json(raw).unwrap(), json!({"level": 3}));
    }

    #[test]
    fn test_surrounding_prose_ignored() {
        let raw = "Here is the sheet you asked for: {\"level\": 1} Enjoy!";
        assert_eq!(recover_json(raw).unwrap(), json!({"level": 1}));
    }

    #[test]
    fn test_raw_newline_in_string_escaped() {
        let raw = "{\"description\": \"line one\nline two\r\n\tindented\"}";
        let value = recover_json(raw).unwrap();
        assert_eq!(value["description"], "line one\nline two\n\tindented");
    }

    #[test]
    fn test_existing_escapes_untouched() {
        let raw = r#"{"quote": "she said \"run\"\n", "path": "a\\b"}"#;
        let value = recover_json(raw).unwrap();
        assert_eq!(value["quote"], "she said \"run\"\n");
        assert_eq!(value["path"], "a\\b");
    }

    #[test]
    fn test_array_before_object_wins() {
        let value = recover_json(r#"[{"a": 1}, {"b": 2}]"#).unwrap();
        assert!(value.is_array());
        assert_eq!(value.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_no_json_fails_with_raw_text() {
        let err = recover_json("The goblin shrugs.").unwrap_err();
        assert_eq!(err.raw, "The goblin shrugs.");
    }

    #[test]
    fn test_unparsable_fails() {
        let err = recover_json(r#"{"a": }"#).unwrap_err();
        assert_eq!(err.raw, r#"{"a": }"#);
    }

    #[test]
    fn test_recover_as_typed() {
        #[derive(serde::Deserialize)]
        struct Level {
            level: u32,
        }
        let level: Level = recover_as("```\n{\"level\": 4,}\n```").unwrap();
        assert_eq!(level.level, 4);
    }
}
