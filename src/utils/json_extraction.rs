//! JSON extraction from free-form model output.
//!
//! Simulated agents, tool synthesizers and the judge all answer in text that
//! may wrap a JSON object in markdown fences or surround it with prose. The
//! helpers here locate that object without guessing at its meaning.
//!
//! Strategies, in order:
//! 1. A ```` ```json ```` fenced block
//! 2. Any other fenced block whose body contains an object
//! 3. The content itself when it starts with `{`
//! 4. The first balanced object anywhere in the content
//!
//! ```
//! use trajforge::utils::json_extraction::extract_json_object;
//!
//! let value = extract_json_object("Scores: {\"task_completion\": 4}").unwrap();
//! assert_eq!(value["task_completion"], 4);
//! ```

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

/// Why no JSON object could be taken from a response.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JsonExtractionError {
    #[error("JSON appears truncated: {unclosed_braces} unclosed braces. Partial: {partial_preview}...")]
    Truncated {
        partial_preview: String,
        unclosed_braces: usize,
    },

    #[error("No JSON object found in response. Content starts with: '{content_preview}'")]
    NotFound { content_preview: String },

    #[error("JSON object does not parse: {0}")]
    Invalid(String),
}

/// A markdown code fence found in model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FencedBlock {
    /// Info string after the opening fence, lowercased. `None` for bare fences.
    pub lang: Option<String>,
    /// Trimmed body of the block.
    pub body: String,
}

impl FencedBlock {
    /// True for ```` ```json ```` blocks.
    pub fn is_json(&self) -> bool {
        self.lang.as_deref() == Some("json")
    }
}

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"```([A-Za-z0-9_+-]*)[ \t]*\r?\n?([\s\S]*?)```").ok())
        .as_ref()
}

/// Returns every fenced code block in `content`, in order of appearance.
pub fn fenced_blocks(content: &str) -> Vec<FencedBlock> {
    let Some(re) = fence_regex() else {
        return Vec::new();
    };
    re.captures_iter(content)
        .filter_map(|caps| {
            let lang = caps.get(1).map(|m| m.as_str().trim().to_lowercase())?;
            let body = caps.get(2)?.as_str().trim().to_string();
            Some(FencedBlock {
                lang: if lang.is_empty() { None } else { Some(lang) },
                body,
            })
        })
        .collect()
}

/// Index of the `}` closing the object that opens at the start of `s`.
///
/// String literals and escape sequences are honoured.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Number of braces left open at the end of `s`.
fn unclosed_braces(s: &str) -> usize {
    let mut depth: isize = 0;
    let mut in_string = false;
    let mut escape_next = false;
    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => depth -= 1,
            _ => {}
        }
    }
    depth.max(0) as usize
}

/// Takes the first balanced object out of `s` and parses it.
fn object_at(s: &str) -> Option<Result<Value, JsonExtractionError>> {
    let start = s.find('{')?;
    let tail = &s[start..];
    match find_matching_brace(tail) {
        Some(end) => Some(
            serde_json::from_str::<Value>(&tail[..=end])
                .map_err(|e| JsonExtractionError::Invalid(e.to_string())),
        ),
        None => Some(Err(JsonExtractionError::Truncated {
            partial_preview: preview(tail, 100),
            unclosed_braces: unclosed_braces(tail),
        })),
    }
}

fn preview(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Extracts the first JSON object from a model response.
pub fn extract_json_object(content: &str) -> Result<Value, JsonExtractionError> {
    let trimmed = content.trim();
    let blocks = fenced_blocks(trimmed);

    if let Some(block) = blocks.iter().find(|b| b.is_json()) {
        if let Some(Ok(value)) = object_at(&block.body) {
            return Ok(value);
        }
    }
    for block in blocks.iter().filter(|b| !b.is_json()) {
        if let Some(Ok(value)) = object_at(&block.body) {
            return Ok(value);
        }
    }

    match object_at(trimmed) {
        Some(Ok(value)) => Ok(value),
        Some(Err(e)) => {
            // Prose can contain a stray brace before the real object.
            if let Some(value) = trimmed
                .char_indices()
                .filter(|&(i, c)| c == '{' && i > 0)
                .find_map(|(i, _)| match object_at(&trimmed[i..]) {
                    Some(Ok(v)) => Some(v),
                    _ => None,
                })
            {
                return Ok(value);
            }
            Err(e)
        }
        None => Err(JsonExtractionError::NotFound {
            content_preview: preview(trimmed, 50),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_object() {
        let value = extract_json_object(r#"{"key": "value"}"#).unwrap();
        assert_eq!(value["key"], "value");
    }

    #[test]
    fn test_json_code_block_wins_over_prose() {
        let input = "I will call {maybe} a tool.\n```json\n{\"name\": \"search\"}\n```\nDone.";
        let value = extract_json_object(input).unwrap();
        assert_eq!(value["name"], "search");
    }

    #[test]
    fn test_generic_code_block() {
        let input = "Result:\n```\n{\"ok\": true}\n```";
        let value = extract_json_object(input).unwrap();
        assert_eq!(value["ok"], true);
    }

    #[test]
    fn test_object_embedded_in_text() {
        let input = r#"Sure, here it is: {"name": "test", "count": 5} - that's it!"#;
        let value = extract_json_object(input).unwrap();
        assert_eq!(value["count"], 5);
    }

    #[test]
    fn test_escaped_quotes_and_braces_in_strings() {
        let input = r#"{"message": "He said \"hi\" and drew {}"}"#;
        let value = extract_json_object(input).unwrap();
        assert_eq!(value["message"], "He said \"hi\" and drew {}");
    }

    #[test]
    fn test_not_found() {
        let err = extract_json_object("no structured content here").unwrap_err();
        assert!(matches!(err, JsonExtractionError::NotFound { .. }));
    }

    #[test]
    fn test_truncated() {
        let err = extract_json_object(r#"{"scores": {"a": 4"#).unwrap_err();
        match err {
            JsonExtractionError::Truncated { unclosed_braces, .. } => {
                assert_eq!(unclosed_braces, 2)
            }
            other => panic!("expected truncation, got {other:?}"),
        }
    }

    #[test]
    fn test_fenced_blocks_report_language() {
        let blocks = fenced_blocks("```json\n{}\n```\ntext\n```\nplain\n```");
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].is_json());
        assert_eq!(blocks[1].lang, None);
        assert_eq!(blocks[1].body, "plain");
    }

    #[test]
    fn test_find_matching_brace() {
        assert_eq!(find_matching_brace("{}"), Some(1));
        assert_eq!(find_matching_brace(r#"{"a": {"b": 1}} tail"#), Some(14));
        assert_eq!(find_matching_brace("{ open"), None);
    }
}
