//! Recovery of JSON bodies from free-form model replies.

use anyhow::{Context, Result};
use regex::{Captures, Regex};
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::sync::LazyLock;

/// A string literal or a `//` line comment; literals are matched first so
/// `//` inside them (URLs, paths) survives.
static LITERAL_OR_COMMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:[^"\\]|\\.)*"|//[^\n]*"#).expect("valid comment regex")
});

/// The outermost JSON-looking slice of `text`: from the first `{`/`[` to
/// the last `}`/`]`. Markdown fences and chatter around it are dropped.
pub fn extract_json_body(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let end = text.rfind(['}', ']'])?;
    if start > end {
        return None;
    }
    Some(&text[start..=end])
}

/// Parse a model reply as `T`, tolerating fences and `//` comments.
pub fn parse_llm_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    let body = extract_json_body(text).context("No JSON body in model reply")?;
    let cleaned = strip_line_comments(body);
    serde_json::from_str(&cleaned).context("Failed to parse JSON in model reply")
}

fn strip_line_comments(body: &str) -> Cow<'_, str> {
    LITERAL_OR_COMMENT.replace_all(body, |caps: &Captures| {
        let found = &caps[0];
        if found.starts_with('"') { found.to_string() } else { String::new() }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_fenced_array() {
        let reply = "Sure!\n```json\n[1, 2, 3]\n```";
        let scores: Vec<i64> = parse_llm_json(reply).unwrap();
        assert_eq!(scores, vec![1, 2, 3]);
    }

    #[test]
    fn test_comments_are_stripped() {
        let reply = "{\n  \"Alice\": [\"age\"], // needed\n  \"Bob\": []\n}";
        let parsed: HashMap<String, Vec<String>> = parse_llm_json(reply).unwrap();
        assert_eq!(parsed["Alice"], vec!["age"]);
        assert!(parsed["Bob"].is_empty());
    }

    #[test]
    fn test_urls_in_strings_survive() {
        let reply = r#"[{"name":"Acme","type":"ORGANIZATION","description":"Company at https://acme.com"}]"#;
        let parsed: Vec<HashMap<String, String>> = parse_llm_json(reply).unwrap();
        assert_eq!(parsed[0]["description"], "Company at https://acme.com");

        let reply = "{\n  \"path\": \"a \\\"quoted\\\" //x\", // drop me\n  \"n\": \"1\"\n}";
        let parsed: HashMap<String, String> = parse_llm_json(reply).unwrap();
        assert_eq!(parsed["path"], "a \"quoted\" //x");
        assert_eq!(parsed["n"], "1");
    }

    #[test]
    fn test_no_body() {
        assert!(extract_json_body("no json here").is_none());
        assert!(extract_json_body("] backwards [").is_none());
        assert!(parse_llm_json::<Vec<i64>>("NO").is_err());
    }

    #[test]
    fn test_wrong_shape_is_error() {
        assert!(parse_llm_json::<Vec<i64>>(r#"{"a": 1}"#).is_err());
    }
}
