//! PII admission guard
//!
//! Recursively scans structured input for email addresses and phone numbers.
//! This is an admission check, not a redactor: a match means the caller's
//! write is refused. False positives are accepted.
//!
//! The guard never blocks on its own failure. If a pattern fails to compile,
//! or traversal exceeds [`MAX_SCAN_DEPTH`], the scan reports nothing found and
//! logs a warning. Matched samples are never logged.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Characters of the matched string kept in a [`PiiScan`] sample
pub const SAMPLE_MAX_CHARS: usize = 120;

/// Nesting depth at which traversal stops
pub const MAX_SCAN_DEPTH: usize = 64;

const EMAIL_PATTERN: &str = r"(?i)\b[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}\b";

const PHONE_PATTERN: &str =
    r"(\+?\d{1,3}[\s-]?)?(\(?\d{2,3}\)?[\s-]?)?\d{3}[\s-]?\d{2}[\s-]?\d{2}|\b\d{10}\b";

static EMAIL: LazyLock<Option<Regex>> = LazyLock::new(|| compile("email", EMAIL_PATTERN));
static PHONE: LazyLock<Option<Regex>> = LazyLock::new(|| compile("phone", PHONE_PATTERN));

fn compile(name: &'static str, pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            warn!(pattern = name, error = %e, "PII pattern failed to compile, guard disabled for it");
            None
        }
    }
}

/// Result of scanning a value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiScan {
    pub found: bool,
    /// First characters of the offending string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<String>,
}

impl PiiScan {
    pub fn clean() -> Self {
        Self::default()
    }

    fn hit(text: &str) -> Self {
        Self {
            found: true,
            sample: Some(text.chars().take(SAMPLE_MAX_CHARS).collect()),
        }
    }
}

/// Fast path for a single known-sensitive field.
///
/// Matches if the text contains something shaped like an email address or a
/// phone number. Empty and whitespace-only text never matches.
pub fn pii_suspected(text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() {
        return false;
    }
    let email = EMAIL.as_ref().is_some_and(|re| re.is_match(text));
    email || PHONE.as_ref().is_some_and(|re| re.is_match(text))
}

/// Depth-first scan of every string in a JSON tree.
///
/// Arrays are visited in index order, object members in key order. Returns on
/// the first match. Numbers, booleans and nulls never match.
pub fn scan(value: &Value) -> PiiScan {
    walk(value, 0)
}

fn walk(value: &Value, depth: usize) -> PiiScan {
    if depth > MAX_SCAN_DEPTH {
        warn!(max_depth = MAX_SCAN_DEPTH, "PII scan depth exceeded, subtree skipped");
        return PiiScan::clean();
    }

    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => PiiScan::clean(),
        Value::String(s) => {
            let s = s.trim();
            if pii_suspected(s) {
                PiiScan::hit(s)
            } else {
                PiiScan::clean()
            }
        }
        Value::Array(items) => items
            .iter()
            .map(|item| walk(item, depth + 1))
            .find(|r| r.found)
            .unwrap_or_default(),
        Value::Object(members) => members
            .values()
            .map(|member| walk(member, depth + 1))
            .find(|r| r.found)
            .unwrap_or_default(),
    }
}

/// Nesting depth of a JSON value; scalars have depth 0
pub fn json_depth(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        Value::Object(members) => 1 + members.values().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detects_email() {
        assert!(pii_suspected("write me at maria.lopez@example.com please"));
        assert!(pii_suspected("UPPER@EXAMPLE.ORG"));
    }

    #[test]
    fn test_detects_phone_formats() {
        assert!(pii_suspected("call 5512345678"));
        assert!(pii_suspected("+52 55 123 45 67"));
        assert!(pii_suspected("(55) 123-45-67"));
        assert!(pii_suspected("555-12-34"));
    }

    #[test]
    fn test_clean_text() {
        assert!(!pii_suspected("The permit office was closed on Tuesday"));
        assert!(!pii_suspected("room 12, floor 3"));
        assert!(!pii_suspected(""));
        assert!(!pii_suspected("    "));
    }

    #[test]
    fn test_scan_nested_payload() {
        let payload = json!({
            "summary": "hearing moved",
            "attendees": [
                {"role": "clerk"},
                {"role": "citizen", "contact": ["n/a", "foo@bar.mx"]}
            ]
        });
        let result = scan(&payload);
        assert!(result.found);
        assert_eq!(result.sample.as_deref(), Some("foo@bar.mx"));
    }

    #[test]
    fn test_scan_ignores_non_strings() {
        let payload = json!({"count": 5512345678u64, "ok": true, "none": null});
        assert_eq!(scan(&payload), PiiScan::clean());
    }

    #[test]
    fn test_scan_sample_is_trimmed_and_truncated_by_chars() {
        let long = format!("   ñ{} 5512345678   ", "á".repeat(200));
        let result = scan(&json!([long]));
        let sample = result.sample.unwrap();
        assert_eq!(sample.chars().count(), SAMPLE_MAX_CHARS);
        assert!(sample.starts_with('ñ'));
    }

    #[test]
    fn test_scan_first_match_in_key_order() {
        let payload = json!({"b": "b@example.com", "a": "a@example.com"});
        assert_eq!(scan(&payload).sample.as_deref(), Some("a@example.com"));
    }

    #[test]
    fn test_scan_depth_guard_fails_open() {
        let mut value = json!("hidden@example.com");
        for _ in 0..(MAX_SCAN_DEPTH + 5) {
            value = json!([value]);
        }
        assert!(!scan(&value).found);
    }

    #[test]
    fn test_json_depth() {
        assert_eq!(json_depth(&json!(1)), 0);
        assert_eq!(json_depth(&json!({})), 1);
        assert_eq!(json_depth(&json!({"a": [1, {"b": []}]})), 4);
    }
}
