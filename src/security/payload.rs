//! Request size and long-text field guarding.
//!
//! # Responsibilities
//! - Reject bodies whose declared size exceeds the ceiling, before reading
//! - Truncate designated free-text fields to a character ceiling
//! - Flag truncation on the payload so downstream code and audit logs see it
//!
//! # Design Decisions
//! - Truncation, not rejection, for long fields: interactive flows keep
//!   working under oversized input
//! - Lengths are Unicode scalar values; cuts never split a character

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::config::schema::PayloadConfig;
use crate::error::PayloadError;

/// Key set to `true` on any payload that lost data.
pub const TRUNCATED_FLAG: &str = "_truncated";
/// Per-field original/truncated lengths.
pub const TRUNCATION_DETAIL: &str = "_truncation";

/// Per-request evaluation of one guarded field. Logging only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardedField {
    pub field_name: String,
    pub length: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sanitized {
    pub fields: Vec<GuardedField>,
    pub any_truncated: bool,
}

#[derive(Debug, Clone)]
pub struct RequestGuard {
    max_body_bytes: u64,
    max_field_length: usize,
}

impl RequestGuard {
    pub fn new(max_body_bytes: u64, max_field_length: usize) -> Self {
        Self {
            max_body_bytes,
            max_field_length,
        }
    }

    pub fn from_config(config: &PayloadConfig) -> Self {
        Self::new(config.max_body_bytes, config.max_field_length)
    }

    pub fn max_body_bytes(&self) -> u64 {
        self.max_body_bytes
    }

    pub fn max_field_length(&self) -> usize {
        self.max_field_length
    }

    /// Gate on the declared `Content-Length`. An undeclared length passes
    /// here; the body reader enforces the same ceiling while buffering.
    pub fn check_body_size(&self, content_length: Option<u64>) -> Result<(), PayloadError> {
        match content_length {
            Some(len) if len > self.max_body_bytes => Err(PayloadError::TooLarge {
                limit: self.max_body_bytes,
            }),
            _ => Ok(()),
        }
    }

    /// Truncate `field_names` of a JSON object body to `max_length`
    /// characters (or the guard default) and flag the payload.
    pub fn sanitize_long_fields(&self, body: &mut Value, field_names: &[String], max_length: Option<usize>) -> Sanitized {
        sanitize_long_fields(body, field_names, max_length.unwrap_or(self.max_field_length))
    }
}

/// Free-standing form of [`RequestGuard::sanitize_long_fields`].
///
/// Non-object bodies, missing fields and non-string values are left alone.
pub fn sanitize_long_fields(body: &mut Value, field_names: &[String], max_length: usize) -> Sanitized {
    let Some(object) = body.as_object_mut() else {
        return Sanitized::default();
    };

    let mut report = Sanitized::default();
    let mut details = Map::new();

    for name in field_names {
        let Some(Value::String(text)) = object.get_mut(name) else {
            continue;
        };

        let length = text.chars().count();
        let truncated = length > max_length;
        if truncated {
            if let Some((cut, _)) = text.char_indices().nth(max_length) {
                text.truncate(cut);
            }
            details.insert(
                name.clone(),
                json!({ "original_length": length, "truncated_length": max_length }),
            );
            report.any_truncated = true;
        }

        report.fields.push(GuardedField {
            field_name: name.clone(),
            length,
            truncated,
        });
    }

    if report.any_truncated {
        object.insert(TRUNCATED_FLAG.to_string(), Value::Bool(true));
        match object.get_mut(TRUNCATION_DETAIL) {
            Some(Value::Object(existing)) => existing.extend(details),
            _ => {
                object.insert(TRUNCATION_DETAIL.to_string(), Value::Object(details));
            }
        }
    }

    report
}

impl GuardedField {
    /// The audit record for a truncated field.
    pub fn truncation(&self, max_length: usize) -> Option<PayloadError> {
        self.truncated.then(|| PayloadError::FieldTruncated {
            field: self.field_name.clone(),
            original_length: self.length,
            truncated_length: max_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_body_size_gate() {
        let guard = RequestGuard::new(1024, 100);
        assert!(guard.check_body_size(Some(1024)).is_ok());
        assert!(guard.check_body_size(None).is_ok());
        assert_eq!(
            guard.check_body_size(Some(1025)).unwrap_err(),
            PayloadError::TooLarge { limit: 1024 }
        );
    }

    #[test]
    fn test_long_field_truncated_exactly_and_flagged() {
        let mut body = json!({ "prompt": "a".repeat(50), "title": "short" });
        let report = sanitize_long_fields(&mut body, &fields(&["prompt", "title"]), 20);

        assert!(report.any_truncated);
        assert_eq!(body["prompt"].as_str().unwrap().chars().count(), 20);
        assert_eq!(body["title"], "short");
        assert_eq!(body[TRUNCATED_FLAG], true);
        assert_eq!(body[TRUNCATION_DETAIL]["prompt"]["original_length"], 50);
        assert_eq!(body[TRUNCATION_DETAIL]["prompt"]["truncated_length"], 20);
        assert!(body[TRUNCATION_DETAIL].get("title").is_none());

        assert_eq!(
            report.fields,
            vec![
                GuardedField { field_name: "prompt".into(), length: 50, truncated: true },
                GuardedField { field_name: "title".into(), length: 5, truncated: false },
            ]
        );
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let mut body = json!({ "note": "héllo wörld ✓✓✓" });
        sanitize_long_fields(&mut body, &fields(&["note"]), 12);
        assert_eq!(body["note"], "héllo wörld ");
    }

    #[test]
    fn test_untouched_payload_is_not_flagged() {
        let mut body = json!({ "prompt": "fine" });
        let report = sanitize_long_fields(&mut body, &fields(&["prompt", "missing"]), 10);
        assert!(!report.any_truncated);
        assert!(body.get(TRUNCATED_FLAG).is_none());
        assert_eq!(report.fields.len(), 1);
    }

    #[test]
    fn test_non_object_and_non_string_ignored() {
        let mut array = json!(["x".repeat(100)]);
        assert_eq!(sanitize_long_fields(&mut array, &fields(&["0"]), 5), Sanitized::default());

        let mut numeric = json!({ "prompt": 123456789 });
        let report = sanitize_long_fields(&mut numeric, &fields(&["prompt"]), 2);
        assert!(!report.any_truncated);
        assert_eq!(numeric["prompt"], 123456789);
    }

    #[test]
    fn test_guard_uses_default_ceiling() {
        let guard = RequestGuard::new(1024, 8);
        let mut body = json!({ "prompt": "0123456789" });
        let report = guard.sanitize_long_fields(&mut body, &fields(&["prompt"]), None);
        assert_eq!(body["prompt"], "01234567");
        let audit = report.fields[0].truncation(8).unwrap();
        assert_eq!(
            audit,
            PayloadError::FieldTruncated { field: "prompt".into(), original_length: 10, truncated_length: 8 }
        );
    }
}
