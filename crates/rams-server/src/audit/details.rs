//! Structured `details` document of an audit record
//!
//! Details are schemaless JSON objects, but every record's document is checked
//! when the record is built:
//!
//! | Action | Required keys |
//! |---|---|
//! | `CREATE`, `UPDATE`, `DELETE` | `method`, `path`, `status` |
//! | `AUTH_LOGIN_SUCCESS`, `AUTH_LOGIN_FAILED` | `identifier` |
//! | `ACCESS_DENIED` | `operation` |
//! | `SERVER_ERROR` | `message` |
//!
//! Documents may nest at most [`MAX_DETAILS_DEPTH`] levels and serialize to at
//! most [`MAX_DETAILS_BYTES`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use super::error::AuditError;
use super::models::AuditAction;

/// Maximum nesting depth of a details document
pub const MAX_DETAILS_DEPTH: usize = 8;

/// Maximum serialized size of a details document
pub const MAX_DETAILS_BYTES: usize = 64 * 1024;

/// Placeholder written in place of redacted values
pub const REDACTED: &str = "[REDACTED]";

/// Words that mark a key as sensitive wherever they appear in it
const SENSITIVE_KEY_WORDS: &[&str] = &[
    "password",
    "passwd",
    "passphrase",
    "secret",
    "token",
    "authorization",
    "apikey",
    "ssn",
];

/// Adjacent word pairs that mark a key as sensitive
const SENSITIVE_KEY_PAIRS: &[(&str, &str)] = &[("api", "key"), ("private", "key")];

/// JSON object attached to an audit record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuditDetails(Map<String, JsonValue>);

impl AuditDetails {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wrap an arbitrary JSON value; only objects are accepted
    pub fn from_value(value: JsonValue) -> Result<Self, AuditError> {
        match value {
            JsonValue::Object(map) => Ok(Self(map)),
            JsonValue::Null => Ok(Self::new()),
            other => Err(AuditError::Validation(format!(
                "details must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<JsonValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, JsonValue> {
        &self.0
    }

    pub fn into_value(self) -> JsonValue {
        JsonValue::Object(self.0)
    }

    /// Validate the document for the given action
    pub fn validate_for(&self, action: &AuditAction) -> Result<(), AuditError> {
        for key in action.required_detail_keys() {
            match self.0.get(*key) {
                None | Some(JsonValue::Null) => {
                    return Err(AuditError::Validation(format!(
                        "details for {} must contain '{}'",
                        action, key
                    )));
                },
                Some(_) => {},
            }
        }

        let depth = object_depth(&self.0);
        if depth > MAX_DETAILS_DEPTH {
            return Err(AuditError::Validation(format!(
                "details nest {} levels deep (max {})",
                depth, MAX_DETAILS_DEPTH
            )));
        }

        let size = serde_json::to_vec(&self.0)?.len();
        if size > MAX_DETAILS_BYTES {
            return Err(AuditError::Validation(format!(
                "details are {} bytes (max {})",
                size, MAX_DETAILS_BYTES
            )));
        }

        Ok(())
    }
}

/// Replace the values of sensitive keys anywhere in `value`
pub fn redact_sensitive(value: &mut JsonValue) {
    match value {
        JsonValue::Object(map) => {
            for (key, child) in map.iter_mut() {
                if is_sensitive_key(key) {
                    *child = JsonValue::String(REDACTED.to_string());
                } else {
                    redact_sensitive(child);
                }
            }
        },
        JsonValue::Array(items) => items.iter_mut().for_each(redact_sensitive),
        _ => {},
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let words = key_words(key);
    words.iter().any(|w| SENSITIVE_KEY_WORDS.contains(&w.as_str()))
        || words.windows(2).any(|pair| {
            SENSITIVE_KEY_PAIRS
                .iter()
                .any(|(first, second)| pair[0] == *first && pair[1] == *second)
        })
}

/// Lowercase words of a snake, kebab, dotted or camelCase key
fn key_words(key: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut after_lower = false;
    for ch in key.chars() {
        if !ch.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            after_lower = false;
            continue;
        }
        if ch.is_uppercase() && after_lower {
            words.push(std::mem::take(&mut current));
        }
        after_lower = ch.is_lowercase() || ch.is_ascii_digit();
        current.extend(ch.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

fn object_depth(map: &Map<String, JsonValue>) -> usize {
    1 + map.values().map(value_depth).max().unwrap_or(0)
}

fn value_depth(value: &JsonValue) -> usize {
    match value {
        JsonValue::Object(map) => object_depth(map),
        JsonValue::Array(items) => 1 + items.iter().map(value_depth).max().unwrap_or(0),
        _ => 0,
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
