//! Redaction of sensitive fields.
//!
//! The [`Masker`] walks key/value trees and replaces the value of every key
//! named in the configured field set. Inputs are never modified; a redacted
//! copy is returned.

use crate::error::MaskingError;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

/// Replacement for every masked value.
pub const MASK: &str = "*****";

/// Redacts values of sensitive keys in headers, query parameters and bodies.
#[derive(Debug, Clone, Default)]
pub struct Masker {
    fields: HashSet<String>,
}

impl Masker {
    /// Create a masker for the given field names (matched case-insensitively).
    pub fn new(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            fields: fields.into_iter().map(|f| f.into().to_lowercase()).collect(),
        }
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        // Field names are stored lower-cased.
        self.fields.contains(&key.to_lowercase())
    }

    /// Return a copy of `tree` with sensitive keys masked at any depth.
    pub fn mask(&self, tree: &Value) -> Value {
        match tree {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| {
                        let value = if self.is_sensitive(key) {
                            Value::String(MASK.to_string())
                        } else {
                            self.mask(value)
                        };
                        (key.clone(), value)
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|item| self.mask(item)).collect()),
            other => other.clone(),
        }
    }

    /// Masked header tree.
    pub fn mask_headers(&self, headers: &BTreeMap<String, String>) -> Value {
        let tree = headers
            .iter()
            .map(|(name, value)| (name.clone(), Value::String(value.clone())))
            .collect::<Map<_, _>>();
        self.mask(&Value::Object(tree))
    }

    /// Masked query parameter tree. Each key maps to its values in order.
    pub fn mask_query(&self, params: &BTreeMap<String, Vec<String>>) -> Value {
        self.mask(&Value::Object(multi_map(params)))
    }

    /// Mask a body if it is structured.
    ///
    /// JSON objects and arrays are masked and re-serialized. Form-encoded
    /// bodies are masked and rendered as a JSON object. Returns `Ok(None)`
    /// when the body is not structured and should be logged as-is.
    pub fn mask_body(
        &self,
        text: &str,
        content_type: Option<&str>,
    ) -> Result<Option<String>, MaskingError> {
        let content_type = content_type.map(str::to_lowercase).unwrap_or_default();

        if content_type.contains("application/x-www-form-urlencoded") {
            let pairs: Vec<(String, String)> = serde_urlencoded::from_str(text)?;
            let tree = Value::Object(multi_map(&group_pairs(pairs)));
            return Ok(Some(self.mask(&tree).to_string()));
        }

        let trimmed = text.trim_start();
        let looks_structured = trimmed.starts_with('{') || trimmed.starts_with('[');
        if !looks_structured && !content_type.contains("json") {
            return Ok(None);
        }

        let tree: Value = serde_json::from_str(text)?;
        match tree {
            Value::Object(_) | Value::Array(_) => Ok(Some(self.mask(&tree).to_string())),
            _ => Ok(None),
        }
    }
}

/// Group ordered key/value pairs, keeping every value of repeated keys.
pub(crate) fn group_pairs(pairs: Vec<(String, String)>) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in pairs {
        grouped.entry(key).or_default().push(value);
    }
    grouped
}

fn multi_map(params: &BTreeMap<String, Vec<String>>) -> Map<String, Value> {
    params
        .iter()
        .map(|(key, values)| {
            let values = values.iter().cloned().map(Value::String).collect();
            (key.clone(), Value::Array(values))
        })
        .collect()
}
