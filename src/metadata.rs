// SPDX-License-Identifier: MIT
//! Free-form container metadata
//!
//! Metadata is a JSON object with two required fields (`title`, `author`).
//! Timestamps must be ISO-8601 with an explicit offset; `created_date` is
//! filled with the current UTC time when missing.

use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ContainerError, Result};

/// Fields every container must carry
pub const REQUIRED_FIELDS: [&str; 2] = ["title", "author"];

const DATE_FIELDS: [&str; 2] = ["created_date", "modified_date"];

/// Key/value metadata map
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata {
    fields: Map<String, Value>,
}

impl Metadata {
    /// Create metadata with the required fields set
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        let title: String = title.into();
        let author: String = author.into();
        let mut metadata = Self::default();
        metadata.insert("title", title);
        metadata.insert("author", author);
        metadata
    }

    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Build from a JSON value, which must be an object
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(ContainerError::validation(format!(
                "Metadata must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Merge fields in place, overwriting existing keys
    pub fn update<I, K>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        for (key, value) in entries {
            self.fields.insert(key.into(), value);
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.get("title").and_then(Value::as_str)
    }

    pub fn author(&self) -> Option<&str> {
        self.get("author").and_then(Value::as_str)
    }

    pub fn created_date(&self) -> Option<&str> {
        self.get("created_date").and_then(Value::as_str)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Check required fields, field types and timestamp formats
    pub fn validate(&self) -> Result<()> {
        for field in REQUIRED_FIELDS {
            match self.fields.get(field) {
                Some(Value::String(s)) if !s.is_empty() => {}
                Some(Value::String(_)) | Some(Value::Null) | None => {
                    return Err(ContainerError::validation(format!(
                        "Missing required metadata field: {}",
                        field
                    )));
                }
                Some(other) => {
                    return Err(ContainerError::validation(format!(
                        "Metadata field {} must be a string, got {}",
                        field,
                        json_kind(other)
                    )));
                }
            }
        }

        if let Some(tags) = self.fields.get("tags") {
            if !tags.is_array() {
                return Err(ContainerError::validation("Tags must be a list"));
            }
        }

        if let Some(custom) = self.fields.get("custom_fields") {
            if !custom.is_object() {
                return Err(ContainerError::validation(
                    "Custom fields must be a dictionary",
                ));
            }
        }

        for field in DATE_FIELDS {
            match self.fields.get(field) {
                None | Some(Value::Null) => {}
                Some(Value::String(s)) if s.is_empty() => {}
                Some(Value::String(s)) => {
                    parse_timestamp(s).map_err(|reason| {
                        ContainerError::validation(format!("Invalid {}: {}", field, reason))
                    })?;
                }
                Some(other) => {
                    return Err(ContainerError::validation(format!(
                        "Invalid {}: expected a string, got {}",
                        field,
                        json_kind(other)
                    )));
                }
            }
        }

        Ok(())
    }

    /// Validate and auto-fill `created_date` when it is missing or empty
    pub fn normalize(&mut self) -> Result<()> {
        self.validate()?;

        let missing = match self.fields.get("created_date") {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(_) => false,
        };
        if missing {
            let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false);
            self.fields.insert("created_date".to_string(), Value::String(now));
        }

        Ok(())
    }

    /// Compact JSON encoding used in the metadata section
    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.fields)
            .map_err(|e| ContainerError::validation(format!("Metadata is not serializable: {}", e)))
    }

    /// Parse and validate a metadata section payload
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| ContainerError::format(format!("Failed to unpack metadata: {}", e)))?;
        let metadata = match value {
            Value::Object(fields) => Self { fields },
            other => {
                return Err(ContainerError::format(format!(
                    "Failed to unpack metadata: expected an object, got {}",
                    json_kind(&other)
                )))
            }
        };
        metadata
            .validate()
            .map_err(|e| ContainerError::format(format!("Failed to unpack metadata: {}", e)))?;
        Ok(metadata)
    }
}

impl From<Map<String, Value>> for Metadata {
    fn from(fields: Map<String, Value>) -> Self {
        Self::from_map(fields)
    }
}

/// Parse an ISO-8601 timestamp that carries an explicit offset
pub fn parse_timestamp(value: &str) -> std::result::Result<DateTime<FixedOffset>, String> {
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Ok(timestamp);
    }
    if let Ok(timestamp) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Ok(timestamp);
    }
    if NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").is_ok() {
        return Err(format!("{} must have timezone information", value));
    }
    Err(format!("{} is not an ISO-8601 timestamp", value))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
