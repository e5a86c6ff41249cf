//! Nested property access over variable values.
//!
//! Access is capability based: a container answers "give me the value under
//! this segment" and "which keys could I have asked for". `serde_json::Value`
//! implements it for objects and arrays; structured records are stored as
//! serialized objects (see `VariableStore::set_record`), so field lookup by
//! name falls out of the object case.

use std::borrow::Cow;

use serde_json::Value;
use thiserror::Error;

/// Why a single path segment could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessFailure {
    #[error("key '{key}' not found")]
    NotFound { key: String },
    #[error("cannot access '{segment}' on a {kind} value")]
    AccessError { segment: String, kind: &'static str },
    #[error("index {index} out of range (length {length})")]
    IndexOutOfRange { index: usize, length: usize },
    #[error("'{segment}' is not a valid array index")]
    InvalidIndex { segment: String },
}

impl AccessFailure {
    /// Short machine-friendly label of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            AccessFailure::NotFound { .. } => "not_found",
            AccessFailure::AccessError { .. } => "access_error",
            AccessFailure::IndexOutOfRange { .. } => "index_out_of_range",
            AccessFailure::InvalidIndex { .. } => "invalid_index",
        }
    }
}

/// A value that can be navigated one segment at a time.
pub trait PathAccess {
    /// Returns the child addressed by `segment`.
    fn access_segment(&self, segment: &str) -> Result<Cow<'_, Value>, AccessFailure>;

    /// Keys (or indices) that would have resolved at this level.
    fn available_keys(&self) -> Vec<String>;
}

impl PathAccess for Value {
    fn access_segment(&self, segment: &str) -> Result<Cow<'_, Value>, AccessFailure> {
        match self {
            Value::Object(map) => match map.get(segment) {
                Some(value) => Ok(Cow::Borrowed(value)),
                None => Err(AccessFailure::NotFound { key: segment.to_string() }),
            },
            Value::Array(items) => {
                if segment == "length" {
                    return Ok(Cow::Owned(Value::from(items.len())));
                }
                let index = segment.parse::<usize>().map_err(|_| AccessFailure::InvalidIndex {
                    segment: segment.to_string(),
                })?;
                items.get(index).map(Cow::Borrowed).ok_or(AccessFailure::IndexOutOfRange {
                    index,
                    length: items.len(),
                })
            }
            scalar => Err(AccessFailure::AccessError {
                segment: segment.to_string(),
                kind: value_kind(scalar),
            }),
        }
    }

    fn available_keys(&self) -> Vec<String> {
        match self {
            Value::Object(map) => map.keys().cloned().collect(),
            Value::Array(items) if items.is_empty() => vec!["length".to_string()],
            Value::Array(items) => vec![format!("0..{}", items.len() - 1), "length".to_string()],
            _ => Vec::new(),
        }
    }
}

/// Failure of a multi-segment walk, with the context needed for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathFailure {
    pub reason: AccessFailure,
    /// Segments that resolved before the failing one.
    pub resolved: Vec<String>,
    pub failed_segment: String,
    pub available_keys: Vec<String>,
}

/// Walks `segments` starting at `root`.
pub fn resolve_path<'a>(root: &'a Value, segments: &[&str]) -> Result<Cow<'a, Value>, PathFailure> {
    let mut current: Cow<'a, Value> = Cow::Borrowed(root);
    for (position, segment) in segments.iter().enumerate() {
        let step = match &current {
            Cow::Borrowed(value) => {
                let value: &'a Value = *value;
                value.access_segment(segment)
            }
            Cow::Owned(value) => value.access_segment(segment).map(|child| Cow::Owned(child.into_owned())),
        };
        match step {
            Ok(next) => current = next,
            Err(reason) => {
                return Err(PathFailure {
                    reason,
                    resolved: segments[..position].iter().map(|part| part.to_string()).collect(),
                    failed_segment: segment.to_string(),
                    available_keys: current.available_keys(),
                });
            }
        }
    }
    Ok(current)
}

/// Splits `a.b[0].c` into `["a", "b", "0", "c"]`.
pub fn split_path(expression: &str) -> Vec<&str> {
    expression
        .split(['.', '[', ']'])
        .filter(|segment| !segment.is_empty())
        .collect()
}

pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
