//! Typed field access over materialized resource views.
//!
//! Dotted paths such as `location.geometry.coordinates` are parsed once into
//! a [`FieldPath`] and resolved through [`FieldAccessor::try_get`], which
//! applies the graph client's notion of "field present": a JSON `null` is
//! an absent field.

use serde_json::Value;
use std::fmt;

/// A parsed dotted field path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse a dotted path. A leading dot is ignored.
    pub fn parse(path: &str) -> Self {
        let path = path.strip_prefix('.').unwrap_or(path);
        let segments = path
            .split('.')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Self { segments }
    }

    /// Path segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Whether the path has no segments.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

impl From<&str> for FieldPath {
    fn from(path: &str) -> Self {
        Self::parse(path)
    }
}

/// Capability to look up a field by path.
pub trait FieldAccessor {
    /// Resolve `path`, returning `None` if any segment is absent.
    fn try_get(&self, path: &FieldPath) -> Option<&Value>;
}

impl FieldAccessor for Value {
    fn try_get(&self, path: &FieldPath) -> Option<&Value> {
        let mut current = self;
        for segment in path.segments() {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
            if current.is_null() {
                return None;
            }
        }
        if path.is_empty() && current.is_null() {
            return None;
        }
        Some(current)
    }
}

/// Whether a resolved value carries data (not null, false, empty string or empty list).
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}
