//! Field paths and field-level write operations over schemaless documents.
//!
//! A document body is a JSON object ([`Fields`]). Nested values are addressed
//! with dotted [`FieldPath`]s (`"address.city"`). Partial updates are
//! expressed as an ordered list of [`FieldOp`]s, which is the form the backing
//! store's partial-update primitive accepts.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TypeError;

/// Body of a schemaless document.
pub type Fields = Map<String, Value>;

/// Dotted path to a (possibly nested) field.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// Parse a dotted path. Every segment must be non-empty.
    pub fn parse(path: &str) -> Result<Self, TypeError> {
        if path.is_empty() {
            return Err(TypeError::InvalidFieldPath {
                path: path.into(),
                reason: "path must not be empty".into(),
            });
        }
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(TypeError::InvalidFieldPath {
                path: path.into(),
                reason: "path segments must not be empty".into(),
            });
        }
        Ok(Self(segments))
    }

    /// A single top-level field.
    pub fn top(name: impl Into<String>) -> Self {
        Self(vec![name.into()])
    }

    /// Extend this path with one more segment.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// The path segments, outermost first.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// The top-level field this path starts at.
    pub fn root(&self) -> &str {
        &self.0[0]
    }

    /// Resolve this path inside `fields`.
    pub fn get<'a>(&self, fields: &'a Fields) -> Option<&'a Value> {
        let (first, rest) = self.0.split_first()?;
        let mut current = fields.get(first)?;
        for segment in rest {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Write `value` at this path, creating intermediate objects as needed.
    ///
    /// A non-object value sitting on an intermediate segment is replaced.
    pub fn set(&self, fields: &mut Fields, value: Value) {
        let Some((last, parents)) = self.0.split_last() else {
            return;
        };
        let mut current = fields;
        for segment in parents {
            let slot = current
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            current = match slot {
                Value::Object(map) => map,
                other => {
                    *other = Value::Object(Map::new());
                    match other {
                        Value::Object(map) => map,
                        _ => return,
                    }
                }
            };
        }
        current.insert(last.clone(), value);
    }

    /// Remove the value at this path, returning it if present.
    pub fn remove(&self, fields: &mut Fields) -> Option<Value> {
        let (last, parents) = self.0.split_last()?;
        let mut current = fields;
        for segment in parents {
            current = current.get_mut(segment)?.as_object_mut()?;
        }
        current.remove(last)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.to_string()
    }
}

impl fmt::Debug for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldPath({self})")
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// One field-level write inside a partial update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FieldOp {
    /// Write a value at the path.
    Set(FieldPath, Value),
    /// Remove the field at the path (the store's deletion marker).
    Delete(FieldPath),
}

impl FieldOp {
    /// The path this operation targets.
    pub fn path(&self) -> &FieldPath {
        match self {
            Self::Set(path, _) | Self::Delete(path) => path,
        }
    }
}

/// Apply field operations in order.
pub fn apply_ops(fields: &mut Fields, ops: &[FieldOp]) {
    for op in ops {
        match op {
            FieldOp::Set(path, value) => path.set(fields, value.clone()),
            FieldOp::Delete(path) => {
                path.remove(fields);
            }
        }
    }
}
