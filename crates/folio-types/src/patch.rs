//! Partial-field patches with explicit deletion.
//!
//! A [`Patch`] maps field names to [`PatchValue`]s. Marking a field
//! [`PatchValue::Absent`] is an instruction to delete it from the stored
//! document, not to ignore it. Nested [`PatchValue::Merge`] patches are walked
//! recursively, so an absent marker at any depth becomes a deletion of that
//! nested field while its siblings are left untouched.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::TypeError;
use crate::fields::{FieldOp, FieldPath, Fields};

/// Value of one entry in a [`Patch`].
#[derive(Clone, Debug, PartialEq)]
pub enum PatchValue {
    /// Replace the field with this value.
    Set(Value),
    /// Delete the field.
    Absent,
    /// Merge into the nested object field entry by entry.
    Merge(Patch),
}

/// A partial update to one document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Patch {
    entries: BTreeMap<String, PatchValue>,
}

impl Patch {
    /// An empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a patch that sets every top-level entry of `fields`.
    pub fn from_fields(fields: Fields) -> Self {
        let entries = fields
            .into_iter()
            .map(|(name, value)| (name, PatchValue::Set(value)))
            .collect();
        Self { entries }
    }

    /// Set `field` to `value`.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries.insert(field.into(), PatchValue::Set(value.into()));
        self
    }

    /// Mark `field` for deletion.
    pub fn absent(mut self, field: impl Into<String>) -> Self {
        self.entries.insert(field.into(), PatchValue::Absent);
        self
    }

    /// Merge a nested patch into the object at `field`.
    pub fn merge(mut self, field: impl Into<String>, nested: Patch) -> Self {
        self.entries.insert(field.into(), PatchValue::Merge(nested));
        self
    }

    /// Insert or replace an entry.
    pub fn insert(&mut self, field: impl Into<String>, value: PatchValue) {
        self.entries.insert(field.into(), value);
    }

    /// Remove a top-level entry, returning it if present.
    pub fn remove(&mut self, field: &str) -> Option<PatchValue> {
        self.entries.remove(field)
    }

    /// Top-level entry for `field`.
    pub fn get(&self, field: &str) -> Option<&PatchValue> {
        self.entries.get(field)
    }

    /// Iterate entries in field-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &PatchValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Flatten into store field operations.
    ///
    /// Absent markers become [`FieldOp::Delete`] at their full dotted path,
    /// however deeply they are nested.
    pub fn to_ops(&self) -> Result<Vec<FieldOp>, TypeError> {
        let mut ops = Vec::with_capacity(self.entries.len());
        self.collect_ops(None, &mut ops)?;
        Ok(ops)
    }

    fn collect_ops(&self, prefix: Option<&FieldPath>, ops: &mut Vec<FieldOp>) -> Result<(), TypeError> {
        for (name, value) in &self.entries {
            if name.is_empty() || name.contains('.') {
                return Err(TypeError::InvalidFieldPath {
                    path: name.clone(),
                    reason: "patch keys must be single non-empty segments".into(),
                });
            }
            let path = match prefix {
                Some(prefix) => prefix.child(name.clone()),
                None => FieldPath::top(name.clone()),
            };
            match value {
                PatchValue::Set(value) => ops.push(FieldOp::Set(path, value.clone())),
                PatchValue::Absent => ops.push(FieldOp::Delete(path)),
                PatchValue::Merge(nested) => nested.collect_ops(Some(&path), ops)?,
            }
        }
        Ok(())
    }
}
