//! Typed hook registry.
//!
//! Hooks are resolved by key once, at registration time. A second
//! registration under the same key is refused rather than silently
//! replacing the first.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::marker::PhantomData;

use async_trait::async_trait;
use folio_types::envelope::data_fields;
use folio_types::{FieldPath, Patch, PatchValue, Record};
use serde_json::Value;

use crate::error::HookError;
use crate::hooks::CollectionHooks;
use crate::report::ValidationReport;

/// Map from a key type to one hook implementation.
#[derive(Debug)]
pub struct HookRegistry<K, H> {
    entries: HashMap<K, H>,
}

impl<K: Eq + Hash + Display, H> HookRegistry<K, H> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register `hook` under `key`. Fails if the key is taken.
    pub fn register(&mut self, key: K, hook: H) -> Result<(), HookError> {
        if self.entries.contains_key(&key) {
            return Err(HookError::DuplicateRegistration(key.to_string()));
        }
        self.entries.insert(key, hook);
        Ok(())
    }

    pub fn get(&self, key: &K) -> Option<&H> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    fn values(&self) -> impl Iterator<Item = &H> {
        self.entries.values()
    }
}

impl<K: Eq + Hash + Display, H> Default for HookRegistry<K, H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Check on one field value. `Err` carries the message to report.
pub type FieldRule = Box<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// Validation hooks assembled from per-field rules.
///
/// A missing field is checked as `null`. Patches are checked on their
/// top-level entries: replaced values as given, deletions as `null`.
pub struct FieldRuleHooks<T> {
    rules: HookRegistry<String, (FieldPath, FieldRule)>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> FieldRuleHooks<T> {
    pub fn new() -> Self {
        Self {
            rules: HookRegistry::new(),
            _record: PhantomData,
        }
    }

    /// Add a rule for the dotted `field`. One rule per field.
    pub fn rule<F>(mut self, field: &str, check: F) -> Result<Self, HookError>
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        let path = FieldPath::parse(field).map_err(|e| HookError::failed("field-rules", e.to_string()))?;
        self.rules.register(path.to_string(), (path, Box::new(check)))?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<T: Record> Default for FieldRuleHooks<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for FieldRuleHooks<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldRuleHooks")
            .field("fields", &self.rules.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl<T: Record> CollectionHooks<T> for FieldRuleHooks<T> {
    async fn validate(&self, item: &T) -> ValidationReport {
        let fields = match data_fields(item) {
            Ok(fields) => fields,
            Err(err) => return ValidationReport::invalid("", err.to_string()),
        };
        let mut report = ValidationReport::valid();
        for (path, check) in self.rules.values() {
            let value = path.get(&fields).unwrap_or(&Value::Null);
            if let Err(message) = check(value) {
                report.push(path.to_string(), message);
            }
        }
        report
    }

    async fn validate_patch(&self, patch: &Patch) -> ValidationReport {
        let mut report = ValidationReport::valid();
        for (path, check) in self.rules.values() {
            if path.segments().len() != 1 {
                continue;
            }
            let value = match patch.get(path.root()) {
                Some(PatchValue::Set(value)) => value,
                Some(PatchValue::Absent) => &Value::Null,
                Some(PatchValue::Merge(_)) | None => continue,
            };
            if let Err(message) = check(value) {
                report.push(path.to_string(), message);
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Clone, Debug, Serialize, Deserialize)]
    struct Item {
        name: String,
        qty: i64,
    }

    fn non_empty(v: &Value) -> Result<(), String> {
        match v.as_str() {
            Some(s) if !s.is_empty() => Ok(()),
            _ => Err("must be a non-empty string".into()),
        }
    }

    fn positive(v: &Value) -> Result<(), String> {
        match v.as_i64() {
            Some(n) if n > 0 => Ok(()),
            _ => Err("must be positive".into()),
        }
    }

    fn hooks() -> FieldRuleHooks<Item> {
        FieldRuleHooks::new()
            .rule("name", non_empty)
            .unwrap()
            .rule("qty", positive)
            .unwrap()
    }

    #[test]
    fn duplicate_key_is_refused() {
        let mut registry: HookRegistry<String, u8> = HookRegistry::new();
        registry.register("png".into(), 1).unwrap();
        let err = registry.register("png".into(), 2).unwrap_err();
        assert_eq!(err, HookError::DuplicateRegistration("png".into()));
        assert_eq!(registry.get(&"png".to_string()), Some(&1));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_field_rule_is_refused() {
        let err = hooks().rule("qty", positive).unwrap_err();
        assert!(matches!(err, HookError::DuplicateRegistration(f) if f == "qty"));
    }

    #[tokio::test]
    async fn rules_report_every_failing_field() {
        let hooks = hooks();
        let good = Item {
            name: "bolt".into(),
            qty: 3,
        };
        assert!(hooks.validate(&good).await.is_valid());

        let bad = Item {
            name: String::new(),
            qty: 0,
        };
        let report = hooks.validate(&bad).await;
        assert_eq!(report.violations.len(), 2);
    }

    #[tokio::test]
    async fn patch_rules_see_set_and_absent_entries() {
        let hooks = hooks();
        assert!(hooks.validate_patch(&Patch::new().set("qty", 5)).await.is_valid());
        assert!(!hooks.validate_patch(&Patch::new().set("qty", json!(-1))).await.is_valid());
        assert!(!hooks.validate_patch(&Patch::new().absent("name")).await.is_valid());
        // Untouched fields are not checked.
        assert!(hooks.validate_patch(&Patch::new()).await.is_valid());
    }
}
