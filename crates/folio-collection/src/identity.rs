//! Document id composition.
//!
//! A collection either declares unique keys, in which case every id is the
//! domain-separated hash of those field values in declared order, or it
//! declares none and ids are random.

use folio_crypto::{random_id, IdHasher};
use folio_types::{DocumentId, FieldPath, Fields};
use serde_json::Value;

use crate::error::{CollectionError, CollectionResult};

/// Compose an id from the values of `keys` in `fields`.
///
/// Every key must be present and non-null.
pub fn compose_id(fields: &Fields, keys: &[FieldPath]) -> CollectionResult<DocumentId> {
    let mut values = Vec::with_capacity(keys.len());
    for key in keys {
        match key.get(fields) {
            None | Some(Value::Null) => {
                return Err(CollectionError::InvariantViolated(format!(
                    "unique key '{key}' is missing"
                )))
            }
            Some(value) => values.push(value),
        }
    }
    Ok(IdHasher::UNIQUE_KEYS.compose(&values))
}

/// The id rule of one collection.
#[derive(Clone, Debug)]
pub struct IdentityRule {
    keys: Vec<FieldPath>,
}

impl IdentityRule {
    /// Parse the declared unique keys; dotted names address nested fields.
    pub fn new(unique_keys: &[String]) -> CollectionResult<Self> {
        let keys = unique_keys
            .iter()
            .map(|k| FieldPath::parse(k))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { keys })
    }

    pub fn has_keys(&self) -> bool {
        !self.keys.is_empty()
    }

    pub fn keys(&self) -> &[FieldPath] {
        &self.keys
    }

    /// Resolve the id for a record body.
    ///
    /// With unique keys, the composed id must equal `existing` when one is
    /// given. Without unique keys, `existing` is kept or a random id issued.
    pub fn resolve(&self, fields: &Fields, existing: Option<&DocumentId>) -> CollectionResult<DocumentId> {
        if !self.has_keys() {
            return Ok(existing.cloned().unwrap_or_else(random_id));
        }
        let composed = compose_id(fields, &self.keys)?;
        match existing {
            Some(expected) if *expected != composed => Err(CollectionError::IdMismatch {
                expected: expected.clone(),
                composed,
            }),
            _ => Ok(composed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    fn rule(keys: &[&str]) -> IdentityRule {
        IdentityRule::new(&keys.iter().map(|k| k.to_string()).collect::<Vec<_>>()).unwrap()
    }

    #[test]
    fn composition_is_deterministic() {
        let rule = rule(&["aKey", "bKey"]);
        let fields = body(json!({"aKey": "aaaa", "bKey": 9, "content": "c1"}));
        let first = rule.resolve(&fields, None).unwrap();
        let second = rule.resolve(&body(json!({"aKey": "aaaa", "bKey": 9, "content": "c2"})), None).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), 32);
    }

    #[test]
    fn key_order_matters() {
        let fields = body(json!({"a": "x", "b": "y"}));
        assert_ne!(
            rule(&["a", "b"]).resolve(&fields, None).unwrap(),
            rule(&["b", "a"]).resolve(&fields, None).unwrap()
        );
    }

    #[test]
    fn missing_or_null_key_is_fatal() {
        let rule = rule(&["a", "b"]);
        let err = rule.resolve(&body(json!({"a": 1})), None).unwrap_err();
        assert!(matches!(err, CollectionError::InvariantViolated(_)));
        let err = rule.resolve(&body(json!({"a": 1, "b": null})), None).unwrap_err();
        assert!(matches!(err, CollectionError::InvariantViolated(_)));
    }

    #[test]
    fn mismatch_with_existing_id_is_fatal() {
        let rule = rule(&["a"]);
        let original = rule.resolve(&body(json!({"a": 1})), None).unwrap();
        assert_eq!(rule.resolve(&body(json!({"a": 1})), Some(&original)).unwrap(), original);
        let err = rule.resolve(&body(json!({"a": 2})), Some(&original)).unwrap_err();
        assert!(matches!(err, CollectionError::IdMismatch { .. }));
    }

    #[test]
    fn nested_keys() {
        let rule = rule(&["owner.email"]);
        let id = rule.resolve(&body(json!({"owner": {"email": "a@b.c"}})), None).unwrap();
        assert_eq!(id, compose_id(&body(json!({"x": {"y": "a@b.c"}})), &[FieldPath::parse("x.y").unwrap()]).unwrap());
    }

    #[test]
    fn keyless_ids_are_random_or_kept() {
        let rule = rule(&[]);
        let a = rule.resolve(&Fields::new(), None).unwrap();
        let b = rule.resolve(&Fields::new(), None).unwrap();
        assert_ne!(a, b);
        assert_eq!(rule.resolve(&Fields::new(), Some(&a)).unwrap(), a);
    }
}
