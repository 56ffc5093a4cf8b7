//! The document envelope shared by every persisted record.
//!
//! Each stored document carries four envelope fields next to its own data:
//!
//! | field            | meaning                                        |
//! |------------------|------------------------------------------------|
//! | `_id`            | immutable document id                          |
//! | `createdAt`      | timestamp of the first write                   |
//! | `updatedAt`      | timestamp of the latest write, `>= createdAt`  |
//! | `schemaVersion`  | version label from the collection's list       |
//!
//! Envelope fields are stamped by the document handle, never by callers.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TypeError;
use crate::fields::Fields;
use crate::identity::DocumentId;
use crate::temporal::Timestamp;

pub const FIELD_ID: &str = "_id";
pub const FIELD_CREATED_AT: &str = "createdAt";
pub const FIELD_UPDATED_AT: &str = "updatedAt";
pub const FIELD_SCHEMA_VERSION: &str = "schemaVersion";

/// All reserved envelope field names.
pub const ENVELOPE_FIELDS: [&str; 4] = [
    FIELD_ID,
    FIELD_CREATED_AT,
    FIELD_UPDATED_AT,
    FIELD_SCHEMA_VERSION,
];

/// Returns `true` if `name` is an envelope field.
pub fn is_envelope_field(name: &str) -> bool {
    ENVELOPE_FIELDS.contains(&name)
}

/// A record type that can be stored in a collection.
///
/// Any owned, cloneable serde type qualifies; it must serialize to a JSON
/// object whose keys do not collide with the envelope fields.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> Record for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Envelope metadata of a persisted document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub id: DocumentId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub schema_version: String,
}

/// A persisted record: envelope plus typed data.
#[derive(Clone, Debug, PartialEq)]
pub struct Stored<T> {
    pub meta: Meta,
    pub data: T,
}

impl<T: Record> Stored<T> {
    /// The document id.
    pub fn id(&self) -> &DocumentId {
        &self.meta.id
    }

    /// Flatten into the schemaless body written to the store.
    pub fn to_fields(&self) -> Result<Fields, TypeError> {
        let mut fields = data_fields(&self.data)?;
        fields.insert(FIELD_ID.into(), Value::String(self.meta.id.to_string()));
        fields.insert(FIELD_CREATED_AT.into(), timestamp_value(&self.meta.created_at)?);
        fields.insert(FIELD_UPDATED_AT.into(), timestamp_value(&self.meta.updated_at)?);
        fields.insert(
            FIELD_SCHEMA_VERSION.into(),
            Value::String(self.meta.schema_version.clone()),
        );
        Ok(fields)
    }

    /// Rebuild a record from a stored body.
    ///
    /// `id` is the store key and wins over any `_id` inside the body.
    pub fn from_fields(id: DocumentId, mut fields: Fields) -> Result<Self, TypeError> {
        fields.remove(FIELD_ID);
        let created_at = take_timestamp(&mut fields, FIELD_CREATED_AT)?;
        let updated_at = take_timestamp(&mut fields, FIELD_UPDATED_AT)?;
        let schema_version = match fields.remove(FIELD_SCHEMA_VERSION) {
            Some(Value::String(version)) => version,
            _ => return Err(TypeError::MalformedEnvelope(FIELD_SCHEMA_VERSION)),
        };
        let data = data_from_fields(fields)?;
        Ok(Self {
            meta: Meta {
                id,
                created_at,
                updated_at,
                schema_version,
            },
            data,
        })
    }
}

/// Candidate record handed to `create`/`set`.
///
/// A draft made from a previously read [`Stored`] keeps its id, `updatedAt`
/// and schema version, which is what `set` uses for the optimistic
/// concurrency check and the upgrade decision.
#[derive(Clone, Debug, PartialEq)]
pub struct Draft<T> {
    pub id: Option<DocumentId>,
    pub updated_at: Option<Timestamp>,
    pub schema_version: Option<String>,
    pub data: T,
}

impl<T> Draft<T> {
    /// A fresh draft with no id and no history.
    pub fn new(data: T) -> Self {
        Self {
            id: None,
            updated_at: None,
            schema_version: None,
            data,
        }
    }

    /// Pin the draft to an explicit id.
    pub fn with_id(mut self, id: DocumentId) -> Self {
        self.id = Some(id);
        self
    }

    /// Claim the `updatedAt` this draft was derived from.
    pub fn with_updated_at(mut self, updated_at: Timestamp) -> Self {
        self.updated_at = Some(updated_at);
        self
    }
}

impl<T> From<Stored<T>> for Draft<T> {
    fn from(stored: Stored<T>) -> Self {
        Self {
            id: Some(stored.meta.id),
            updated_at: Some(stored.meta.updated_at),
            schema_version: Some(stored.meta.schema_version),
            data: stored.data,
        }
    }
}

/// Serialize record data into fields, refusing envelope collisions.
pub fn data_fields<T: Serialize>(data: &T) -> Result<Fields, TypeError> {
    let value = serde_json::to_value(data).map_err(|e| TypeError::Serialization(e.to_string()))?;
    let fields = match value {
        Value::Object(fields) => fields,
        Value::Null => return Err(TypeError::NotAnObject("null")),
        Value::Bool(_) => return Err(TypeError::NotAnObject("a boolean")),
        Value::Number(_) => return Err(TypeError::NotAnObject("a number")),
        Value::String(_) => return Err(TypeError::NotAnObject("a string")),
        Value::Array(_) => return Err(TypeError::NotAnObject("an array")),
    };
    if let Some(key) = fields.keys().find(|key| is_envelope_field(key)) {
        return Err(TypeError::ReservedField(key.clone()));
    }
    Ok(fields)
}

/// Rebuild record data from fields with the envelope stripped.
pub fn data_from_fields<T: DeserializeOwned>(mut fields: Fields) -> Result<T, TypeError> {
    for name in ENVELOPE_FIELDS {
        fields.remove(name);
    }
    serde_json::from_value(Value::Object(fields)).map_err(|e| TypeError::Serialization(e.to_string()))
}

/// Read a timestamp envelope field without consuming it.
pub fn read_timestamp(fields: &Fields, name: &'static str) -> Result<Timestamp, TypeError> {
    let value = fields.get(name).ok_or(TypeError::MalformedEnvelope(name))?;
    serde_json::from_value(value.clone()).map_err(|_| TypeError::MalformedEnvelope(name))
}

/// Encode a timestamp as a field value.
pub fn timestamp_value(ts: &Timestamp) -> Result<Value, TypeError> {
    serde_json::to_value(ts).map_err(|e| TypeError::Serialization(e.to_string()))
}

fn take_timestamp(fields: &mut Fields, name: &'static str) -> Result<Timestamp, TypeError> {
    let ts = read_timestamp(fields, name)?;
    fields.remove(name);
    Ok(ts)
}
