use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Number of hex characters in every generated document id, whether
/// composed from unique keys or drawn at random.
pub const GENERATED_ID_HEX_LEN: usize = 32;

/// Maximum byte length accepted for a caller-supplied id.
pub const MAX_ID_BYTES: usize = 1500;

/// Identifier of one document inside a collection.
///
/// Ids are immutable for the lifetime of a record. They are either composed
/// deterministically from a collection's unique keys or drawn from the random
/// generator, both producing [`GENERATED_ID_HEX_LEN`] lowercase hex chars.
/// Callers may also supply their own ids; those are validated with
/// [`DocumentId::parse`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DocumentId(String);

impl DocumentId {
    /// Parse and validate a caller-supplied id.
    ///
    /// Rules:
    /// - must be non-empty and at most [`MAX_ID_BYTES`] bytes
    /// - must not contain `/` (it would address a sub-path in the store)
    /// - must not be `.` or `..`
    /// - must not be wrapped in double underscores (`__reserved__`)
    pub fn parse(raw: impl Into<String>) -> Result<Self, TypeError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(TypeError::InvalidDocumentId {
                id: raw,
                reason: "id must not be empty".into(),
            });
        }
        if raw.len() > MAX_ID_BYTES {
            return Err(TypeError::InvalidDocumentId {
                reason: format!("id exceeds {MAX_ID_BYTES} bytes"),
                id: raw,
            });
        }
        if raw.contains('/') {
            return Err(TypeError::InvalidDocumentId {
                id: raw,
                reason: "id must not contain '/'".into(),
            });
        }
        if raw == "." || raw == ".." {
            return Err(TypeError::InvalidDocumentId {
                id: raw,
                reason: "id must not be '.' or '..'".into(),
            });
        }
        if raw.len() > 4 && raw.starts_with("__") && raw.ends_with("__") {
            return Err(TypeError::InvalidDocumentId {
                id: raw,
                reason: "ids wrapped in '__' are reserved".into(),
            });
        }
        Ok(Self(raw))
    }

    /// Build an id from generator output (hex digest or random hex).
    ///
    /// Only the id generators in `folio-crypto` should call this.
    pub fn from_generated(hex: String) -> Self {
        debug_assert_eq!(hex.len(), GENERATED_ID_HEX_LEN);
        Self(hex)
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 8 chars) for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl TryFrom<String> for DocumentId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<DocumentId> for String {
    fn from(id: DocumentId) -> Self {
        id.0
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentId({})", self.0)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
