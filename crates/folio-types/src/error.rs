use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid document id {id:?}: {reason}")]
    InvalidDocumentId { id: String, reason: String },

    #[error("invalid field path {path:?}: {reason}")]
    InvalidFieldPath { path: String, reason: String },

    #[error("record must serialize to a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("field {0:?} is reserved for the document envelope")]
    ReservedField(String),

    #[error("envelope field {0:?} is missing or malformed")]
    MalformedEnvelope(&'static str),

    #[error("serialization error: {0}")]
    Serialization(String),
}
