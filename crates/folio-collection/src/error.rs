use folio_store::StoreError;
use folio_types::{DocumentId, TypeError};
use serde_json::Value;

use crate::report::ValidationReport;

/// Errors raised by hook implementations and the hook registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HookError {
    /// The hook refused the operation.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The hook itself failed.
    #[error("hook '{hook}' failed: {message}")]
    Failed { hook: String, message: String },

    /// A second hook was registered under an existing key.
    #[error("a hook is already registered for '{0}'")]
    DuplicateRegistration(String),
}

impl HookError {
    /// Create a failure with a hook name and message.
    pub fn failed(hook: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            hook: hook.into(),
            message: message.into(),
        }
    }
}

/// One failed write of a bulk call.
#[derive(Debug)]
pub struct BulkFailure {
    /// Position of the item in the caller's input.
    pub index: usize,
    /// Target document, when it could be resolved.
    pub id: Option<DocumentId>,
    pub error: Box<CollectionError>,
}

impl BulkFailure {
    pub fn new(index: usize, id: Option<DocumentId>, error: CollectionError) -> Self {
        Self {
            index,
            id,
            error: Box::new(error),
        }
    }
}

/// Every failure of a non-atomic bulk call, in input order.
#[derive(Debug, thiserror::Error)]
#[error("{} of {} bulk writes to '{}' failed", .failures.len(), .attempted, .collection)]
pub struct BulkWriteError {
    pub collection: String,
    /// Number of items the call attempted.
    pub attempted: usize,
    pub failures: Vec<BulkFailure>,
}

impl BulkWriteError {
    /// Input indices that failed.
    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.index).collect()
    }
}

/// Errors produced by collection operations.
#[derive(Debug, thiserror::Error)]
pub enum CollectionError {
    /// A unique-key field is missing or null, or a declaration is unusable.
    #[error("invariant violated: {0}")]
    InvariantViolated(String),

    /// The unique keys no longer compose to the document's id.
    #[error("composed id {composed} does not match document id {expected}")]
    IdMismatch {
        expected: DocumentId,
        composed: DocumentId,
    },

    /// One multi-item call addressed the same document more than once.
    #[error("duplicate ids in one call: {ids:?}")]
    DuplicateIds { ids: Vec<DocumentId> },

    /// A query-driven delete was given the empty-query sentinel.
    #[error("refusing to delete with an empty query")]
    EmptyQueryDelete,

    /// An external transaction cannot hold this many documents.
    #[error("{requested} documents exceed the transaction limit of {limit}")]
    TransactionLimitExceeded { limit: usize, requested: usize },

    /// A newer version of the document already exists. Retryable.
    #[error("entity outdated: {collection}/{id}")]
    EntityOutdated { collection: String, id: DocumentId },

    #[error("document already exists: {collection}/{id}")]
    AlreadyExists { collection: String, id: DocumentId },

    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: DocumentId },

    /// A unique query matched nothing.
    #[error("no document in '{collection}' matches the query")]
    NoMatch { collection: String },

    /// A unique query matched more than one document.
    #[error("{count} documents in '{collection}' match a query expected to be unique")]
    TooManyResults { collection: String, count: usize },

    /// The validation hook refused a record or patch.
    #[error("validation failed for {collection}/{id}: {report}")]
    ValidationFailed {
        collection: String,
        id: DocumentId,
        record: Value,
        report: ValidationReport,
    },

    /// The delete-dependency hook refused a delete.
    #[error("delete of {ids:?} in '{collection}' rejected: {reason}")]
    DeleteRejected {
        collection: String,
        ids: Vec<DocumentId>,
        reason: String,
    },

    /// The transaction was already committed or aborted.
    #[error("transaction is {0}")]
    TransactionClosed(&'static str),

    #[error("hook error: {0}")]
    Hook(#[from] HookError),

    #[error(transparent)]
    Bulk(#[from] BulkWriteError),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("type error: {0}")]
    Type(#[from] TypeError),
}

impl CollectionError {
    /// Returns `true` for conflicts the caller may retry after re-reading.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::EntityOutdated { .. })
    }
}

impl From<StoreError> for CollectionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { collection, id } => Self::EntityOutdated { collection, id },
            StoreError::AlreadyExists { collection, id } => Self::AlreadyExists { collection, id },
            StoreError::NotFound { collection, id } => Self::NotFound { collection, id },
            other => Self::Store(other),
        }
    }
}

/// Result alias for collection operations.
pub type CollectionResult<T> = Result<T, CollectionError>;
