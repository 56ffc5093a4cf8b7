use folio_types::DocumentId;

/// Errors from backing-store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The addressed document does not exist (update precondition).
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: DocumentId },

    /// A create addressed a document that already exists.
    #[error("document already exists: {collection}/{id}")]
    AlreadyExists { collection: String, id: DocumentId },

    /// A document read inside a transaction changed before commit.
    #[error("transaction conflict on {collection}/{id}")]
    Conflict { collection: String, id: DocumentId },

    /// A transaction or batch touched more documents than the store allows.
    #[error("transaction touches {touched} documents, limit is {limit}")]
    TransactionTooLarge { limit: usize, touched: usize },

    /// A transaction read was issued after one of its writes.
    #[error("transactions require all reads to be executed before all writes")]
    ReadAfterWrite,

    /// The query cannot be executed by this store.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The store is unreachable or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// The document the error is about, if any.
    pub fn document_id(&self) -> Option<&DocumentId> {
        match self {
            Self::NotFound { id, .. } | Self::AlreadyExists { id, .. } | Self::Conflict { id, .. } => {
                Some(id)
            }
            _ => None,
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
