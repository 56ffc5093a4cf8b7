use std::fmt;

use async_trait::async_trait;
use folio_types::{DocumentId, FieldOp, Fields};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::query::StoreQuery;

/// Per-transaction document limit of the reference store.
pub const DEFAULT_MAX_TRANSACTION_DOCUMENTS: usize = 500;

/// Address of one document: container name plus id.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocRef {
    pub collection: String,
    pub id: DocumentId,
}

impl DocRef {
    pub fn new(collection: impl Into<String>, id: DocumentId) -> Self {
        Self {
            collection: collection.into(),
            id,
        }
    }
}

impl fmt::Debug for DocRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocRef({}/{})", self.collection, self.id)
    }
}

impl fmt::Display for DocRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A document as returned by the store.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredDocument {
    pub id: DocumentId,
    pub fields: Fields,
}

/// One physical write, as queued by transactions, batches and bulk writers.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOp {
    /// Write a new document; fails if it already exists.
    Create { doc: DocRef, fields: Fields },
    /// Overwrite (or create) a document.
    Set { doc: DocRef, fields: Fields },
    /// Apply field operations; fails if the document does not exist.
    Update { doc: DocRef, ops: Vec<FieldOp> },
    /// Remove a document; deleting a missing document is a no-op.
    Delete { doc: DocRef },
}

impl WriteOp {
    /// The document this write targets.
    pub fn doc(&self) -> &DocRef {
        match self {
            Self::Create { doc, .. }
            | Self::Set { doc, .. }
            | Self::Update { doc, .. }
            | Self::Delete { doc } => doc,
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Set { .. } => "set",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

/// The transactional, schemaless document store Folio sits on.
///
/// Implementations must satisfy these invariants:
/// - Single-document reads and writes are atomic.
/// - A transaction is atomic up to [`DocumentStore::max_transaction_documents`]
///   distinct documents; a transaction whose reads changed before commit
///   fails with a conflict instead of committing.
/// - The store never assigns ids; callers address documents explicitly.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read one document. Returns `Ok(None)` if it does not exist.
    async fn get(&self, doc: &DocRef) -> StoreResult<Option<StoredDocument>>;

    /// Read several documents, preserving input order.
    async fn get_all(&self, docs: &[DocRef]) -> StoreResult<Vec<Option<StoredDocument>>> {
        let mut found = Vec::with_capacity(docs.len());
        for doc in docs {
            found.push(self.get(doc).await?);
        }
        Ok(found)
    }

    /// Create a document; fails with `AlreadyExists` if the id is taken.
    async fn create(&self, doc: &DocRef, fields: Fields) -> StoreResult<()>;

    /// Overwrite or create a document.
    async fn set(&self, doc: &DocRef, fields: Fields) -> StoreResult<()>;

    /// Partially update an existing document; fails with `NotFound` otherwise.
    async fn update(&self, doc: &DocRef, ops: &[FieldOp]) -> StoreResult<()>;

    /// Delete a document. Returns `true` if it existed.
    async fn delete(&self, doc: &DocRef) -> StoreResult<bool>;

    /// Run a query against one collection.
    async fn query(&self, query: &StoreQuery) -> StoreResult<Vec<StoredDocument>>;

    /// Open a read-then-write transaction.
    async fn begin_transaction(&self) -> StoreResult<Box<dyn StoreTransaction>>;

    /// Open an atomic, read-free write batch.
    fn batch(&self) -> Box<dyn WriteBatch>;

    /// Open a non-atomic, throughput-oriented bulk writer.
    fn bulk_writer(&self) -> Box<dyn BulkWriter>;

    /// Maximum distinct documents one transaction or batch may touch.
    fn max_transaction_documents(&self) -> usize {
        DEFAULT_MAX_TRANSACTION_DOCUMENTS
    }
}

/// A backing-store transaction.
///
/// Reads must all happen before the first write; writes are buffered by the
/// store and applied atomically by [`StoreTransaction::commit`].
#[async_trait]
pub trait StoreTransaction: Send {
    async fn get(&mut self, doc: &DocRef) -> StoreResult<Option<StoredDocument>>;

    async fn query(&mut self, query: &StoreQuery) -> StoreResult<Vec<StoredDocument>>;

    /// Buffer one write.
    fn write(&mut self, op: WriteOp) -> StoreResult<()>;

    /// Validate reads and apply all buffered writes atomically.
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Discard the transaction.
    async fn rollback(self: Box<Self>);
}

/// An atomic group of writes without reads.
#[async_trait]
pub trait WriteBatch: Send {
    fn write(&mut self, op: WriteOp);

    /// Number of queued writes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply every queued write or none of them.
    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// A non-atomic writer that applies each write independently.
///
/// Failures of individual writes never stop the others; they are reported
/// per write, in enqueue order, when the writer is closed.
#[async_trait]
pub trait BulkWriter: Send {
    /// Enqueue one write.
    async fn write(&mut self, op: WriteOp);

    /// Push every pending write to the store.
    async fn flush(&mut self);

    /// Flush and return one outcome per enqueued write.
    async fn close(self: Box<Self>) -> Vec<StoreResult<()>>;
}
