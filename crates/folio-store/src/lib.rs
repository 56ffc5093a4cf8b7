//! The backing document store for Folio.
//!
//! Folio collections never talk to a database directly; they go through the
//! [`DocumentStore`] trait defined here. A store is schemaless: documents are
//! JSON objects addressed by collection name and [`DocumentId`](folio_types::DocumentId).
//!
//! # Write Modes
//!
//! - [`StoreTransaction`] -- optimistic read-then-write unit, atomic up to
//!   [`DocumentStore::max_transaction_documents`] documents
//! - [`WriteBatch`] -- atomic group of writes without reads
//! - [`BulkWriter`] -- non-atomic writer reporting one outcome per write
//!
//! # Storage Backends
//!
//! - [`InMemoryStore`] -- `HashMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. The store never assigns ids.
//! 2. Reads inside a transaction precede its writes.
//! 3. A transaction whose reads went stale fails with [`StoreError::Conflict`].
//! 4. Failures of a bulk writer never stop its other writes.

pub mod error;
pub mod memory;
pub mod query;
pub mod traits;
pub mod value;

// Re-export primary types at crate root for ergonomic imports.
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use query::{Condition, Direction, Operator, OrderBy, StoreQuery};
pub use traits::{
    BulkWriter, DocRef, DocumentStore, StoreTransaction, StoredDocument, WriteBatch, WriteOp,
    DEFAULT_MAX_TRANSACTION_DOCUMENTS,
};
pub use value::{compare_values, same_type};
