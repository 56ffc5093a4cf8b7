//! Typed document collections for Folio.
//!
//! A [`Collection`] binds a record type to one container of a
//! [`DocumentStore`](folio_store::DocumentStore) and routes every write
//! through the same rules:
//!
//! - **Identity** -- ids are composed from the declared unique keys, so two
//!   records with the same key values can never coexist.
//! - **Hooks** -- upgrade, pre-write, validation and delete-dependency hooks
//!   run in a fixed order ([`HookPipeline`]); post-write hooks run once the
//!   write is durable.
//! - **Optimistic concurrency** -- `set` refuses a candidate older than the
//!   stored document with [`CollectionError::EntityOutdated`].
//!
//! # Write Paths
//!
//! | Path | Atomicity | Failure |
//! |------|-----------|---------|
//! | `create().item`, `set().item`, `update().item`, `delete().item` | one transaction | first error |
//! | `create().all`, `set().all`, `update().all`, `delete().all` | per chunk | first error, earlier chunks stay |
//! | `multi().*` | none | every failure, by input index |
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use folio_collection::{Collection, CollectionDeclaration, NoOpHooks};
//! use folio_store::InMemoryStore;
//! use folio_types::Draft;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct User {
//!     email: String,
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let users = Collection::<User>::new(
//!     CollectionDeclaration::new("users", &["v1"]).with_unique_keys(&["email"]),
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(NoOpHooks),
//! )
//! .unwrap();
//!
//! let alice = users
//!     .create()
//!     .item(Draft::new(User { email: "alice@example.com".into() }), None)
//!     .await
//!     .unwrap();
//! assert_eq!(alice.meta.created_at, alice.meta.updated_at);
//! # });
//! ```

pub mod cache;
pub mod collection;
pub mod config;
pub mod delete;
pub mod error;
pub mod handle;
pub mod hooks;
pub mod identity;
pub mod multi;
pub mod pipeline;
pub mod query;
pub mod registry;
pub mod report;
pub mod transaction;

// Re-exports for convenience.
pub use cache::ReadThroughCache;
pub use collection::{Collection, CreateOps, QueryOps, SetOps, UpdateOps};
pub use config::{CollectionConfig, CollectionDeclaration};
pub use delete::{ConfirmIAm, ConfirmSure, ConfirmYes, DeleteOps};
pub use error::{BulkFailure, BulkWriteError, CollectionError, CollectionResult, HookError};
pub use handle::DocumentHandle;
pub use hooks::{CollectionHooks, NoOpHooks, WriteAction, WriteChange};
pub use identity::{compose_id, IdentityRule};
pub use multi::MultiOps;
pub use pipeline::{HookPipeline, PipelineTrace, Stage, StageResult};
pub use query::{Filter, Pagination, Query};
pub use registry::{FieldRule, FieldRuleHooks, HookRegistry};
pub use report::{ValidationReport, Violation};
pub use transaction::{run_in_transaction, Transaction, TransactionState};
