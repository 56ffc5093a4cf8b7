use async_trait::async_trait;
use folio_types::{Patch, Record, Stored};

use crate::error::HookError;
use crate::report::ValidationReport;
use crate::transaction::Transaction;

/// Kind of write that produced a [`WriteChange`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WriteAction {
    Create,
    Set,
    Update,
    Delete,
}

/// What a committed write did to one document.
#[derive(Clone, Debug, PartialEq)]
pub struct WriteChange<T> {
    /// The document before the write; `None` for creates.
    pub before: Option<Stored<T>>,
    /// The document after a create, set or update.
    pub updated: Option<Stored<T>>,
    /// The removed document of a delete.
    pub deleted: Option<Stored<T>>,
}

/// Caller-supplied behavior every write of a collection passes through.
///
/// Every method has a permissive default, so implementations override only
/// what they need. All hooks except
/// [`post_write_processing`](CollectionHooks::post_write_processing) may veto
/// the operation by returning an error or an invalid report.
#[async_trait]
pub trait CollectionHooks<T: Record>: Send + Sync {
    /// Migrate documents carrying an older schema version.
    ///
    /// Must return one item per input, in input order. The schema version is
    /// restamped by the collection afterwards.
    async fn upgrade_instances(&self, items: Vec<Stored<T>>) -> Result<Vec<Stored<T>>, HookError> {
        Ok(items)
    }

    /// Adjust a record right before it is validated and written.
    async fn pre_write_processing(
        &self,
        _item: &mut T,
        _prior: Option<&Stored<T>>,
        _tx: Option<&Transaction>,
    ) -> Result<(), HookError> {
        Ok(())
    }

    /// Validate a full record.
    async fn validate(&self, _item: &T) -> ValidationReport {
        ValidationReport::valid()
    }

    /// Validate a partial update before it is applied.
    async fn validate_patch(&self, _patch: &Patch) -> ValidationReport {
        ValidationReport::valid()
    }

    /// Refuse deletes that would leave dangling references.
    ///
    /// Return [`HookError::Rejected`] with a reason to veto.
    async fn can_delete_items(&self, _items: &[Stored<T>], _tx: Option<&Transaction>) -> Result<(), HookError> {
        Ok(())
    }

    /// React to a write once it is durable. Failures are logged only.
    async fn post_write_processing(&self, _change: WriteChange<T>, _action: WriteAction) -> Result<(), HookError> {
        Ok(())
    }
}

/// Hooks that accept everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpHooks;

impl<T: Record> CollectionHooks<T> for NoOpHooks {}
