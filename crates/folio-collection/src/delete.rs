use folio_store::WriteOp;
use folio_types::{DocumentId, Record, Stored};
use tracing::{debug, info};

use crate::collection::{Collection, ItemWrite};
use crate::error::{CollectionError, CollectionResult};
use crate::hooks::{WriteAction, WriteChange};
use crate::query::Query;
use crate::transaction::{run_in_transaction, Transaction};

/// Delete operations.
///
/// Every path consults the delete-dependency hook before removing anything.
pub struct DeleteOps<'c, T: Record> {
    collection: &'c Collection<T>,
}

impl<'c, T: Record> DeleteOps<'c, T> {
    pub(crate) fn new(collection: &'c Collection<T>) -> Self {
        Self { collection }
    }

    /// Delete one document by id; `None` if it did not exist.
    pub async fn item(&self, id: &DocumentId, tx: Option<&Transaction>) -> CollectionResult<Option<Stored<T>>> {
        let c = self.collection;
        run_in_transaction(c.store().as_ref(), tx, |tx| async move {
            let mut handle = c.doc(id.clone());
            handle.delete(Some(&tx)).await
        })
        .await
    }

    /// Delete the single match of `query`.
    pub async fn unique(&self, query: &Query, tx: Option<&Transaction>) -> CollectionResult<Stored<T>> {
        let c = self.collection;
        run_in_transaction(c.store().as_ref(), tx, |tx| async move {
            let found = c.query().unique(query, Some(&tx)).await?;
            let mut handle = c.doc(found.id().clone());
            handle
                .delete(Some(&tx))
                .await?
                .ok_or_else(|| c.not_found(found.id()))
        })
        .await
    }

    /// Delete documents by id, atomically per chunk.
    pub async fn all(
        &self,
        ids: Vec<DocumentId>,
        tx: Option<&Transaction>,
    ) -> CollectionResult<Vec<Option<Stored<T>>>> {
        let items = ids.into_iter().map(|id| (id, ItemWrite::Delete)).collect();
        self.collection.write_chunked(items, tx).await
    }

    /// Delete previously read records, atomically per chunk.
    pub async fn all_items(
        &self,
        items: &[Stored<T>],
        tx: Option<&Transaction>,
    ) -> CollectionResult<Vec<Option<Stored<T>>>> {
        self.all(items.iter().map(|i| i.id().clone()).collect(), tx).await
    }

    /// Delete every match of `query`. The empty-query sentinel is refused.
    pub async fn query(&self, query: &Query, tx: Option<&Transaction>) -> CollectionResult<Vec<Stored<T>>> {
        if query.is_empty() {
            return Err(CollectionError::EmptyQueryDelete);
        }
        self.delete_matching(query, tx).await
    }

    /// First step of the whole-collection delete.
    pub fn yes(self) -> ConfirmYes<'c, T> {
        ConfirmYes {
            collection: self.collection,
        }
    }

    async fn delete_matching(&self, query: &Query, tx: Option<&Transaction>) -> CollectionResult<Vec<Stored<T>>> {
        let c = self.collection;
        let found = c.query().run(query, tx).await?;
        let limit = c.chunk_size();

        if let Some(tx) = tx {
            if found.len() > limit {
                return Err(CollectionError::TransactionLimitExceeded {
                    limit,
                    requested: found.len(),
                });
            }
            c.pipeline().run_delete(&found, Some(tx)).await?;
            for item in &found {
                tx.delete(&c.doc_ref(item.id()))?;
            }
            for item in &found {
                c.after_write(deleted(item), WriteAction::Delete, Some(tx)).await;
            }
            return Ok(found);
        }

        let mut removed = Vec::with_capacity(found.len());
        for chunk in found.chunks(limit) {
            c.pipeline().run_delete(chunk, None).await?;
            let mut batch = c.store().batch();
            for item in chunk {
                batch.write(WriteOp::Delete {
                    doc: c.doc_ref(item.id()),
                });
            }
            batch.commit().await?;
            debug!(collection = %c.name(), deleted = chunk.len(), "deleted chunk");
            for item in chunk {
                c.after_write(deleted(item), WriteAction::Delete, None).await;
            }
            removed.extend_from_slice(chunk);
        }
        Ok(removed)
    }
}

fn deleted<T: Record>(item: &Stored<T>) -> WriteChange<T> {
    WriteChange {
        before: Some(item.clone()),
        updated: None,
        deleted: Some(item.clone()),
    }
}

/// `delete().yes()`
pub struct ConfirmYes<'c, T: Record> {
    collection: &'c Collection<T>,
}

impl<'c, T: Record> ConfirmYes<'c, T> {
    pub fn i_am(self) -> ConfirmIAm<'c, T> {
        ConfirmIAm {
            collection: self.collection,
        }
    }
}

/// `delete().yes().i_am()`
pub struct ConfirmIAm<'c, T: Record> {
    collection: &'c Collection<T>,
}

impl<'c, T: Record> ConfirmIAm<'c, T> {
    pub fn sure(self) -> ConfirmSure<'c, T> {
        ConfirmSure {
            collection: self.collection,
        }
    }
}

/// `delete().yes().i_am().sure()`
pub struct ConfirmSure<'c, T: Record> {
    collection: &'c Collection<T>,
}

impl<'c, T: Record> ConfirmSure<'c, T> {
    /// Delete every document of the collection, chunk by chunk.
    ///
    /// Returns the number of documents removed.
    pub async fn delete_whole_collection(self) -> CollectionResult<usize> {
        let c = self.collection;
        info!(collection = %c.name(), "deleting whole collection");
        let removed = DeleteOps::new(c).delete_matching(&Query::all(), None).await?;
        info!(collection = %c.name(), removed = removed.len(), "collection emptied");
        Ok(removed.len())
    }
}
