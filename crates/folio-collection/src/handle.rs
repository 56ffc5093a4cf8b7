use folio_store::DocRef;
use folio_types::{DocumentId, Draft, Patch, Record, Stored};
use tracing::debug;

use crate::collection::Collection;
use crate::error::{CollectionError, CollectionResult};
use crate::hooks::{WriteAction, WriteChange};
use crate::transaction::Transaction;

/// A disposable reference to exactly one document.
///
/// The handle remembers the last snapshot it read outside a transaction and
/// serves [`get`](Self::get) from it. Keep a handle to one logical operation;
/// sharing it lets that snapshot go stale.
///
/// Every operation takes an optional [`Transaction`]. Without one, writes
/// hit the store directly and post-write hooks run before the call returns;
/// with one, writes are queued on the transaction and post-write hooks wait
/// for its commit.
pub struct DocumentHandle<'c, T: Record> {
    collection: &'c Collection<T>,
    id: DocumentId,
    snapshot: Option<Option<Stored<T>>>,
}

impl<'c, T: Record> DocumentHandle<'c, T> {
    pub(crate) fn new(collection: &'c Collection<T>, id: DocumentId) -> Self {
        Self {
            collection,
            id,
            snapshot: None,
        }
    }

    pub fn id(&self) -> &DocumentId {
        &self.id
    }

    pub fn doc_ref(&self) -> DocRef {
        self.collection.doc_ref(&self.id)
    }

    /// Read the document, reusing this handle's snapshot when no
    /// transaction is given.
    pub async fn get(&mut self, tx: Option<&Transaction>) -> CollectionResult<Option<Stored<T>>> {
        if tx.is_none() {
            if let Some(snapshot) = &self.snapshot {
                return Ok(snapshot.clone());
            }
        }
        self.read(tx).await
    }

    /// Create the document. Fails if it already exists.
    pub async fn create(&mut self, draft: Draft<T>, tx: Option<&Transaction>) -> CollectionResult<Stored<T>> {
        self.check_draft_id(&draft)?;
        let c = self.collection;
        let doc = self.doc_ref();
        if let Some(tx) = tx {
            if tx.get(&doc).await?.is_some() {
                return Err(CollectionError::AlreadyExists {
                    collection: c.name().to_string(),
                    id: self.id.clone(),
                });
            }
        }

        let stored = c.prepare_create(&self.id, draft, tx).await?;
        let fields = stored.to_fields()?;
        match tx {
            Some(tx) => tx.create(&doc, fields)?,
            None => c.store().create(&doc, fields).await?,
        }
        debug!(collection = %c.name(), id = %self.id, "document created");

        let change = WriteChange {
            before: None,
            updated: Some(stored.clone()),
            deleted: None,
        };
        c.after_write(change, WriteAction::Create, tx).await;
        self.remember(tx, Some(stored.clone()));
        Ok(stored)
    }

    /// Create or overwrite the document.
    ///
    /// Refused with [`CollectionError::EntityOutdated`] when the stored
    /// `updatedAt` is newer than the draft's.
    pub async fn set(&mut self, draft: Draft<T>, tx: Option<&Transaction>) -> CollectionResult<Stored<T>> {
        self.check_draft_id(&draft)?;
        let Some(existing) = self.read(tx).await? else {
            return self.create(draft, tx).await;
        };

        let c = self.collection;
        let doc = self.doc_ref();
        let stored = c.prepare_set(&self.id, draft, &existing, tx).await?;
        let fields = stored.to_fields()?;
        match tx {
            Some(tx) => tx.set(&doc, fields)?,
            None => c.store().set(&doc, fields).await?,
        }
        debug!(collection = %c.name(), id = %self.id, "document set");

        let change = WriteChange {
            before: Some(existing),
            updated: Some(stored.clone()),
            deleted: None,
        };
        c.after_write(change, WriteAction::Set, tx).await;
        self.remember(tx, Some(stored.clone()));
        Ok(stored)
    }

    /// Apply a partial update and return the merged record.
    ///
    /// Fields marked absent in the patch are deleted.
    pub async fn update(&mut self, patch: Patch, tx: Option<&Transaction>) -> CollectionResult<Stored<T>> {
        let c = self.collection;
        let existing = self.read(tx).await?.ok_or_else(|| c.not_found(&self.id))?;
        let doc = self.doc_ref();
        let (ops, merged) = c.prepare_update(&self.id, patch, &existing).await?;

        let updated = match tx {
            Some(tx) => {
                tx.update(&doc, ops)?;
                merged
            }
            None => {
                c.store().update(&doc, &ops).await?;
                let found = c.store().get(&doc).await?.ok_or_else(|| c.not_found(&self.id))?;
                c.decode(found)?
            }
        };
        debug!(collection = %c.name(), id = %self.id, "document updated");

        let change = WriteChange {
            before: Some(existing),
            updated: Some(updated.clone()),
            deleted: None,
        };
        c.after_write(change, WriteAction::Update, tx).await;
        self.remember(tx, Some(updated.clone()));
        Ok(updated)
    }

    /// Delete the document, returning what was removed.
    ///
    /// A missing document is a no-op returning `None`.
    pub async fn delete(&mut self, tx: Option<&Transaction>) -> CollectionResult<Option<Stored<T>>> {
        let Some(existing) = self.read(tx).await? else {
            return Ok(None);
        };
        let c = self.collection;
        let doc = self.doc_ref();
        c.pipeline()
            .run_delete(std::slice::from_ref(&existing), tx)
            .await?;
        match tx {
            Some(tx) => tx.delete(&doc)?,
            None => {
                c.store().delete(&doc).await?;
            }
        }
        self.snapshot = None;
        debug!(collection = %c.name(), id = %self.id, "document deleted");

        let change = WriteChange {
            before: Some(existing.clone()),
            updated: None,
            deleted: Some(existing.clone()),
        };
        c.after_write(change, WriteAction::Delete, tx).await;
        Ok(Some(existing))
    }

    /// Fresh read, through the transaction if given.
    async fn read(&mut self, tx: Option<&Transaction>) -> CollectionResult<Option<Stored<T>>> {
        let c = self.collection;
        let doc = self.doc_ref();
        let found = match tx {
            Some(tx) => tx.get(&doc).await?,
            None => c.store().get(&doc).await?,
        };
        let record = found.map(|d| c.decode(d)).transpose()?;
        self.remember(tx, record.clone());
        Ok(record)
    }

    /// Keep a snapshot only for state that is already durable.
    fn remember(&mut self, tx: Option<&Transaction>, record: Option<Stored<T>>) {
        self.snapshot = match tx {
            None => Some(record),
            Some(_) => None,
        };
    }

    fn check_draft_id(&self, draft: &Draft<T>) -> CollectionResult<()> {
        match &draft.id {
            Some(id) if *id != self.id => Err(CollectionError::IdMismatch {
                expected: self.id.clone(),
                composed: id.clone(),
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use folio_store::{DocumentStore, InMemoryStore};
    use folio_types::{FieldOp, FieldPath};
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use crate::config::CollectionDeclaration;
    use crate::error::HookError;
    use crate::hooks::CollectionHooks;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Counter {
        qty: i64,
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<WriteAction>>,
    }

    impl Recorder {
        fn seen(&self) -> Vec<WriteAction> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CollectionHooks<Counter> for Recorder {
        async fn post_write_processing(&self, _change: WriteChange<Counter>, action: WriteAction) -> Result<(), HookError> {
            self.seen.lock().unwrap().push(action);
            Ok(())
        }
    }

    fn setup() -> (Arc<InMemoryStore>, Arc<Recorder>, Collection<Counter>) {
        let store = Arc::new(InMemoryStore::new());
        let hooks = Arc::new(Recorder::default());
        let decl = CollectionDeclaration::new("counters", &["v1"]);
        let collection = Collection::new(decl, store.clone(), hooks.clone()).unwrap();
        (store, hooks, collection)
    }

    fn id(raw: &str) -> DocumentId {
        DocumentId::parse(raw).unwrap()
    }

    fn counter(qty: i64) -> Draft<Counter> {
        Draft::new(Counter { qty })
    }

    fn set_qty(qty: i64) -> Vec<FieldOp> {
        vec![FieldOp::Set(FieldPath::top("qty"), json!(qty))]
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn plain_get_is_served_from_snapshot() {
        let (store, _hooks, col) = setup();
        let mut handle = col.doc(id("h"));
        handle.create(counter(1), None).await.unwrap();

        // Written behind the handle's back.
        store.update(&handle.doc_ref(), &set_qty(5)).await.unwrap();

        let cached = handle.get(None).await.unwrap().unwrap();
        assert_eq!(cached.data.qty, 1);
        let fresh = col.doc(id("h")).get(None).await.unwrap().unwrap();
        assert_eq!(fresh.data.qty, 5);
    }

    #[tokio::test]
    async fn transactional_get_bypasses_snapshot() {
        let (store, _hooks, col) = setup();
        let mut handle = col.doc(id("h"));
        handle.create(counter(1), None).await.unwrap();
        store.update(&handle.doc_ref(), &set_qty(5)).await.unwrap();

        let tx = Transaction::begin(store.as_ref()).await.unwrap();
        let seen = handle.get(Some(&tx)).await.unwrap().unwrap();
        assert_eq!(seen.data.qty, 5);
        tx.abort().await;

        // The transactional read dropped the stale snapshot.
        assert!(handle.snapshot.is_none());
        assert_eq!(handle.get(None).await.unwrap().unwrap().data.qty, 5);
    }

    #[tokio::test]
    async fn delete_clears_snapshot() {
        let (store, _hooks, col) = setup();
        let mut handle = col.doc(id("h"));
        handle.create(counter(1), None).await.unwrap();
        assert!(handle.get(None).await.unwrap().is_some());

        let removed = handle.delete(None).await.unwrap();
        assert_eq!(removed.map(|r| r.data.qty), Some(1));
        assert!(handle.snapshot.is_none());

        // Recreated elsewhere; the handle reads it instead of a cached miss.
        col.doc(id("h")).create(counter(7), None).await.unwrap();
        assert_eq!(handle.get(None).await.unwrap().unwrap().data.qty, 7);
        assert_eq!(store.len("counters"), 1);
    }

    #[tokio::test]
    async fn uncommitted_writes_are_not_remembered() {
        let (store, hooks, col) = setup();
        let mut handle = col.doc(id("h"));
        let tx = Transaction::begin(store.as_ref()).await.unwrap();
        handle.create(counter(1), Some(&tx)).await.unwrap();
        assert!(handle.snapshot.is_none());
        assert!(handle.get(None).await.unwrap().is_none());
        assert!(hooks.seen().is_empty());

        tx.commit().await.unwrap();
        assert_eq!(hooks.seen(), vec![WriteAction::Create]);
        // The earlier miss was durable state and stays cached.
        assert!(handle.get(None).await.unwrap().is_none());
        assert!(col.doc(id("h")).get(None).await.unwrap().is_some());
    }

    // -----------------------------------------------------------------------
    // Writes without a transaction
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn plain_writes_run_hooks_before_returning() {
        let (store, hooks, col) = setup();
        let mut handle = col.doc(id("h"));

        let created = handle.create(counter(1), None).await.unwrap();
        assert_eq!(hooks.seen(), vec![WriteAction::Create]);
        assert_eq!(handle.get(None).await.unwrap(), Some(created.clone()));

        let mut draft = Draft::from(created);
        draft.data.qty = 2;
        let replaced = handle.set(draft, None).await.unwrap();
        assert_eq!(replaced.data.qty, 2);
        assert_eq!(hooks.seen().last(), Some(&WriteAction::Set));

        let updated = handle
            .update(Patch::new().set("qty", 3), None)
            .await
            .unwrap();
        assert_eq!(updated.data.qty, 3);
        assert_eq!(hooks.seen().last(), Some(&WriteAction::Update));
        assert_eq!(handle.get(None).await.unwrap().map(|r| r.data.qty), Some(3));

        handle.delete(None).await.unwrap();
        assert_eq!(
            hooks.seen(),
            vec![WriteAction::Create, WriteAction::Set, WriteAction::Update, WriteAction::Delete]
        );
        assert!(store.is_empty("counters"));
        assert!(handle.delete(None).await.unwrap().is_none());
        assert_eq!(hooks.seen().len(), 4);
    }

    #[tokio::test]
    async fn plain_create_refuses_existing_document() {
        let (_store, hooks, col) = setup();
        col.doc(id("h")).create(counter(1), None).await.unwrap();

        let err = col.doc(id("h")).create(counter(2), None).await.unwrap_err();
        assert!(matches!(err, CollectionError::AlreadyExists { .. }));
        assert_eq!(hooks.seen(), vec![WriteAction::Create]);
    }

    #[tokio::test]
    async fn draft_id_must_match_handle() {
        let (store, _hooks, col) = setup();
        let err = col
            .doc(id("h"))
            .create(counter(1).with_id(id("other")), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CollectionError::IdMismatch { .. }));
        assert!(store.is_empty("counters"));
    }
}
