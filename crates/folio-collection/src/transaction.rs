//! The transaction wrapper.
//!
//! The backing store requires every read of a transaction to precede its
//! first write, but collection code interleaves them freely (read a prior,
//! write it, read the next one). [`Transaction`] bridges the two: its write
//! methods only append to a private queue, reads go straight to the store
//! transaction, and the queue is replayed in issue order right before the
//! store commit. Callbacks registered with [`Transaction::on_commit`] run
//! after a successful commit and never after a failed one.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use folio_store::{DocRef, DocumentStore, StoreQuery, StoreTransaction, StoredDocument, WriteOp};
use folio_types::{FieldOp, Fields};
use tracing::{debug, warn};

use crate::error::{CollectionError, CollectionResult, HookError};

type PostCommit = Pin<Box<dyn Future<Output = Result<(), HookError>> + Send>>;

/// Lifecycle of a [`Transaction`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Reading,
    BufferingWrites,
    Committing,
    Committed,
    Aborted,
}

impl TransactionState {
    fn is_open(self) -> bool {
        matches!(self, Self::Idle | Self::Reading | Self::BufferingWrites)
    }

    fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Reading => "reading",
            Self::BufferingWrites => "buffering writes",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        }
    }
}

/// Queue lengths captured by [`Transaction::savepoint`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Savepoint {
    writes: usize,
    callbacks: usize,
}

struct Inner {
    store_tx: tokio::sync::Mutex<Option<Box<dyn StoreTransaction>>>,
    writes: Mutex<Vec<WriteOp>>,
    callbacks: Mutex<Vec<PostCommit>>,
    state: Mutex<TransactionState>,
}

/// A logical transaction shared by every operation running inside it.
///
/// Cloning is cheap and yields a handle to the same transaction.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<Inner>,
}

impl Transaction {
    /// Open a transaction on `store`.
    pub async fn begin(store: &dyn DocumentStore) -> CollectionResult<Self> {
        let store_tx = store.begin_transaction().await?;
        Ok(Self {
            inner: Arc::new(Inner {
                store_tx: tokio::sync::Mutex::new(Some(store_tx)),
                writes: Mutex::new(Vec::new()),
                callbacks: Mutex::new(Vec::new()),
                state: Mutex::new(TransactionState::Idle),
            }),
        })
    }

    pub fn state(&self) -> TransactionState {
        *self.inner.state.lock().expect("lock poisoned")
    }

    /// Number of writes queued for replay.
    pub fn pending_writes(&self) -> usize {
        self.inner.writes.lock().expect("lock poisoned").len()
    }

    /// Read one document through the store transaction.
    pub async fn get(&self, doc: &DocRef) -> CollectionResult<Option<StoredDocument>> {
        self.enter_read()?;
        let mut guard = self.inner.store_tx.lock().await;
        let tx = guard.as_mut().ok_or(CollectionError::TransactionClosed("finished"))?;
        Ok(tx.get(doc).await?)
    }

    /// Run a query through the store transaction.
    pub async fn query(&self, query: &StoreQuery) -> CollectionResult<Vec<StoredDocument>> {
        self.enter_read()?;
        let mut guard = self.inner.store_tx.lock().await;
        let tx = guard.as_mut().ok_or(CollectionError::TransactionClosed("finished"))?;
        Ok(tx.query(query).await?)
    }

    pub fn create(&self, doc: &DocRef, fields: Fields) -> CollectionResult<()> {
        self.enqueue(WriteOp::Create {
            doc: doc.clone(),
            fields,
        })
    }

    pub fn set(&self, doc: &DocRef, fields: Fields) -> CollectionResult<()> {
        self.enqueue(WriteOp::Set {
            doc: doc.clone(),
            fields,
        })
    }

    pub fn update(&self, doc: &DocRef, ops: Vec<FieldOp>) -> CollectionResult<()> {
        self.enqueue(WriteOp::Update {
            doc: doc.clone(),
            ops,
        })
    }

    pub fn delete(&self, doc: &DocRef) -> CollectionResult<()> {
        self.enqueue(WriteOp::Delete { doc: doc.clone() })
    }

    /// Register a side effect to run once after a successful commit.
    ///
    /// Callbacks run sequentially in registration order. Their failures are
    /// logged and never undo the commit.
    pub fn on_commit<F>(&self, callback: F)
    where
        F: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        self.inner
            .callbacks
            .lock()
            .expect("lock poisoned")
            .push(Box::pin(callback));
    }

    /// Mark the current ends of the write and callback queues.
    pub(crate) fn savepoint(&self) -> Savepoint {
        Savepoint {
            writes: self.inner.writes.lock().expect("lock poisoned").len(),
            callbacks: self.inner.callbacks.lock().expect("lock poisoned").len(),
        }
    }

    /// Drop every write and callback queued after `savepoint`.
    pub(crate) fn rollback_to(&self, savepoint: Savepoint) {
        let mut writes = self.inner.writes.lock().expect("lock poisoned");
        let mut callbacks = self.inner.callbacks.lock().expect("lock poisoned");
        let dropped = writes.len().saturating_sub(savepoint.writes);
        writes.truncate(savepoint.writes);
        callbacks.truncate(savepoint.callbacks);
        debug!(dropped, "rolled transaction back to savepoint");
    }

    /// Replay the queued writes, commit, then run post-commit callbacks.
    pub async fn commit(&self) -> CollectionResult<()> {
        let mut store_tx = self.take_for_finish()?;
        self.set_state(TransactionState::Committing);

        let writes = std::mem::take(&mut *self.inner.writes.lock().expect("lock poisoned"));
        let replayed = writes.len();
        for op in writes {
            debug!(kind = op.kind(), doc = %op.doc(), "replaying transaction write");
            if let Err(err) = store_tx.write(op) {
                store_tx.rollback().await;
                self.finish_aborted();
                return Err(err.into());
            }
        }

        if let Err(err) = store_tx.commit().await {
            self.finish_aborted();
            return Err(err.into());
        }
        self.set_state(TransactionState::Committed);

        let callbacks = std::mem::take(&mut *self.inner.callbacks.lock().expect("lock poisoned"));
        debug!(writes = replayed, callbacks = callbacks.len(), "transaction committed");
        for callback in callbacks {
            if let Err(err) = callback.await {
                warn!(error = %err, "post-commit side effect failed");
            }
        }
        Ok(())
    }

    /// Discard queued writes and callbacks and roll the store transaction back.
    pub async fn abort(&self) {
        let Ok(store_tx) = self.take_for_finish() else {
            return;
        };
        store_tx.rollback().await;
        self.finish_aborted();
    }

    fn enter_read(&self) -> CollectionResult<()> {
        let mut state = self.inner.state.lock().expect("lock poisoned");
        if !state.is_open() {
            return Err(CollectionError::TransactionClosed(state.label()));
        }
        if *state == TransactionState::Idle {
            *state = TransactionState::Reading;
        }
        Ok(())
    }

    fn enqueue(&self, op: WriteOp) -> CollectionResult<()> {
        let mut state = self.inner.state.lock().expect("lock poisoned");
        if !state.is_open() {
            return Err(CollectionError::TransactionClosed(state.label()));
        }
        *state = TransactionState::BufferingWrites;
        self.inner.writes.lock().expect("lock poisoned").push(op);
        Ok(())
    }

    fn take_for_finish(&self) -> CollectionResult<Box<dyn StoreTransaction>> {
        let state = self.state();
        if !state.is_open() {
            return Err(CollectionError::TransactionClosed(state.label()));
        }
        // Nothing else holds the async lock once the transaction body returned.
        self.inner
            .store_tx
            .try_lock()
            .ok()
            .and_then(|mut guard| guard.take())
            .ok_or(CollectionError::TransactionClosed("busy"))
    }

    fn finish_aborted(&self) {
        self.inner.writes.lock().expect("lock poisoned").clear();
        let dropped = std::mem::take(&mut *self.inner.callbacks.lock().expect("lock poisoned"));
        if !dropped.is_empty() {
            debug!(callbacks = dropped.len(), "dropping post-commit callbacks of aborted transaction");
        }
        self.set_state(TransactionState::Aborted);
    }

    fn set_state(&self, next: TransactionState) {
        *self.inner.state.lock().expect("lock poisoned") = next;
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.state())
            .field("pending_writes", &self.pending_writes())
            .finish()
    }
}

/// Run `body` inside a transaction.
///
/// When `outer` is given the body joins it and nothing is committed here;
/// the owner of `outer` commits. Otherwise a transaction is opened, committed
/// if the body succeeds and aborted if it fails.
pub async fn run_in_transaction<R, F, Fut>(
    store: &dyn DocumentStore,
    outer: Option<&Transaction>,
    body: F,
) -> CollectionResult<R>
where
    F: FnOnce(Transaction) -> Fut,
    Fut: Future<Output = CollectionResult<R>>,
{
    if let Some(outer) = outer {
        return body(outer.clone()).await;
    }
    let tx = Transaction::begin(store).await?;
    match body(tx.clone()).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            tx.abort().await;
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_store::InMemoryStore;
    use folio_types::DocumentId;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn doc(id: &str) -> DocRef {
        DocRef::new("items", DocumentId::parse(id).unwrap())
    }

    fn body(n: i64) -> Fields {
        json!({ "n": n }).as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn reads_after_buffered_writes_are_allowed() {
        let store = InMemoryStore::new();
        store.set(&doc("b"), body(2)).await.unwrap();

        let tx = Transaction::begin(&store).await.unwrap();
        tx.set(&doc("a"), body(1)).unwrap();
        assert_eq!(tx.state(), TransactionState::BufferingWrites);
        // The store transaction has seen no write yet.
        assert!(tx.get(&doc("b")).await.unwrap().is_some());
        assert!(tx.get(&doc("a")).await.unwrap().is_none());
        tx.commit().await.unwrap();

        assert_eq!(tx.state(), TransactionState::Committed);
        assert!(store.get(&doc("a")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn writes_replay_in_issue_order() {
        let store = InMemoryStore::new();
        let tx = Transaction::begin(&store).await.unwrap();
        tx.set(&doc("a"), body(1)).unwrap();
        tx.update(&doc("a"), vec![FieldOp::Set(folio_types::FieldPath::top("n"), json!(5))])
            .unwrap();
        assert_eq!(tx.pending_writes(), 2);
        tx.commit().await.unwrap();
        let found = store.get(&doc("a")).await.unwrap().unwrap();
        assert_eq!(found.fields["n"], json!(5));
    }

    #[tokio::test]
    async fn callbacks_run_once_after_commit() {
        let store = InMemoryStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let tx = Transaction::begin(&store).await.unwrap();
        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            tx.on_commit(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        tx.set(&doc("a"), body(1)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        tx.commit().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(tx.commit().await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_commit_runs_no_callbacks() {
        let store = InMemoryStore::new();
        store.set(&doc("a"), body(1)).await.unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let tx = Transaction::begin(&store).await.unwrap();
        tx.get(&doc("a")).await.unwrap();
        let counter = Arc::clone(&calls);
        tx.on_commit(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        tx.set(&doc("a"), body(2)).unwrap();
        // A concurrent writer invalidates the read.
        store.set(&doc("a"), body(3)).await.unwrap();

        let err = tx.commit().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(tx.state(), TransactionState::Aborted);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.get(&doc("a")).await.unwrap().unwrap().fields["n"], json!(3));
    }

    #[tokio::test]
    async fn rollback_to_savepoint_drops_later_work() {
        let store = InMemoryStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let tx = Transaction::begin(&store).await.unwrap();
        tx.set(&doc("a"), body(1)).unwrap();

        let savepoint = tx.savepoint();
        tx.set(&doc("b"), body(2)).unwrap();
        let counter = Arc::clone(&calls);
        tx.on_commit(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        tx.rollback_to(savepoint);
        assert_eq!(tx.pending_writes(), 1);

        tx.commit().await.unwrap();
        assert!(store.get(&doc("a")).await.unwrap().is_some());
        assert!(store.get(&doc("b")).await.unwrap().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn closed_transaction_refuses_work() {
        let store = InMemoryStore::new();
        let tx = Transaction::begin(&store).await.unwrap();
        tx.abort().await;
        assert_eq!(tx.state(), TransactionState::Aborted);
        assert!(matches!(
            tx.set(&doc("a"), body(1)),
            Err(CollectionError::TransactionClosed("aborted"))
        ));
        assert!(tx.get(&doc("a")).await.is_err());
    }

    #[tokio::test]
    async fn run_in_transaction_commits_or_aborts() {
        let store = InMemoryStore::new();
        run_in_transaction(&store, None, |tx| async move { tx.set(&doc("a"), body(1)) })
            .await
            .unwrap();
        assert!(store.get(&doc("a")).await.unwrap().is_some());

        let result: CollectionResult<()> = run_in_transaction(&store, None, |tx| async move {
            tx.set(&doc("b"), body(1))?;
            Err(CollectionError::EmptyQueryDelete)
        })
        .await;
        assert!(result.is_err());
        assert!(store.get(&doc("b")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn run_in_transaction_reuses_outer() {
        let store = InMemoryStore::new();
        let outer = Transaction::begin(&store).await.unwrap();
        run_in_transaction(&store, Some(&outer), |tx| async move { tx.set(&doc("a"), body(1)) })
            .await
            .unwrap();
        // Joined, not committed.
        assert!(store.get(&doc("a")).await.unwrap().is_none());
        assert_eq!(outer.pending_writes(), 1);
        outer.commit().await.unwrap();
        assert!(store.get(&doc("a")).await.unwrap().is_some());
    }
}
