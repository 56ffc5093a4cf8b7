use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use folio_types::{apply_ops, DocumentId, FieldOp, Fields};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::query::StoreQuery;
use crate::traits::{
    BulkWriter, DocRef, DocumentStore, StoreTransaction, StoredDocument, WriteBatch, WriteOp,
    DEFAULT_MAX_TRANSACTION_DOCUMENTS,
};

/// Pending writes a bulk writer accumulates before pushing them.
const BULK_FLUSH_THRESHOLD: usize = 20;

/// A stored body plus the version stamped by its last write.
#[derive(Clone, Debug)]
struct Entry {
    fields: Fields,
    version: u64,
}

#[derive(Debug, Default)]
struct State {
    collections: HashMap<String, BTreeMap<DocumentId, Entry>>,
    next_version: u64,
}

impl State {
    fn entry(&self, doc: &DocRef) -> Option<&Entry> {
        self.collections.get(&doc.collection)?.get(&doc.id)
    }

    fn version_of(&self, doc: &DocRef) -> Option<u64> {
        self.entry(doc).map(|e| e.version)
    }

    fn read(&self, doc: &DocRef) -> Option<StoredDocument> {
        self.entry(doc).map(|e| StoredDocument {
            id: doc.id.clone(),
            fields: e.fields.clone(),
        })
    }

    fn run_query(&self, query: &StoreQuery) -> Vec<StoredDocument> {
        let Some(docs) = self.collections.get(&query.collection) else {
            return Vec::new();
        };
        // BTreeMap iteration gives id order; the stable sort keeps it as the
        // tie-breaker.
        let mut matched: Vec<StoredDocument> = docs
            .iter()
            .filter(|(_, entry)| query.matches(&entry.fields))
            .map(|(id, entry)| StoredDocument {
                id: id.clone(),
                fields: entry.fields.clone(),
            })
            .collect();
        matched.sort_by(|a, b| query.compare(&a.fields, &b.fields));
        let window = matched.into_iter().skip(query.offset);
        match query.limit {
            Some(limit) => window.take(limit).collect(),
            None => window.collect(),
        }
    }

    /// Apply writes all-or-nothing.
    ///
    /// Writes are staged on a working set first; the live state is only
    /// touched once every write has been validated.
    fn apply_atomic(&mut self, ops: &[WriteOp]) -> StoreResult<()> {
        let mut working: HashMap<&DocRef, Option<Fields>> = HashMap::new();
        let mut order: Vec<&DocRef> = Vec::new();

        for op in ops {
            let doc = op.doc();
            let slot = working.entry(doc).or_insert_with(|| {
                order.push(doc);
                self.entry(doc).map(|e| e.fields.clone())
            });
            match op {
                WriteOp::Create { fields, .. } => {
                    if slot.is_some() {
                        return Err(StoreError::AlreadyExists {
                            collection: doc.collection.clone(),
                            id: doc.id.clone(),
                        });
                    }
                    *slot = Some(fields.clone());
                }
                WriteOp::Set { fields, .. } => *slot = Some(fields.clone()),
                WriteOp::Update { ops, .. } => match slot {
                    Some(fields) => apply_ops(fields, ops),
                    None => {
                        return Err(StoreError::NotFound {
                            collection: doc.collection.clone(),
                            id: doc.id.clone(),
                        })
                    }
                },
                WriteOp::Delete { .. } => *slot = None,
            }
        }

        for doc in order {
            let staged = working.remove(doc).flatten();
            match staged {
                Some(fields) => {
                    self.next_version += 1;
                    let version = self.next_version;
                    self.collections
                        .entry(doc.collection.clone())
                        .or_default()
                        .insert(doc.id.clone(), Entry { fields, version });
                }
                None => {
                    if let Some(docs) = self.collections.get_mut(&doc.collection) {
                        docs.remove(&doc.id);
                    }
                }
            }
        }
        Ok(())
    }
}

fn check_limit(touched: usize, limit: usize) -> StoreResult<()> {
    if touched > limit {
        return Err(StoreError::TransactionTooLarge { limit, touched });
    }
    Ok(())
}

/// In-memory, `HashMap`-based document store.
///
/// Intended for tests and embedding. Every document carries an internal
/// version bumped on each write; transactions record the versions they read
/// and refuse to commit if any of them moved, which is how concurrent
/// writers to the same document are detected.
#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    max_transaction_documents: usize,
}

impl InMemoryStore {
    /// Create an empty store with the default transaction limit.
    pub fn new() -> Self {
        Self::with_transaction_limit(DEFAULT_MAX_TRANSACTION_DOCUMENTS)
    }

    /// Create an empty store with a custom per-transaction document limit.
    pub fn with_transaction_limit(limit: usize) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            max_transaction_documents: limit,
        }
    }

    /// Number of documents in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        let state = self.state.read().expect("lock poisoned");
        state.collections.get(collection).map_or(0, BTreeMap::len)
    }

    /// Returns `true` if `collection` holds no documents.
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Sorted names of collections holding at least one document.
    pub fn collections(&self) -> Vec<String> {
        let state = self.state.read().expect("lock poisoned");
        let mut names: Vec<String> = state
            .collections
            .iter()
            .filter(|(_, docs)| !docs.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Remove every document.
    pub fn clear(&self) {
        self.state.write().expect("lock poisoned").collections.clear();
    }

    fn apply(&self, op: WriteOp) -> StoreResult<()> {
        let mut state = self.state.write().expect("lock poisoned");
        state.apply_atomic(std::slice::from_ref(&op))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().expect("lock poisoned");
        let documents: usize = state.collections.values().map(BTreeMap::len).sum();
        f.debug_struct("InMemoryStore")
            .field("collections", &state.collections.len())
            .field("documents", &documents)
            .field("max_transaction_documents", &self.max_transaction_documents)
            .finish()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get(&self, doc: &DocRef) -> StoreResult<Option<StoredDocument>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state.read(doc))
    }

    async fn create(&self, doc: &DocRef, fields: Fields) -> StoreResult<()> {
        self.apply(WriteOp::Create {
            doc: doc.clone(),
            fields,
        })
    }

    async fn set(&self, doc: &DocRef, fields: Fields) -> StoreResult<()> {
        self.apply(WriteOp::Set {
            doc: doc.clone(),
            fields,
        })
    }

    async fn update(&self, doc: &DocRef, ops: &[FieldOp]) -> StoreResult<()> {
        self.apply(WriteOp::Update {
            doc: doc.clone(),
            ops: ops.to_vec(),
        })
    }

    async fn delete(&self, doc: &DocRef) -> StoreResult<bool> {
        let mut state = self.state.write().expect("lock poisoned");
        let existed = state.entry(doc).is_some();
        state.apply_atomic(&[WriteOp::Delete { doc: doc.clone() }])?;
        Ok(existed)
    }

    async fn query(&self, query: &StoreQuery) -> StoreResult<Vec<StoredDocument>> {
        let state = self.state.read().expect("lock poisoned");
        Ok(state.run_query(query))
    }

    async fn begin_transaction(&self) -> StoreResult<Box<dyn StoreTransaction>> {
        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            reads: HashMap::new(),
            writes: Vec::new(),
            limit: self.max_transaction_documents,
        }))
    }

    fn batch(&self) -> Box<dyn WriteBatch> {
        Box::new(MemoryBatch {
            state: Arc::clone(&self.state),
            writes: Vec::new(),
            limit: self.max_transaction_documents,
        })
    }

    fn bulk_writer(&self) -> Box<dyn BulkWriter> {
        Box::new(MemoryBulkWriter {
            state: Arc::clone(&self.state),
            pending: Vec::new(),
            outcomes: Vec::new(),
        })
    }

    fn max_transaction_documents(&self) -> usize {
        self.max_transaction_documents
    }
}

/// Optimistic transaction over an [`InMemoryStore`].
struct MemoryTransaction {
    state: Arc<RwLock<State>>,
    /// Version seen at first read; `None` records an observed absence.
    reads: HashMap<DocRef, Option<u64>>,
    writes: Vec<WriteOp>,
    limit: usize,
}

impl MemoryTransaction {
    fn ensure_read_phase(&self) -> StoreResult<()> {
        if self.writes.is_empty() {
            Ok(())
        } else {
            Err(StoreError::ReadAfterWrite)
        }
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn get(&mut self, doc: &DocRef) -> StoreResult<Option<StoredDocument>> {
        self.ensure_read_phase()?;
        let state = self.state.read().expect("lock poisoned");
        self.reads.entry(doc.clone()).or_insert_with(|| state.version_of(doc));
        Ok(state.read(doc))
    }

    async fn query(&mut self, query: &StoreQuery) -> StoreResult<Vec<StoredDocument>> {
        self.ensure_read_phase()?;
        let state = self.state.read().expect("lock poisoned");
        let found = state.run_query(query);
        for doc in &found {
            let doc_ref = DocRef::new(query.collection.clone(), doc.id.clone());
            let version = state.version_of(&doc_ref);
            self.reads.entry(doc_ref).or_insert(version);
        }
        Ok(found)
    }

    fn write(&mut self, op: WriteOp) -> StoreResult<()> {
        self.writes.push(op);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut state = self.state.write().expect("lock poisoned");

        for (doc, seen) in &self.reads {
            if state.version_of(doc) != *seen {
                return Err(StoreError::Conflict {
                    collection: doc.collection.clone(),
                    id: doc.id.clone(),
                });
            }
        }

        let touched: HashSet<&DocRef> = self
            .reads
            .keys()
            .chain(self.writes.iter().map(WriteOp::doc))
            .collect();
        check_limit(touched.len(), self.limit)?;

        state.apply_atomic(&self.writes)?;
        debug!(
            reads = self.reads.len(),
            writes = self.writes.len(),
            "memory transaction committed"
        );
        Ok(())
    }

    async fn rollback(self: Box<Self>) {
        debug!(discarded = self.writes.len(), "memory transaction rolled back");
    }
}

/// Atomic write batch over an [`InMemoryStore`].
struct MemoryBatch {
    state: Arc<RwLock<State>>,
    writes: Vec<WriteOp>,
    limit: usize,
}

#[async_trait]
impl WriteBatch for MemoryBatch {
    fn write(&mut self, op: WriteOp) {
        self.writes.push(op);
    }

    fn len(&self) -> usize {
        self.writes.len()
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let touched: HashSet<&DocRef> = self.writes.iter().map(WriteOp::doc).collect();
        check_limit(touched.len(), self.limit)?;
        let mut state = self.state.write().expect("lock poisoned");
        state.apply_atomic(&self.writes)
    }
}

/// Non-atomic bulk writer over an [`InMemoryStore`].
struct MemoryBulkWriter {
    state: Arc<RwLock<State>>,
    pending: Vec<WriteOp>,
    outcomes: Vec<StoreResult<()>>,
}

#[async_trait]
impl BulkWriter for MemoryBulkWriter {
    async fn write(&mut self, op: WriteOp) {
        self.pending.push(op);
        if self.pending.len() >= BULK_FLUSH_THRESHOLD {
            self.flush().await;
        }
    }

    async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let mut state = self.state.write().expect("lock poisoned");
        for op in self.pending.drain(..) {
            self.outcomes.push(state.apply_atomic(std::slice::from_ref(&op)));
        }
    }

    async fn close(mut self: Box<Self>) -> Vec<StoreResult<()>> {
        self.flush().await;
        std::mem::take(&mut self.outcomes)
    }
}
