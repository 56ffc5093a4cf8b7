use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use folio_store::{DocRef, DocumentStore, StoredDocument};
use folio_types::envelope::{data_fields, timestamp_value, ENVELOPE_FIELDS, FIELD_UPDATED_AT};
use folio_types::{
    apply_ops, DocumentId, Draft, FieldOp, FieldPath, Fields, HybridLogicalClock, Meta, Patch, PatchValue,
    Record, Stored,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::ReadThroughCache;
use crate::config::{CollectionConfig, CollectionDeclaration};
use crate::delete::DeleteOps;
use crate::error::{CollectionError, CollectionResult};
use crate::handle::DocumentHandle;
use crate::hooks::{CollectionHooks, WriteAction, WriteChange};
use crate::multi::MultiOps;
use crate::pipeline::{HookPipeline, WriteInput};
use crate::query::Query;
use crate::transaction::{run_in_transaction, Transaction};

/// A typed collection bound to one backing-store container.
///
/// Construct once at startup and share by reference; the binding is
/// read-only afterwards. Operations are grouped in namespaces:
/// [`query`](Self::query), [`create`](Self::create), [`set`](Self::set),
/// [`update`](Self::update), [`delete`](Self::delete) and the non-atomic
/// [`multi`](Self::multi).
pub struct Collection<T: Record> {
    declaration: CollectionDeclaration,
    config: CollectionConfig,
    pipeline: HookPipeline<T>,
    store: Arc<dyn DocumentStore>,
    clock: Arc<HybridLogicalClock>,
}

impl<T: Record> Collection<T> {
    pub fn new(
        declaration: CollectionDeclaration,
        store: Arc<dyn DocumentStore>,
        hooks: Arc<dyn CollectionHooks<T>>,
    ) -> CollectionResult<Self> {
        declaration.validate()?;
        let pipeline = HookPipeline::new(&declaration, hooks)?;
        debug!(
            collection = %declaration.name,
            unique_keys = declaration.unique_keys.len(),
            version = declaration.current_version(),
            "collection bound"
        );
        Ok(Self {
            declaration,
            config: CollectionConfig::default(),
            pipeline,
            store,
            clock: Arc::new(HybridLogicalClock::new()),
        })
    }

    pub fn with_config(mut self, config: CollectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a clock with other collections, or inject one in tests.
    pub fn with_clock(mut self, clock: Arc<HybridLogicalClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.declaration.name
    }

    pub fn declaration(&self) -> &CollectionDeclaration {
        &self.declaration
    }

    pub fn current_version(&self) -> &str {
        self.declaration.current_version()
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Documents per chunk and per external transaction.
    pub fn chunk_size(&self) -> usize {
        self.config
            .max_transaction_documents
            .min(self.store.max_transaction_documents())
            .max(1)
    }

    /// A handle on one document.
    pub fn doc(&self, id: DocumentId) -> DocumentHandle<'_, T> {
        DocumentHandle::new(self, id)
    }

    /// The id a draft will be stored under.
    ///
    /// Composed from the unique keys when declared (and checked against the
    /// draft's own id), otherwise the draft's id or a fresh random one.
    pub fn resolve_id(&self, draft: &Draft<T>) -> CollectionResult<DocumentId> {
        let fields = data_fields(&draft.data)?;
        self.pipeline.identity().resolve(&fields, draft.id.as_ref())
    }

    /// Run `body` in a fresh transaction, committing on success.
    pub async fn transaction<R, F, Fut>(&self, body: F) -> CollectionResult<R>
    where
        F: FnOnce(Transaction) -> Fut,
        Fut: Future<Output = CollectionResult<R>>,
    {
        run_in_transaction(self.store.as_ref(), None, body).await
    }

    pub fn query(&self) -> QueryOps<'_, T> {
        QueryOps { collection: self }
    }

    pub fn create(&self) -> CreateOps<'_, T> {
        CreateOps { collection: self }
    }

    pub fn set(&self) -> SetOps<'_, T> {
        SetOps { collection: self }
    }

    pub fn update(&self) -> UpdateOps<'_, T> {
        UpdateOps { collection: self }
    }

    pub fn delete(&self) -> DeleteOps<'_, T> {
        DeleteOps::new(self)
    }

    /// Non-atomic bulk writes. Failures are collected, not fail-fast.
    pub fn multi(&self) -> MultiOps<'_, T> {
        MultiOps::new(self)
    }

    /// A scope memoizing reads by id until dropped.
    pub fn read_through_cache(&self) -> ReadThroughCache<'_, T> {
        ReadThroughCache::new(self)
    }

    // -----------------------------------------------------------------------
    // Shared write preparation
    // -----------------------------------------------------------------------

    pub(crate) fn pipeline(&self) -> &HookPipeline<T> {
        &self.pipeline
    }

    pub(crate) fn doc_ref(&self, id: &DocumentId) -> DocRef {
        DocRef::new(self.declaration.name.clone(), id.clone())
    }

    /// Rebuild a stored record and advance the clock past its stamp.
    pub(crate) fn decode(&self, doc: StoredDocument) -> CollectionResult<Stored<T>> {
        let stored = Stored::from_fields(doc.id, doc.fields)?;
        self.clock.observe(&stored.meta.updated_at);
        Ok(stored)
    }

    pub(crate) fn not_found(&self, id: &DocumentId) -> CollectionError {
        CollectionError::NotFound {
            collection: self.name().to_string(),
            id: id.clone(),
        }
    }

    /// Run the pipeline for a new document and stamp its envelope.
    pub(crate) async fn prepare_create(
        &self,
        id: &DocumentId,
        draft: Draft<T>,
        tx: Option<&Transaction>,
    ) -> CollectionResult<Stored<T>> {
        let outcome = self
            .pipeline
            .run_write(WriteInput {
                id,
                data: draft.data,
                data_version: None,
                prior: None,
                tx,
            })
            .await?;
        let now = self.clock.now();
        Ok(Stored {
            meta: Meta {
                id: id.clone(),
                created_at: now,
                updated_at: now,
                schema_version: self.current_version().to_string(),
            },
            data: outcome.data,
        })
    }

    /// Check the candidate against `existing`, run the pipeline and stamp
    /// the replacement. `createdAt` is carried over.
    pub(crate) async fn prepare_set(
        &self,
        id: &DocumentId,
        draft: Draft<T>,
        existing: &Stored<T>,
        tx: Option<&Transaction>,
    ) -> CollectionResult<Stored<T>> {
        if let Some(candidate) = draft.updated_at {
            if existing.meta.updated_at.is_after(&candidate) {
                return Err(CollectionError::EntityOutdated {
                    collection: self.name().to_string(),
                    id: id.clone(),
                });
            }
        }
        let outcome = self
            .pipeline
            .run_write(WriteInput {
                id,
                data: draft.data,
                data_version: draft.schema_version.as_deref(),
                prior: Some(existing.clone()),
                tx,
            })
            .await?;
        Ok(Stored {
            meta: Meta {
                id: id.clone(),
                created_at: existing.meta.created_at,
                updated_at: self.clock.now(),
                schema_version: self.current_version().to_string(),
            },
            data: outcome.data,
        })
    }

    /// Turn a patch into store field operations and the merged record.
    ///
    /// Envelope fields are dropped from the patch, locked fields that hold a
    /// value are protected, and `updatedAt` is stamped.
    pub(crate) async fn prepare_update(
        &self,
        id: &DocumentId,
        mut patch: Patch,
        existing: &Stored<T>,
    ) -> CollectionResult<(Vec<FieldOp>, Stored<T>)> {
        for name in ENVELOPE_FIELDS {
            patch.remove(name);
        }
        let mut merged = existing.to_fields()?;
        for path in self.pipeline.locked_fields() {
            if let Some(value) = path.get(&merged).filter(|v| !v.is_null()) {
                protect_locked(&mut patch, path.segments(), value);
            }
        }

        let mut ops = patch.to_ops()?;
        ops.push(FieldOp::Set(
            FieldPath::top(FIELD_UPDATED_AT),
            timestamp_value(&self.clock.now())?,
        ));
        apply_ops(&mut merged, &ops);

        self.pipeline.run_patch(id, &patch, &merged).await?;
        let updated = Stored::from_fields(id.clone(), merged)?;
        Ok((ops, updated))
    }

    /// Hand a committed change to the post-write hook.
    ///
    /// Inside a transaction the hook is deferred until after commit.
    pub(crate) async fn after_write(&self, change: WriteChange<T>, action: WriteAction, tx: Option<&Transaction>) {
        let hooks = Arc::clone(self.pipeline.hooks());
        let task = async move { hooks.post_write_processing(change, action).await };
        match tx {
            Some(tx) => tx.on_commit(task),
            None => {
                if let Err(err) = task.await {
                    warn!(collection = %self.name(), ?action, error = %err, "post-write side effect failed");
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Chunked multi-item writes
    // -----------------------------------------------------------------------

    /// Apply per-item writes, one transaction per chunk.
    ///
    /// With an external transaction nothing is split: more items than fit in
    /// one transaction is an error, and a failing item withdraws everything
    /// the call queued in it.
    pub(crate) async fn write_chunked(
        &self,
        items: Vec<(DocumentId, ItemWrite<T>)>,
        tx: Option<&Transaction>,
    ) -> CollectionResult<Vec<Option<Stored<T>>>> {
        ensure_distinct(items.iter().map(|(id, _)| id))?;
        let limit = self.chunk_size();

        if let Some(tx) = tx {
            if items.len() > limit {
                return Err(CollectionError::TransactionLimitExceeded {
                    limit,
                    requested: items.len(),
                });
            }
            let savepoint = tx.savepoint();
            let applied = self.apply_items(items, tx).await;
            if applied.is_err() {
                tx.rollback_to(savepoint);
            }
            return applied;
        }

        let total = items.len();
        let mut written = Vec::with_capacity(total);
        let mut remaining = items.into_iter();
        for chunk_index in 0usize.. {
            let chunk: Vec<_> = remaining.by_ref().take(limit).collect();
            if chunk.is_empty() {
                break;
            }
            debug!(
                collection = %self.name(),
                chunk = chunk_index,
                size = chunk.len(),
                total,
                "writing chunk"
            );
            let out = run_in_transaction(self.store.as_ref(), None, |tx| async move {
                self.apply_items(chunk, &tx).await
            })
            .await?;
            written.extend(out);
        }
        Ok(written)
    }

    async fn apply_items(
        &self,
        items: Vec<(DocumentId, ItemWrite<T>)>,
        tx: &Transaction,
    ) -> CollectionResult<Vec<Option<Stored<T>>>> {
        let mut out = Vec::with_capacity(items.len());
        for (id, write) in items {
            let mut handle = self.doc(id);
            let result = match write {
                ItemWrite::Create(draft) => Some(handle.create(draft, Some(tx)).await?),
                ItemWrite::Set(draft) => Some(handle.set(draft, Some(tx)).await?),
                ItemWrite::Update(patch) => Some(handle.update(patch, Some(tx)).await?),
                ItemWrite::Delete => handle.delete(Some(tx)).await?,
            };
            out.push(result);
        }
        Ok(out)
    }
}

impl<T: Record> std::fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.declaration.name)
            .field("version", &self.current_version())
            .field("unique_keys", &self.declaration.unique_keys)
            .finish()
    }
}

/// One item of a chunked multi-item write.
pub(crate) enum ItemWrite<T> {
    Create(Draft<T>),
    Set(Draft<T>),
    Update(Patch),
    Delete,
}

/// Fail if any id occurs more than once.
pub(crate) fn ensure_distinct<'a>(ids: impl Iterator<Item = &'a DocumentId>) -> CollectionResult<()> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for id in ids {
        if !seen.insert(id) && !duplicates.contains(id) {
            duplicates.push(id.clone());
        }
    }
    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(CollectionError::DuplicateIds { ids: duplicates })
    }
}

/// Keep a locked field's stored value out of reach of `patch`.
fn protect_locked(patch: &mut Patch, segments: &[String], value: &Value) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    let Some(entry) = patch.remove(first) else {
        return;
    };
    let Some((next, deeper)) = rest.split_first() else {
        // The entry targeted the locked field itself.
        return;
    };
    let inner = deeper
        .iter()
        .fold(FieldPath::top(next.clone()), |path, segment| path.child(segment.clone()));
    let entry = match entry {
        PatchValue::Merge(mut nested) => {
            protect_locked(&mut nested, rest, value);
            PatchValue::Merge(nested)
        }
        PatchValue::Set(Value::Object(mut object)) => {
            inner.set(&mut object, value.clone());
            PatchValue::Set(Value::Object(object))
        }
        PatchValue::Set(_) | PatchValue::Absent => {
            let mut object = Fields::new();
            inner.set(&mut object, value.clone());
            PatchValue::Set(Value::Object(object))
        }
    };
    patch.insert(first.clone(), entry);
}

// ---------------------------------------------------------------------------
// Namespaces
// ---------------------------------------------------------------------------

/// Read operations. None of them rewrites documents.
pub struct QueryOps<'c, T: Record> {
    collection: &'c Collection<T>,
}

impl<'c, T: Record> QueryOps<'c, T> {
    pub async fn by_id(&self, id: &DocumentId, tx: Option<&Transaction>) -> CollectionResult<Option<Stored<T>>> {
        self.collection.doc(id.clone()).get(tx).await
    }

    /// Read several documents, preserving input order.
    pub async fn by_ids(
        &self,
        ids: &[DocumentId],
        tx: Option<&Transaction>,
    ) -> CollectionResult<Vec<Option<Stored<T>>>> {
        let c = self.collection;
        let refs: Vec<DocRef> = ids.iter().map(|id| c.doc_ref(id)).collect();
        let found = match tx {
            Some(tx) => {
                let mut found = Vec::with_capacity(refs.len());
                for doc in &refs {
                    found.push(tx.get(doc).await?);
                }
                found
            }
            None => c.store.get_all(&refs).await?,
        };
        found
            .into_iter()
            .map(|doc| doc.map(|d| c.decode(d)).transpose())
            .collect()
    }

    pub async fn run(&self, query: &Query, tx: Option<&Transaction>) -> CollectionResult<Vec<Stored<T>>> {
        let c = self.collection;
        let store_query = query.to_store_query(c.name())?;
        let docs = match tx {
            Some(tx) => tx.query(&store_query).await?,
            None => c.store.query(&store_query).await?,
        };
        docs.into_iter().map(|d| c.decode(d)).collect()
    }

    /// The single match of `query`.
    pub async fn unique(&self, query: &Query, tx: Option<&Transaction>) -> CollectionResult<Stored<T>> {
        let mut found = self.run(query, tx).await?;
        match found.len() {
            0 => Err(CollectionError::NoMatch {
                collection: self.collection.name().to_string(),
            }),
            1 => Ok(found.remove(0)),
            count => Err(CollectionError::TooManyResults {
                collection: self.collection.name().to_string(),
                count,
            }),
        }
    }

    /// The first match in query order; pagination is ignored.
    pub async fn first(&self, query: &Query, tx: Option<&Transaction>) -> CollectionResult<Option<Stored<T>>> {
        let found = self.run(&query.clone().limit(1), tx).await?;
        Ok(found.into_iter().next())
    }

    pub async fn count(&self, query: &Query, tx: Option<&Transaction>) -> CollectionResult<usize> {
        Ok(self.run(query, tx).await?.len())
    }

    pub async fn all(&self, tx: Option<&Transaction>) -> CollectionResult<Vec<Stored<T>>> {
        self.run(&Query::all(), tx).await
    }
}

pub struct CreateOps<'c, T: Record> {
    collection: &'c Collection<T>,
}

impl<'c, T: Record> CreateOps<'c, T> {
    /// Create one document; fails if its id is taken.
    pub async fn item(&self, draft: Draft<T>, tx: Option<&Transaction>) -> CollectionResult<Stored<T>> {
        let c = self.collection;
        let id = c.resolve_id(&draft)?;
        run_in_transaction(c.store.as_ref(), tx, |tx| async move {
            let mut handle = c.doc(id);
            handle.create(draft, Some(&tx)).await
        })
        .await
    }

    /// Create many documents, atomically per chunk.
    pub async fn all(&self, drafts: Vec<Draft<T>>, tx: Option<&Transaction>) -> CollectionResult<Vec<Stored<T>>> {
        let c = self.collection;
        let items = drafts
            .into_iter()
            .map(|draft| Ok((c.resolve_id(&draft)?, ItemWrite::Create(draft))))
            .collect::<CollectionResult<Vec<_>>>()?;
        Ok(c.write_chunked(items, tx).await?.into_iter().flatten().collect())
    }
}

pub struct SetOps<'c, T: Record> {
    collection: &'c Collection<T>,
}

impl<'c, T: Record> SetOps<'c, T> {
    /// Create or overwrite one document.
    pub async fn item(&self, draft: Draft<T>, tx: Option<&Transaction>) -> CollectionResult<Stored<T>> {
        let c = self.collection;
        let id = c.resolve_id(&draft)?;
        run_in_transaction(c.store.as_ref(), tx, |tx| async move {
            let mut handle = c.doc(id);
            handle.set(draft, Some(&tx)).await
        })
        .await
    }

    /// Create or overwrite many documents, atomically per chunk.
    pub async fn all(&self, drafts: Vec<Draft<T>>, tx: Option<&Transaction>) -> CollectionResult<Vec<Stored<T>>> {
        let c = self.collection;
        let items = drafts
            .into_iter()
            .map(|draft| Ok((c.resolve_id(&draft)?, ItemWrite::Set(draft))))
            .collect::<CollectionResult<Vec<_>>>()?;
        Ok(c.write_chunked(items, tx).await?.into_iter().flatten().collect())
    }
}

pub struct UpdateOps<'c, T: Record> {
    collection: &'c Collection<T>,
}

impl<'c, T: Record> UpdateOps<'c, T> {
    /// Patch one existing document and return the merged record.
    pub async fn item(&self, id: &DocumentId, patch: Patch, tx: Option<&Transaction>) -> CollectionResult<Stored<T>> {
        let c = self.collection;
        run_in_transaction(c.store.as_ref(), tx, |tx| async move {
            let mut handle = c.doc(id.clone());
            handle.update(patch, Some(&tx)).await
        })
        .await
    }

    /// Patch many documents, atomically per chunk.
    pub async fn all(
        &self,
        patches: Vec<(DocumentId, Patch)>,
        tx: Option<&Transaction>,
    ) -> CollectionResult<Vec<Stored<T>>> {
        let items = patches
            .into_iter()
            .map(|(id, patch)| (id, ItemWrite::Update(patch)))
            .collect();
        Ok(self
            .collection
            .write_chunked(items, tx)
            .await?
            .into_iter()
            .flatten()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(raw: &str) -> DocumentId {
        DocumentId::parse(raw).unwrap()
    }

    #[test]
    fn duplicates_are_reported_once() {
        let ids = [id("a"), id("b"), id("a"), id("a"), id("b")];
        match ensure_distinct(ids.iter()) {
            Err(CollectionError::DuplicateIds { ids }) => assert_eq!(ids, vec![id("a"), id("b")]),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(ensure_distinct([id("a"), id("b")].iter()).is_ok());
    }

    fn merged(patch: &Patch, base: Value) -> Value {
        let mut fields = base.as_object().cloned().unwrap();
        apply_ops(&mut fields, &patch.to_ops().unwrap());
        Value::Object(fields)
    }

    #[test]
    fn protect_drops_direct_write() {
        let mut patch = Patch::new().set("owner", "mallory").set("title", "x");
        protect_locked(&mut patch, &["owner".to_string()], &json!("alice"));
        assert!(patch.get("owner").is_none());
        assert!(patch.get("title").is_some());
    }

    #[test]
    fn protect_reaches_into_nested_patches() {
        let base = json!({"meta": {"owner": "alice", "tag": "a"}});
        let segments = ["meta".to_string(), "owner".to_string()];

        let mut patch = Patch::new().merge("meta", Patch::new().set("owner", "bob").set("tag", "b"));
        protect_locked(&mut patch, &segments, &json!("alice"));
        assert_eq!(merged(&patch, base.clone()), json!({"meta": {"owner": "alice", "tag": "b"}}));

        let mut patch = Patch::new().set("meta", json!({"tag": "c"}));
        protect_locked(&mut patch, &segments, &json!("alice"));
        assert_eq!(merged(&patch, base.clone()), json!({"meta": {"owner": "alice", "tag": "c"}}));

        let mut patch = Patch::new().absent("meta");
        protect_locked(&mut patch, &segments, &json!("alice"));
        assert_eq!(merged(&patch, base), json!({"meta": {"owner": "alice"}}));
    }
}
