//! Non-atomic bulk writes.
//!
//! Writes stream through the store's bulk writer without any transaction.
//! Every item still runs the hook pipeline, and set paths still perform the
//! optimistic `updatedAt` check against priors read up front. A failing item
//! never stops the others: failures are collected by input index and raised
//! together as one [`BulkWriteError`] after every item was attempted.

use folio_store::{DocRef, WriteOp};
use folio_types::{DocumentId, Draft, Patch, Record, Stored};
use tracing::info;

use crate::collection::Collection;
use crate::error::{BulkFailure, BulkWriteError, CollectionError, CollectionResult};
use crate::hooks::{WriteAction, WriteChange};

/// An item that passed preparation and is ready to stream.
struct Staged<T> {
    index: usize,
    id: DocumentId,
    op: WriteOp,
    action: WriteAction,
    change: WriteChange<T>,
    result: Option<Stored<T>>,
}

type Prepared<T> = Result<Option<Staged<T>>, BulkFailure>;

pub struct MultiOps<'c, T: Record> {
    collection: &'c Collection<T>,
}

impl<'c, T: Record> MultiOps<'c, T> {
    pub(crate) fn new(collection: &'c Collection<T>) -> Self {
        Self { collection }
    }

    /// Create every draft. Existing ids fail individually.
    pub async fn create(&self, drafts: Vec<Draft<T>>) -> CollectionResult<Vec<Stored<T>>> {
        let mut prepared = Vec::with_capacity(drafts.len());
        for (index, draft) in drafts.into_iter().enumerate() {
            let id = match self.collection.resolve_id(&draft) {
                Ok(id) => id,
                Err(err) => {
                    prepared.push(Err(BulkFailure::new(index, None, err)));
                    continue;
                }
            };
            prepared.push(self.stage_create(index, id, draft).await);
        }
        Ok(self.stream(prepared).await?.into_iter().flatten().collect())
    }

    /// Create or overwrite every draft.
    pub async fn set(&self, drafts: Vec<Draft<T>>) -> CollectionResult<Vec<Stored<T>>> {
        let c = self.collection;
        let mut prepared = Vec::with_capacity(drafts.len());
        let mut resolved = Vec::with_capacity(drafts.len());
        for (index, draft) in drafts.into_iter().enumerate() {
            match c.resolve_id(&draft) {
                Ok(id) => resolved.push((index, id, draft)),
                Err(err) => prepared.push(Err(BulkFailure::new(index, None, err))),
            }
        }

        let priors = self.read_priors(resolved.iter().map(|(_, id, _)| id)).await?;
        for ((index, id, draft), prior) in resolved.into_iter().zip(priors) {
            let staged = match prior {
                Err(err) => Err(BulkFailure::new(index, Some(id), err)),
                Ok(None) => self.stage_create(index, id, draft).await,
                Ok(Some(existing)) => {
                    let fail = |err: CollectionError| BulkFailure::new(index, Some(id.clone()), err);
                    let prepared_set = c.prepare_set(&id, draft, &existing, None).await;
                    match prepared_set {
                        Err(err) => Err(fail(err)),
                        Ok(stored) => match stored.to_fields() {
                            Err(err) => Err(fail(err.into())),
                            Ok(fields) => Ok(Some(Staged {
                                index,
                                op: WriteOp::Set {
                                    doc: c.doc_ref(&id),
                                    fields,
                                },
                                id,
                                action: WriteAction::Set,
                                change: WriteChange {
                                    before: Some(existing),
                                    updated: Some(stored.clone()),
                                    deleted: None,
                                },
                                result: Some(stored),
                            })),
                        },
                    }
                }
            };
            prepared.push(staged);
        }
        Ok(self.stream(prepared).await?.into_iter().flatten().collect())
    }

    /// Patch every listed document. Missing documents fail individually.
    pub async fn update(&self, patches: Vec<(DocumentId, Patch)>) -> CollectionResult<Vec<Stored<T>>> {
        let c = self.collection;
        let priors = self.read_priors(patches.iter().map(|(id, _)| id)).await?;
        let mut prepared = Vec::with_capacity(patches.len());
        for (index, ((id, patch), prior)) in patches.into_iter().zip(priors).enumerate() {
            let fail = |err: CollectionError| BulkFailure::new(index, Some(id.clone()), err);
            let staged = match prior {
                Err(err) => Err(fail(err)),
                Ok(None) => Err(fail(c.not_found(&id))),
                Ok(Some(existing)) => {
                    let patched = c.prepare_update(&id, patch, &existing).await;
                    match patched {
                        Err(err) => Err(fail(err)),
                        Ok((ops, updated)) => Ok(Some(Staged {
                            index,
                            op: WriteOp::Update {
                                doc: c.doc_ref(&id),
                                ops,
                            },
                            id: id.clone(),
                            action: WriteAction::Update,
                            change: WriteChange {
                                before: Some(existing),
                                updated: Some(updated.clone()),
                                deleted: None,
                            },
                            result: Some(updated),
                        })),
                    }
                }
            };
            prepared.push(staged);
        }
        Ok(self.stream(prepared).await?.into_iter().flatten().collect())
    }

    /// Delete every listed document. Missing documents yield `None`.
    pub async fn delete(&self, ids: Vec<DocumentId>) -> CollectionResult<Vec<Option<Stored<T>>>> {
        let c = self.collection;
        let priors = self.read_priors(ids.iter()).await?;
        let mut prepared = Vec::with_capacity(ids.len());
        for (index, (id, prior)) in ids.into_iter().zip(priors).enumerate() {
            let staged = match prior {
                Err(err) => Err(BulkFailure::new(index, Some(id), err)),
                Ok(None) => Ok(None),
                Ok(Some(existing)) => {
                    let verdict = c.pipeline().run_delete(std::slice::from_ref(&existing), None).await;
                    match verdict {
                        Err(err) => Err(BulkFailure::new(index, Some(id), err)),
                        Ok(_) => Ok(Some(Staged {
                            index,
                            op: WriteOp::Delete { doc: c.doc_ref(&id) },
                            id,
                            action: WriteAction::Delete,
                            change: WriteChange {
                                before: Some(existing.clone()),
                                updated: None,
                                deleted: Some(existing.clone()),
                            },
                            result: Some(existing),
                        })),
                    }
                }
            };
            prepared.push(staged);
        }
        self.stream(prepared).await
    }

    async fn stage_create(&self, index: usize, id: DocumentId, draft: Draft<T>) -> Prepared<T> {
        let c = self.collection;
        let fail = |err: CollectionError| BulkFailure::new(index, Some(id.clone()), err);
        let stored = c.prepare_create(&id, draft, None).await.map_err(fail)?;
        let fields = stored.to_fields().map_err(|err| fail(err.into()))?;
        Ok(Some(Staged {
            index,
            op: WriteOp::Create {
                doc: c.doc_ref(&id),
                fields,
            },
            id,
            action: WriteAction::Create,
            change: WriteChange {
                before: None,
                updated: Some(stored.clone()),
                deleted: None,
            },
            result: Some(stored),
        }))
    }

    /// Read and decode the current version of each id, in order.
    async fn read_priors<'a>(
        &self,
        ids: impl Iterator<Item = &'a DocumentId>,
    ) -> CollectionResult<Vec<CollectionResult<Option<Stored<T>>>>> {
        let c = self.collection;
        let refs: Vec<DocRef> = ids.map(|id| c.doc_ref(id)).collect();
        let found = c.store().get_all(&refs).await?;
        Ok(found
            .into_iter()
            .map(|doc| doc.map(|d| c.decode(d)).transpose())
            .collect())
    }

    /// Stream staged writes through one bulk writer and gather every failure.
    ///
    /// Returns one slot per input item, in input order.
    async fn stream(&self, prepared: Vec<Prepared<T>>) -> CollectionResult<Vec<Option<Stored<T>>>> {
        let c = self.collection;
        let attempted = prepared.len();
        let mut results: Vec<Option<Stored<T>>> = (0..attempted).map(|_| None).collect();
        let mut failures = Vec::new();
        let mut staged = Vec::new();

        let mut writer = c.store().bulk_writer();
        for item in prepared {
            match item {
                Ok(Some(item)) => {
                    writer.write(item.op.clone()).await;
                    staged.push(item);
                }
                Ok(None) => {}
                Err(failure) => failures.push(failure),
            }
        }
        let outcomes = writer.close().await;

        for (item, outcome) in staged.into_iter().zip(outcomes) {
            match outcome {
                Ok(()) => {
                    c.after_write(item.change, item.action, None).await;
                    results[item.index] = item.result;
                }
                Err(err) => failures.push(BulkFailure::new(item.index, Some(item.id), err.into())),
            }
        }

        info!(
            collection = %c.name(),
            attempted,
            failed = failures.len(),
            "bulk write finished"
        );
        if failures.is_empty() {
            return Ok(results);
        }
        failures.sort_by_key(|f| f.index);
        Err(BulkWriteError {
            collection: c.name().to_string(),
            attempted,
            failures,
        }
        .into())
    }
}
