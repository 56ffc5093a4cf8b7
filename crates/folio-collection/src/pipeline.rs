use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use folio_types::envelope::data_fields;
use folio_types::{DocumentId, FieldPath, Fields, Meta, Patch, Record, Stored, Timestamp, TypeError};
use serde_json::Value;
use tracing::debug;

use crate::config::CollectionDeclaration;
use crate::error::{CollectionError, CollectionResult, HookError};
use crate::hooks::CollectionHooks;
use crate::identity::IdentityRule;
use crate::transaction::Transaction;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// One step of the hook pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Upgrade,
    PreWrite,
    LockedFields,
    Validate,
    Identity,
    ValidatePatch,
    DeleteDependencies,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Self::Upgrade => "upgrade",
            Self::PreWrite => "pre-write",
            Self::LockedFields => "locked-fields",
            Self::Validate => "validate",
            Self::Identity => "identity",
            Self::ValidatePatch => "validate-patch",
            Self::DeleteDependencies => "delete-dependencies",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// StageResult / PipelineTrace
// ---------------------------------------------------------------------------

/// Recorded result of one stage run.
#[derive(Clone, Debug)]
pub struct StageResult {
    pub stage: Stage,
    pub passed: bool,
    /// Populated on failure.
    pub reason: Option<String>,
    pub elapsed: Duration,
}

/// The stages one write went through, in evaluation order.
#[derive(Clone, Debug, Default)]
pub struct PipelineTrace {
    pub results: Vec<StageResult>,
}

impl PipelineTrace {
    /// Returns `true` if `stage` ran.
    pub fn ran(&self, stage: Stage) -> bool {
        self.results.iter().any(|r| r.stage == stage)
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.results.iter().map(|r| r.stage).collect()
    }

    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub fn elapsed(&self) -> Duration {
        self.results.iter().map(|r| r.elapsed).sum()
    }

    /// Time one stage and record its outcome.
    async fn timed<R, Fut>(&mut self, stage: Stage, run: Fut) -> CollectionResult<R>
    where
        Fut: Future<Output = CollectionResult<R>>,
    {
        let start = Instant::now();
        let outcome = run.await;
        let elapsed = start.elapsed();
        let reason = outcome.as_ref().err().map(ToString::to_string);
        debug!(
            stage = stage.name(),
            passed = reason.is_none(),
            elapsed_us = elapsed.as_micros() as u64,
            "hook stage finished"
        );
        self.results.push(StageResult {
            stage,
            passed: reason.is_none(),
            reason,
            elapsed,
        });
        outcome
    }
}

// ---------------------------------------------------------------------------
// HookPipeline
// ---------------------------------------------------------------------------

/// A record headed for the store, before the pipeline ran.
pub struct WriteInput<'a, T> {
    pub id: &'a DocumentId,
    pub data: T,
    /// Schema version the candidate was read at; `None` means current.
    pub data_version: Option<&'a str>,
    /// The stored document being replaced, if any.
    pub prior: Option<Stored<T>>,
    pub tx: Option<&'a Transaction>,
}

/// A record that passed the pipeline.
pub struct WriteOutcome<T> {
    pub data: T,
    /// The prior document, upgraded if it was stored at an older version.
    pub prior: Option<Stored<T>>,
    pub trace: PipelineTrace,
}

/// The ordered hook contract every write passes through:
/// upgrade, pre-write, locked fields, validate, identity.
///
/// Partial updates run the patch validation stage instead, and deletes the
/// delete-dependency stage. The pipeline is fail-fast.
pub struct HookPipeline<T: Record> {
    collection: String,
    declaration: CollectionDeclaration,
    identity: IdentityRule,
    locked: Vec<FieldPath>,
    hooks: Arc<dyn CollectionHooks<T>>,
}

impl<T: Record> HookPipeline<T> {
    pub fn new(declaration: &CollectionDeclaration, hooks: Arc<dyn CollectionHooks<T>>) -> CollectionResult<Self> {
        let locked = declaration
            .locked_fields
            .iter()
            .map(|f| FieldPath::parse(f))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            collection: declaration.name.clone(),
            declaration: declaration.clone(),
            identity: IdentityRule::new(&declaration.unique_keys)?,
            locked,
            hooks,
        })
    }

    pub fn identity(&self) -> &IdentityRule {
        &self.identity
    }

    pub fn locked_fields(&self) -> &[FieldPath] {
        &self.locked
    }

    pub fn hooks(&self) -> &Arc<dyn CollectionHooks<T>> {
        &self.hooks
    }

    /// Run a full-record write through every stage.
    pub async fn run_write(&self, input: WriteInput<'_, T>) -> CollectionResult<WriteOutcome<T>> {
        let WriteInput {
            id,
            mut data,
            data_version,
            mut prior,
            tx,
        } = input;
        let mut trace = PipelineTrace::default();

        let candidate_old = data_version.is_some_and(|v| self.declaration.is_older(v));
        let prior_old = prior
            .as_ref()
            .is_some_and(|p| self.declaration.is_older(&p.meta.schema_version));
        if candidate_old || prior_old {
            let upgrade = self.upgrade(id, data, data_version, prior, candidate_old, prior_old);
            (data, prior) = trace.timed(Stage::Upgrade, upgrade).await?;
        }

        trace
            .timed(Stage::PreWrite, async {
                self.hooks
                    .pre_write_processing(&mut data, prior.as_ref(), tx)
                    .await
                    .map_err(CollectionError::from)
            })
            .await?;

        let mut fields = data_fields(&data)?;
        if let Some(prior) = prior.as_ref().filter(|_| !self.locked.is_empty()) {
            let prior_fields = data_fields(&prior.data)?;
            let restored = trace
                .timed(Stage::LockedFields, async {
                    Ok(restore_locked(&self.locked, &prior_fields, &mut fields))
                })
                .await?;
            if restored {
                data = serde_json::from_value(Value::Object(fields.clone()))
                    .map_err(|e| TypeError::Serialization(e.to_string()))?;
            }
        }

        trace
            .timed(Stage::Validate, async {
                let report = self.hooks.validate(&data).await;
                if report.is_valid() {
                    Ok(())
                } else {
                    Err(CollectionError::ValidationFailed {
                        collection: self.collection.clone(),
                        id: id.clone(),
                        record: Value::Object(fields.clone()),
                        report,
                    })
                }
            })
            .await?;

        if self.identity.has_keys() {
            trace
                .timed(Stage::Identity, async {
                    self.identity.resolve(&fields, Some(id)).map(|_| ())
                })
                .await?;
        }

        debug!(
            collection = %self.collection,
            id = %id,
            stages = trace.results.len(),
            "write pipeline passed"
        );
        Ok(WriteOutcome { data, prior, trace })
    }

    /// Validate a partial update. `merged` is the record the patch produces.
    pub async fn run_patch(&self, id: &DocumentId, patch: &Patch, merged: &Fields) -> CollectionResult<PipelineTrace> {
        let mut trace = PipelineTrace::default();
        trace
            .timed(Stage::ValidatePatch, async {
                let report = self.hooks.validate_patch(patch).await;
                if report.is_valid() {
                    Ok(())
                } else {
                    Err(CollectionError::ValidationFailed {
                        collection: self.collection.clone(),
                        id: id.clone(),
                        record: Value::Object(merged.clone()),
                        report,
                    })
                }
            })
            .await?;
        if self.identity.has_keys() {
            trace
                .timed(Stage::Identity, async { self.identity.resolve(merged, Some(id)).map(|_| ()) })
                .await?;
        }
        Ok(trace)
    }

    /// Ask the delete-dependency hook whether `items` may go.
    pub async fn run_delete(&self, items: &[Stored<T>], tx: Option<&Transaction>) -> CollectionResult<PipelineTrace> {
        let mut trace = PipelineTrace::default();
        if items.is_empty() {
            return Ok(trace);
        }
        trace
            .timed(Stage::DeleteDependencies, async {
                match self.hooks.can_delete_items(items, tx).await {
                    Ok(()) => Ok(()),
                    Err(HookError::Rejected(reason)) => Err(CollectionError::DeleteRejected {
                        collection: self.collection.clone(),
                        ids: items.iter().map(|i| i.id().clone()).collect(),
                        reason,
                    }),
                    Err(other) => Err(other.into()),
                }
            })
            .await?;
        Ok(trace)
    }

    async fn upgrade(
        &self,
        id: &DocumentId,
        data: T,
        data_version: Option<&str>,
        prior: Option<Stored<T>>,
        candidate_old: bool,
        prior_old: bool,
    ) -> CollectionResult<(T, Option<Stored<T>>)> {
        let mut batch = Vec::with_capacity(2);
        let mut kept_data = None;
        let mut kept_prior = None;

        if candidate_old {
            batch.push(Stored {
                meta: Meta {
                    id: id.clone(),
                    created_at: prior.as_ref().map_or(Timestamp::zero(), |p| p.meta.created_at),
                    updated_at: Timestamp::zero(),
                    schema_version: data_version.unwrap_or_default().to_string(),
                },
                data,
            });
        } else {
            kept_data = Some(data);
        }
        match prior {
            Some(prior) if prior_old => batch.push(prior),
            other => kept_prior = Some(other),
        }

        let requested = batch.len();
        let mut upgraded = self.hooks.upgrade_instances(batch).await?.into_iter();
        if upgraded.len() != requested {
            return Err(HookError::failed(
                "upgrade_instances",
                format!("returned {} items for {requested}", upgraded.len()),
            )
            .into());
        }

        let data = match kept_data {
            Some(data) => data,
            None => upgraded.next().map(|s| s.data).ok_or_else(upgrade_underflow)?,
        };
        let prior = match kept_prior {
            Some(prior) => prior,
            None => Some(upgraded.next().ok_or_else(upgrade_underflow)?),
        };
        Ok((data, prior))
    }
}

fn upgrade_underflow() -> CollectionError {
    HookError::failed("upgrade_instances", "returned too few items").into()
}

/// Copy locked values from `prior` into `fields`. Returns `true` if anything
/// changed.
pub(crate) fn restore_locked(locked: &[FieldPath], prior: &Fields, fields: &mut Fields) -> bool {
    let mut changed = false;
    for path in locked {
        let Some(value) = path.get(prior).filter(|v| !v.is_null()) else {
            continue;
        };
        if path.get(fields) != Some(value) {
            path.set(fields, value.clone());
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::NoOpHooks;
    use crate::report::ValidationReport;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Account {
        email: String,
        #[serde(default)]
        plan: Option<String>,
        #[serde(default)]
        migrated: bool,
    }

    fn account(email: &str) -> Account {
        Account {
            email: email.into(),
            plan: None,
            migrated: false,
        }
    }

    fn stored(id: &DocumentId, data: Account, version: &str) -> Stored<Account> {
        Stored {
            meta: Meta {
                id: id.clone(),
                created_at: Timestamp::new(1, 0),
                updated_at: Timestamp::new(2, 0),
                schema_version: version.into(),
            },
            data,
        }
    }

    struct Strict;

    #[async_trait]
    impl CollectionHooks<Account> for Strict {
        async fn upgrade_instances(&self, items: Vec<Stored<Account>>) -> Result<Vec<Stored<Account>>, HookError> {
            Ok(items
                .into_iter()
                .map(|mut s| {
                    s.data.migrated = true;
                    s
                })
                .collect())
        }

        async fn pre_write_processing(
            &self,
            item: &mut Account,
            _prior: Option<&Stored<Account>>,
            _tx: Option<&Transaction>,
        ) -> Result<(), HookError> {
            item.email = item.email.to_lowercase();
            Ok(())
        }

        async fn validate(&self, item: &Account) -> ValidationReport {
            if item.email.contains('@') {
                ValidationReport::valid()
            } else {
                ValidationReport::invalid("email", "must contain @")
            }
        }

        async fn can_delete_items(&self, _items: &[Stored<Account>], _tx: Option<&Transaction>) -> Result<(), HookError> {
            Err(HookError::Rejected("still referenced".into()))
        }
    }

    fn pipeline(hooks: Arc<dyn CollectionHooks<Account>>, decl: CollectionDeclaration) -> HookPipeline<Account> {
        HookPipeline::new(&decl, hooks).unwrap()
    }

    fn decl() -> CollectionDeclaration {
        CollectionDeclaration::new("accounts", &["v1", "v2"])
    }

    fn id() -> DocumentId {
        DocumentId::parse("acc-1").unwrap()
    }

    #[tokio::test]
    async fn create_runs_pre_write_and_validate_only() {
        let pipeline = pipeline(Arc::new(Strict), decl());
        let id = id();
        let outcome = pipeline
            .run_write(WriteInput {
                id: &id,
                data: account("Ann@Example.com"),
                data_version: None,
                prior: None,
                tx: None,
            })
            .await
            .unwrap();
        assert_eq!(outcome.data.email, "ann@example.com");
        assert_eq!(outcome.trace.stages(), vec![Stage::PreWrite, Stage::Validate]);
        assert!(outcome.trace.passed());
    }

    #[tokio::test]
    async fn old_prior_is_upgraded() {
        let pipeline = pipeline(Arc::new(Strict), decl());
        let id = id();
        let outcome = pipeline
            .run_write(WriteInput {
                id: &id,
                data: account("a@b.c"),
                data_version: None,
                prior: Some(stored(&id, account("a@b.c"), "v1")),
                tx: None,
            })
            .await
            .unwrap();
        assert!(outcome.trace.ran(Stage::Upgrade));
        assert!(outcome.prior.unwrap().data.migrated);
        assert!(!outcome.data.migrated);
    }

    #[tokio::test]
    async fn old_candidate_is_upgraded() {
        let pipeline = pipeline(Arc::new(Strict), decl());
        let id = id();
        let outcome = pipeline
            .run_write(WriteInput {
                id: &id,
                data: account("a@b.c"),
                data_version: Some("v1"),
                prior: Some(stored(&id, account("a@b.c"), "v2")),
                tx: None,
            })
            .await
            .unwrap();
        assert!(outcome.data.migrated);
        assert!(!outcome.prior.unwrap().data.migrated);
    }

    #[tokio::test]
    async fn validation_failure_carries_record_and_report() {
        let pipeline = pipeline(Arc::new(Strict), decl());
        let id = id();
        let err = pipeline
            .run_write(WriteInput {
                id: &id,
                data: account("nope"),
                data_version: None,
                prior: None,
                tx: None,
            })
            .await
            .err()
            .unwrap();
        match err {
            CollectionError::ValidationFailed { record, report, .. } => {
                assert_eq!(record["email"], json!("nope"));
                assert_eq!(report.violations[0].field, "email");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn locked_fields_keep_prior_value() {
        let pipeline = pipeline(Arc::new(NoOpHooks), decl().with_locked_fields(&["plan"]));
        let id = id();
        let mut prior = account("a@b.c");
        prior.plan = Some("gold".into());
        let mut candidate = account("a@b.c");
        candidate.plan = Some("free".into());
        let outcome = pipeline
            .run_write(WriteInput {
                id: &id,
                data: candidate,
                data_version: None,
                prior: Some(stored(&id, prior, "v2")),
                tx: None,
            })
            .await
            .unwrap();
        assert_eq!(outcome.data.plan.as_deref(), Some("gold"));
        assert!(outcome.trace.ran(Stage::LockedFields));
    }

    #[tokio::test]
    async fn identity_stage_refuses_key_change() {
        let pipeline = pipeline(Arc::new(NoOpHooks), decl().with_unique_keys(&["email"]));
        let original = pipeline
            .identity()
            .resolve(&data_fields(&account("a@b.c")).unwrap(), None)
            .unwrap();
        let err = pipeline
            .run_write(WriteInput {
                id: &original,
                data: account("other@b.c"),
                data_version: None,
                prior: None,
                tx: None,
            })
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CollectionError::IdMismatch { .. }));
    }

    #[tokio::test]
    async fn delete_rejection_names_ids() {
        let pipeline = pipeline(Arc::new(Strict), decl());
        let id = id();
        let err = pipeline
            .run_delete(&[stored(&id, account("a@b.c"), "v2")], None)
            .await
            .unwrap_err();
        match err {
            CollectionError::DeleteRejected { ids, reason, .. } => {
                assert_eq!(ids, vec![id]);
                assert_eq!(reason, "still referenced");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn restore_locked_ignores_null_prior() {
        let locked = vec![FieldPath::top("plan")];
        let prior = json!({"plan": null}).as_object().cloned().unwrap();
        let mut fields = json!({"plan": "free"}).as_object().cloned().unwrap();
        assert!(!restore_locked(&locked, &prior, &mut fields));
        assert_eq!(fields["plan"], json!("free"));
    }
}
