//! Lock-guarded application of graph changes to base documents
//!
//! A save either locks, records, applies, unlocks and commits, or it
//! aborts with every lock released and the record marked `failed`.
//! Mutations already applied are restored from the originals kept in the
//! record, but only on documents the transaction still holds.

use crate::error::{StrataError, StrataResult};
use crate::lock::LockManager;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use strata_graph::{ChangedPredicates, GraphDiff, MemoryGraph, ResourceId};
use strata_store::{BaseDocument, DocumentStore, StoreError, TransactionRecord, TransactionStatus};

/// Result of a committed (or empty) save
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveOutcome {
    /// Id of the committed transaction; `None` when there was nothing to save
    #[serde(rename = "transactionId")]
    pub transaction_id: Option<String>,
    /// Subject to changed predicates
    pub changes: ChangedPredicates,
}

impl SaveOutcome {
    /// Whether anything was written
    #[inline]
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.transaction_id.is_none()
    }
}

/// Applies graph diffs to one store's base documents
#[derive(Clone)]
pub struct TransactionCoordinator {
    store: String,
    documents: Arc<dyn DocumentStore>,
    locks: LockManager,
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("store", &self.store)
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

/// Generate a transaction id
#[must_use]
pub fn transaction_id() -> String {
    format!("transaction_{}", ulid::Ulid::new())
}

impl TransactionCoordinator {
    /// Create a coordinator for `store`
    #[must_use]
    pub fn new(store: impl Into<String>, documents: Arc<dyn DocumentStore>, locks: LockManager) -> Self {
        Self {
            store: store.into(),
            documents,
            locks,
        }
    }

    /// Store name
    #[inline]
    #[must_use]
    pub fn store(&self) -> &str {
        &self.store
    }

    /// Apply the difference between `old` and `new` to the base documents
    /// of `pod` in `context`
    ///
    /// # Errors
    /// - [`StrataError::TransactionFailure`] when a touched document stayed
    ///   locked through every attempt (nothing is mutated) or when applying
    ///   failed (applied documents are restored); the record is marked
    ///   `failed` either way
    /// - [`StrataError::Store`] when the record could not be written
    #[tracing::instrument(skip(self, old, new, description), fields(store = %self.store))]
    pub async fn save_changes(
        &self,
        pod: &str,
        old: &MemoryGraph,
        new: &MemoryGraph,
        context: &str,
        description: Option<String>,
    ) -> StrataResult<SaveOutcome> {
        let diff = GraphDiff::between(old, new);
        if diff.is_empty() {
            tracing::debug!("no changes to save");
            return Ok(SaveOutcome::default());
        }

        let started = Instant::now();
        let transaction_id = transaction_id();
        let changes: BTreeMap<_, _> = diff.iter().map(|(s, c)| (s.to_string(), c.clone())).collect();
        let mut record = TransactionRecord::pending(&transaction_id, &self.store, pod, context, changes)
            .with_description(description);
        let ids: Vec<ResourceId> = diff.subjects().map(|s| ResourceId::new(s, context)).collect();

        let locked = match self.locks.lock_all(pod, &ids, &transaction_id).await {
            Ok(locked) => locked,
            Err(e @ StrataError::LockContention { .. }) => {
                // nothing was mutated and lock_all released what it took
                let reason = e.to_string();
                record.status = TransactionStatus::Failed;
                record.failure_reason = Some(reason.clone());
                if let Err(log_err) = self.documents.insert_transaction(&record).await {
                    tracing::error!(%transaction_id, error = %log_err, "failed to record failed transaction");
                }
                metrics::counter!("strata.transaction.failed").increment(1);
                tracing::warn!(%transaction_id, %reason, "lock retries exhausted");
                return Err(StrataError::TransactionFailure { transaction_id, reason });
            }
            Err(e) => return Err(e),
        };

        match self.read_originals(pod, &locked).await {
            Ok(originals) => record.originals = originals,
            Err(e) => {
                record.status = TransactionStatus::Failed;
                record.failure_reason = Some(e.to_string());
                if let Err(log_err) = self.documents.insert_transaction(&record).await {
                    tracing::error!(%transaction_id, error = %log_err, "failed to record failed transaction");
                }
                self.locks.unlock_all(pod, &locked, &transaction_id).await;
                metrics::counter!("strata.transaction.failed").increment(1);
                return Err(e);
            }
        }

        if let Err(e) = self.documents.insert_transaction(&record).await {
            self.locks.unlock_all(pod, &locked, &transaction_id).await;
            return Err(e.into());
        }

        let mut applied = Vec::new();
        if let Err(e) = self.apply(pod, &record, &mut applied).await {
            let reason = e.to_string();
            self.rollback(pod, &record, &applied).await;
            self.locks.unlock_all(pod, &locked, &transaction_id).await;
            if let Err(log_err) = self
                .documents
                .set_transaction_status(&transaction_id, TransactionStatus::Failed, Some(reason.clone()))
                .await
            {
                tracing::error!(%transaction_id, error = %log_err, "failed to mark transaction failed");
            }
            metrics::counter!("strata.transaction.failed").increment(1);
            tracing::error!(%transaction_id, %reason, "transaction rolled back");
            return Err(StrataError::TransactionFailure { transaction_id, reason });
        }

        self.locks.unlock_all(pod, &locked, &transaction_id).await;
        self.documents
            .set_transaction_status(&transaction_id, TransactionStatus::Committed, None)
            .await?;

        metrics::counter!("strata.transaction.committed").increment(1);
        metrics::histogram!("strata.transaction.duration_ms").record(started.elapsed().as_secs_f64() * 1000.0);
        tracing::info!(%transaction_id, subjects = locked.len(), "transaction committed");

        Ok(SaveOutcome {
            transaction_id: Some(transaction_id),
            changes: diff.changed_predicates(),
        })
    }

    async fn read_originals(
        &self,
        pod: &str,
        ids: &[ResourceId],
    ) -> StrataResult<BTreeMap<String, Option<BaseDocument>>> {
        let mut originals = BTreeMap::new();
        for id in ids {
            let original = self
                .documents
                .find(pod, id)
                .await?
                .filter(|d| !d.is_placeholder())
                .map(|mut d| {
                    d.lock = None;
                    d
                });
            originals.insert(id.resource.clone(), original);
        }
        Ok(originals)
    }

    async fn apply(
        &self,
        pod: &str,
        record: &TransactionRecord,
        applied: &mut Vec<ResourceId>,
    ) -> StrataResult<()> {
        let now = Utc::now();
        for (subject, change) in &record.changes {
            let id = ResourceId::new(subject.clone(), record.context.clone());
            let mut doc = record
                .originals
                .get(subject)
                .cloned()
                .flatten()
                .unwrap_or_else(|| BaseDocument::new(id.clone()));
            doc.apply(change)?;
            doc.touch(now);
            self.documents.save_locked(pod, &doc, &record.id).await?;
            applied.push(id);
        }
        Ok(())
    }

    async fn rollback(&self, pod: &str, record: &TransactionRecord, applied: &[ResourceId]) {
        for id in applied {
            let original = record.originals.get(&id.resource).cloned().flatten();
            match self.documents.restore(pod, id, original, &record.id).await {
                Ok(()) => {}
                Err(e @ StoreError::LockNotHeld { .. }) => {
                    tracing::warn!(transaction_id = %record.id, resource = %id, error = %e, "lock taken over, rollback skipped");
                }
                Err(e) => {
                    tracing::error!(transaction_id = %record.id, resource = %id, error = %e, "rollback failed");
                }
            }
        }
    }
}
