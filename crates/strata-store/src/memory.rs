//! In-process document store
//!
//! Per-document atomicity comes from `DashMap` shard locks: every
//! conditional update happens while holding the entry, so concurrent
//! callers observe the same insert-if-absent semantics a real document
//! database gives.

use crate::document::{BaseDocument, CompositeDocument, DocumentLock};
use crate::error::{StoreError, StoreResult};
use crate::record::{JobGroup, TransactionRecord, TransactionStatus};
use crate::store::{BaseDocuments, CompositeDocuments, JobGroups, LockOutcome, Lockable, TransactionLog};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use strata_graph::{CompositeId, ResourceId};

type DocKey = (String, ResourceId);

/// Composite documents of one collection, keyed by `_id`
#[derive(Debug, Default)]
pub(crate) struct CompositeTable {
    docs: BTreeMap<CompositeId, CompositeDocument>,
}

impl CompositeTable {
    pub(crate) fn upsert(&mut self, doc: CompositeDocument) {
        self.docs.insert(doc.id.clone(), doc);
    }

    pub(crate) fn get(&self, id: &CompositeId) -> Option<CompositeDocument> {
        self.docs.get(id).cloned()
    }

    pub(crate) fn delete(&mut self, id: &CompositeId) -> bool {
        self.docs.remove(id).is_some()
    }

    pub(crate) fn impacted(&self, resources: &[ResourceId]) -> Vec<CompositeDocument> {
        self.docs
            .values()
            .filter(|d| resources.iter().any(|r| d.depends_on(r)))
            .cloned()
            .collect()
    }

    pub(crate) fn by_spec(&self, spec: &str) -> Vec<CompositeDocument> {
        self.docs
            .values()
            .filter(|d| d.id.spec == spec)
            .cloned()
            .collect()
    }

    pub(crate) fn by_resource(&self, resource: &ResourceId) -> Vec<CompositeDocument> {
        self.docs
            .values()
            .filter(|d| d.id.resource == resource.resource && d.id.context == resource.context)
            .cloned()
            .collect()
    }

    pub(crate) fn delete_stale(&mut self, spec: &str, before: DateTime<Utc>) -> usize {
        let before_len = self.docs.len();
        self.docs
            .retain(|id, doc| !(id.spec == spec && doc.generated_at < before));
        before_len - self.docs.len()
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &CompositeDocument> {
        self.docs.values()
    }

    pub(crate) fn len(&self) -> usize {
        self.docs.len()
    }
}

/// Complete in-memory [`crate::DocumentStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: DashMap<DocKey, BaseDocument>,
    composites: RwLock<HashMap<String, CompositeTable>>,
    indexes: RwLock<HashMap<String, Vec<serde_json::Value>>>,
    transactions: DashMap<String, TransactionRecord>,
    job_groups: DashMap<String, JobGroup>,
}

impl MemoryStore {
    /// Create an empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of composite documents in `collection`
    #[must_use]
    pub fn composite_count(&self, collection: &str) -> usize {
        self.composites
            .read()
            .get(collection)
            .map_or(0, CompositeTable::len)
    }

    /// Indexes created on `collection`
    #[must_use]
    pub fn indexes(&self, collection: &str) -> Vec<serde_json::Value> {
        self.indexes.read().get(collection).cloned().unwrap_or_default()
    }

    /// Write a base document directly, bypassing locks and versions
    pub fn seed(&self, pod: &str, doc: BaseDocument) {
        self.documents.insert(Self::key(pod, &doc.id), doc);
    }

    /// Remove a base document directly
    pub fn evict(&self, pod: &str, id: &ResourceId) -> bool {
        self.documents.remove(&Self::key(pod, id)).is_some()
    }

    /// Number of job groups still tracked
    #[must_use]
    pub fn job_group_count(&self) -> usize {
        self.job_groups.len()
    }

    /// Number of base documents (placeholders included) in `pod`
    #[must_use]
    pub fn document_count(&self, pod: &str) -> usize {
        self.documents.iter().filter(|e| e.key().0 == pod).count()
    }

    fn key(pod: &str, id: &ResourceId) -> DocKey {
        (pod.to_string(), id.clone())
    }
}

fn lease_delta(lease: Duration) -> chrono::Duration {
    chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::MAX)
}

#[async_trait::async_trait]
impl BaseDocuments for MemoryStore {
    async fn find(&self, pod: &str, id: &ResourceId) -> StoreResult<Option<BaseDocument>> {
        Ok(self
            .documents
            .get(&Self::key(pod, id))
            .map(|d| d.value().clone()))
    }

    async fn find_by_type(
        &self,
        pod: &str,
        context: &str,
        rdf_types: &[String],
    ) -> StoreResult<Vec<BaseDocument>> {
        let mut found: Vec<BaseDocument> = self
            .documents
            .iter()
            .filter(|e| e.key().0 == pod)
            .map(|e| e.value().clone())
            .filter(|d| d.id.context == context && !d.is_placeholder())
            .filter(|d| d.rdf_types().iter().any(|t| rdf_types.contains(t)))
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn save_locked(
        &self,
        pod: &str,
        doc: &BaseDocument,
        transaction_id: &str,
    ) -> StoreResult<()> {
        let key = Self::key(pod, &doc.id);
        let Some(mut current) = self.documents.get_mut(&key) else {
            return Err(StoreError::LockNotHeld {
                resource: doc.id.clone(),
                transaction_id: transaction_id.to_string(),
            });
        };

        let held = current
            .lock
            .as_ref()
            .is_some_and(|l| l.transaction_id == transaction_id);
        if !held {
            return Err(StoreError::LockNotHeld {
                resource: doc.id.clone(),
                transaction_id: transaction_id.to_string(),
            });
        }
        if current.version + 1 != doc.version {
            return Err(StoreError::VersionConflict {
                resource: doc.id.clone(),
                expected: doc.version.saturating_sub(1),
                found: current.version,
            });
        }

        let lock = current.lock.take();
        *current = doc.clone();
        current.lock = lock;
        Ok(())
    }

    async fn restore(
        &self,
        pod: &str,
        id: &ResourceId,
        original: Option<BaseDocument>,
        transaction_id: &str,
    ) -> StoreResult<()> {
        let key = Self::key(pod, id);
        let Some(mut current) = self.documents.get_mut(&key) else {
            return Err(StoreError::LockNotHeld {
                resource: id.clone(),
                transaction_id: transaction_id.to_string(),
            });
        };
        let held = current
            .lock
            .as_ref()
            .is_some_and(|l| l.transaction_id == transaction_id);
        if !held {
            return Err(StoreError::LockNotHeld {
                resource: id.clone(),
                transaction_id: transaction_id.to_string(),
            });
        }

        // a missing original leaves a placeholder that unlock removes
        let lock = current.lock.take();
        *current = original.unwrap_or_else(|| BaseDocument::new(id.clone()));
        current.lock = lock;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Lockable for MemoryStore {
    async fn try_lock(
        &self,
        pod: &str,
        id: &ResourceId,
        transaction_id: &str,
        lease: Duration,
    ) -> StoreResult<LockOutcome> {
        let now = Utc::now();
        let mut entry = self
            .documents
            .entry(Self::key(pod, id))
            .or_insert_with(|| BaseDocument::new(id.clone()));
        let doc = entry.value_mut();
        let fresh = DocumentLock {
            transaction_id: transaction_id.to_string(),
            locked_at: now,
        };

        match doc.lock.clone() {
            None => {
                doc.lock = Some(fresh);
                Ok(LockOutcome::Acquired)
            }
            Some(existing) if existing.transaction_id == transaction_id => Ok(LockOutcome::Acquired),
            Some(existing) if now - existing.locked_at > lease_delta(lease) => {
                doc.lock = Some(fresh);
                Ok(LockOutcome::Stolen { previous: existing })
            }
            Some(existing) => Ok(LockOutcome::Held { holder: existing }),
        }
    }

    async fn unlock(&self, pod: &str, id: &ResourceId, transaction_id: &str) -> StoreResult<bool> {
        let key = Self::key(pod, id);
        let placeholder = {
            let Some(mut doc) = self.documents.get_mut(&key) else {
                return Ok(false);
            };
            let held = doc
                .lock
                .as_ref()
                .is_some_and(|l| l.transaction_id == transaction_id);
            if !held {
                return Ok(false);
            }
            doc.lock = None;
            doc.is_placeholder()
        };

        if placeholder {
            self.documents
                .remove_if(&key, |_, d| d.is_placeholder() && d.lock.is_none());
        }
        Ok(true)
    }
}

#[async_trait::async_trait]
impl CompositeDocuments for MemoryStore {
    async fn upsert_composite(&self, collection: &str, doc: CompositeDocument) -> StoreResult<()> {
        self.composites
            .write()
            .entry(collection.to_string())
            .or_default()
            .upsert(doc);
        Ok(())
    }

    async fn get_composite(
        &self,
        collection: &str,
        id: &CompositeId,
    ) -> StoreResult<Option<CompositeDocument>> {
        Ok(self.composites.read().get(collection).and_then(|t| t.get(id)))
    }

    async fn delete_composite(&self, collection: &str, id: &CompositeId) -> StoreResult<bool> {
        Ok(self
            .composites
            .write()
            .get_mut(collection)
            .is_some_and(|t| t.delete(id)))
    }

    async fn find_impacted(
        &self,
        collection: &str,
        resources: &[ResourceId],
    ) -> StoreResult<Vec<CompositeDocument>> {
        Ok(self
            .composites
            .read()
            .get(collection)
            .map(|t| t.impacted(resources))
            .unwrap_or_default())
    }

    async fn find_by_spec(&self, collection: &str, spec: &str) -> StoreResult<Vec<CompositeDocument>> {
        Ok(self
            .composites
            .read()
            .get(collection)
            .map(|t| t.by_spec(spec))
            .unwrap_or_default())
    }

    async fn find_by_resource(
        &self,
        collection: &str,
        resource: &ResourceId,
    ) -> StoreResult<Vec<CompositeDocument>> {
        Ok(self
            .composites
            .read()
            .get(collection)
            .map(|t| t.by_resource(resource))
            .unwrap_or_default())
    }

    async fn delete_stale(
        &self,
        collection: &str,
        spec: &str,
        before: DateTime<Utc>,
    ) -> StoreResult<usize> {
        Ok(self
            .composites
            .write()
            .get_mut(collection)
            .map_or(0, |t| t.delete_stale(spec, before)))
    }

    async fn ensure_indexes(
        &self,
        collection: &str,
        indexes: &[serde_json::Value],
    ) -> StoreResult<usize> {
        let mut all = self.indexes.write();
        let existing = all.entry(collection.to_string()).or_default();
        let mut created = 0;
        for index in indexes {
            if !existing.contains(index) {
                existing.push(index.clone());
                created += 1;
            }
        }
        Ok(created)
    }
}

#[async_trait::async_trait]
impl TransactionLog for MemoryStore {
    async fn insert_transaction(&self, record: &TransactionRecord) -> StoreResult<()> {
        match self.transactions.entry(record.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(StoreError::DuplicateTransaction(record.id.clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(())
            }
        }
    }

    async fn set_transaction_status(
        &self,
        id: &str,
        status: TransactionStatus,
        reason: Option<String>,
    ) -> StoreResult<()> {
        let mut record = self
            .transactions
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownTransaction(id.to_string()))?;
        record.status = status;
        record.updated_at = Utc::now();
        if reason.is_some() {
            record.failure_reason = reason;
        }
        Ok(())
    }

    async fn get_transaction(&self, id: &str) -> StoreResult<Option<TransactionRecord>> {
        Ok(self.transactions.get(id).map(|r| r.value().clone()))
    }
}

#[async_trait::async_trait]
impl JobGroups for MemoryStore {
    async fn create_job_group(&self, group: JobGroup) -> StoreResult<()> {
        self.job_groups.insert(group.id.clone(), group);
        Ok(())
    }

    async fn decrement_job_group(&self, id: &str, by: i64) -> StoreResult<i64> {
        let mut group = self
            .job_groups
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownJobGroup(id.to_string()))?;
        group.count -= by;
        Ok(group.count)
    }

    async fn mark_job_group_incomplete(&self, id: &str) -> StoreResult<()> {
        let mut group = self
            .job_groups
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownJobGroup(id.to_string()))?;
        group.incomplete = true;
        Ok(())
    }

    async fn get_job_group(&self, id: &str) -> StoreResult<Option<JobGroup>> {
        Ok(self.job_groups.get(id).map(|g| g.value().clone()))
    }

    async fn delete_job_group(&self, id: &str) -> StoreResult<bool> {
        Ok(self.job_groups.remove(id).is_some())
    }
}
