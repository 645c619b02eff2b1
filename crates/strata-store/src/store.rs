//! Capability traits implemented by document store backends
//!
//! Components depend on the narrowest capability they need; [`DocumentStore`]
//! is the union a complete backend provides.

use crate::document::{BaseDocument, CompositeDocument, DocumentLock};
use crate::error::StoreResult;
use crate::record::{JobGroup, TransactionRecord, TransactionStatus};
use chrono::{DateTime, Utc};
use std::time::Duration;
use strata_graph::{CompositeId, ResourceId};

/// Result of a single lock attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// The lock was free and is now held
    Acquired,
    /// An expired lease was taken over
    Stolen {
        /// The abandoned lock
        previous: DocumentLock,
    },
    /// Another live transaction holds the lock
    Held {
        /// Current holder
        holder: DocumentLock,
    },
}

impl LockOutcome {
    /// Whether the caller now holds the lock
    #[inline]
    #[must_use]
    pub fn is_held_by_caller(&self) -> bool {
        !matches!(self, Self::Held { .. })
    }
}

/// Base document reads and lock-guarded writes
#[async_trait::async_trait]
pub trait BaseDocuments: Send + Sync {
    /// Fetch one document; placeholders created only for locking are
    /// returned as-is
    async fn find(&self, pod: &str, id: &ResourceId) -> StoreResult<Option<BaseDocument>>;

    /// Every non-placeholder document in `context` carrying one of `rdf_types`
    async fn find_by_type(
        &self,
        pod: &str,
        context: &str,
        rdf_types: &[String],
    ) -> StoreResult<Vec<BaseDocument>>;

    /// Write `doc` while holding its lock
    ///
    /// Succeeds only if `transaction_id` holds the lock and the stored
    /// version is `doc.version - 1`. The lock is preserved.
    async fn save_locked(
        &self,
        pod: &str,
        doc: &BaseDocument,
        transaction_id: &str,
    ) -> StoreResult<()>;

    /// Put back a pre-transaction snapshot (`None` deletes)
    ///
    /// Succeeds only while `transaction_id` still holds the lock; a document
    /// whose lease was taken over keeps the new holder's writes. The lock is
    /// preserved.
    async fn restore(
        &self,
        pod: &str,
        id: &ResourceId,
        original: Option<BaseDocument>,
        transaction_id: &str,
    ) -> StoreResult<()>;
}

/// Per-document mutual exclusion
#[async_trait::async_trait]
pub trait Lockable: Send + Sync {
    /// Insert-if-absent lock acquisition
    ///
    /// A missing document is created as a placeholder carrying the lock.
    /// A lock older than `lease` is treated as abandoned and stolen.
    async fn try_lock(
        &self,
        pod: &str,
        id: &ResourceId,
        transaction_id: &str,
        lease: Duration,
    ) -> StoreResult<LockOutcome>;

    /// Release a lock held by `transaction_id`; returns `false` if it was
    /// not held. Placeholders are removed on release.
    async fn unlock(&self, pod: &str, id: &ResourceId, transaction_id: &str) -> StoreResult<bool>;
}

/// Derived document persistence
#[async_trait::async_trait]
pub trait CompositeDocuments: Send + Sync {
    /// Insert or replace by `_id`
    async fn upsert_composite(&self, collection: &str, doc: CompositeDocument) -> StoreResult<()>;

    /// Fetch by `_id`
    async fn get_composite(
        &self,
        collection: &str,
        id: &CompositeId,
    ) -> StoreResult<Option<CompositeDocument>>;

    /// Delete by `_id`; returns whether it existed
    async fn delete_composite(&self, collection: &str, id: &CompositeId) -> StoreResult<bool>;

    /// Documents whose impact index contains any of `resources`
    async fn find_impacted(
        &self,
        collection: &str,
        resources: &[ResourceId],
    ) -> StoreResult<Vec<CompositeDocument>>;

    /// Documents generated from `spec`
    async fn find_by_spec(&self, collection: &str, spec: &str) -> StoreResult<Vec<CompositeDocument>>;

    /// Documents rooted at `resource`, any spec
    async fn find_by_resource(
        &self,
        collection: &str,
        resource: &ResourceId,
    ) -> StoreResult<Vec<CompositeDocument>>;

    /// Delete documents of `spec` last generated before `before`
    async fn delete_stale(
        &self,
        collection: &str,
        spec: &str,
        before: DateTime<Utc>,
    ) -> StoreResult<usize>;

    /// Create indexes declared by a spec; returns how many were new
    async fn ensure_indexes(
        &self,
        collection: &str,
        indexes: &[serde_json::Value],
    ) -> StoreResult<usize>;
}

/// Append-only transaction records
#[async_trait::async_trait]
pub trait TransactionLog: Send + Sync {
    /// Write a new record
    async fn insert_transaction(&self, record: &TransactionRecord) -> StoreResult<()>;

    /// Move a record to `status`
    async fn set_transaction_status(
        &self,
        id: &str,
        status: TransactionStatus,
        reason: Option<String>,
    ) -> StoreResult<()>;

    /// Fetch a record
    async fn get_transaction(&self, id: &str) -> StoreResult<Option<TransactionRecord>>;
}

/// Batch completion counters
#[async_trait::async_trait]
pub trait JobGroups: Send + Sync {
    /// Create (or reset) a group
    async fn create_job_group(&self, group: JobGroup) -> StoreResult<()>;

    /// Atomically subtract `by` and return the remaining count
    async fn decrement_job_group(&self, id: &str, by: i64) -> StoreResult<i64>;

    /// Flag a group whose fan-out stopped part way
    async fn mark_job_group_incomplete(&self, id: &str) -> StoreResult<()>;

    /// Fetch a group
    async fn get_job_group(&self, id: &str) -> StoreResult<Option<JobGroup>>;

    /// Forget a finished group; `false` when absent
    async fn delete_job_group(&self, id: &str) -> StoreResult<bool>;
}

/// A complete document store backend
pub trait DocumentStore:
    BaseDocuments + Lockable + CompositeDocuments + TransactionLog + JobGroups
{
}

impl<T> DocumentStore for T where
    T: BaseDocuments + Lockable + CompositeDocuments + TransactionLog + JobGroups
{
}
