//! Per-document lock acquisition across a batch of subjects

use crate::error::{StrataError, StrataResult};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use strata_graph::ResourceId;
use strata_spec::TransactionConfig;
use strata_store::{DocumentStore, LockOutcome};

/// Acquires and releases the lock field of base documents
#[derive(Clone)]
pub struct LockManager {
    documents: Arc<dyn DocumentStore>,
    config: TransactionConfig,
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn jitter(max_ms: u64) -> Duration {
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

impl LockManager {
    /// Create a lock manager
    #[must_use]
    pub fn new(documents: Arc<dyn DocumentStore>, config: TransactionConfig) -> Self {
        Self { documents, config }
    }

    /// Lock settings in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    async fn lock_one(&self, pod: &str, id: &ResourceId, transaction_id: &str) -> StrataResult<bool> {
        let attempts = self.config.lock_attempts.max(1);
        for attempt in 1..=attempts {
            match self
                .documents
                .try_lock(pod, id, transaction_id, self.config.lease())
                .await?
            {
                LockOutcome::Acquired => return Ok(true),
                LockOutcome::Stolen { previous } => {
                    tracing::warn!(
                        resource = %id,
                        transaction_id,
                        abandoned_by = %previous.transaction_id,
                        locked_at = %previous.locked_at,
                        "stole expired lock"
                    );
                    return Ok(true);
                }
                LockOutcome::Held { holder } => {
                    metrics::counter!("strata.lock.contention").increment(1);
                    tracing::debug!(
                        resource = %id,
                        transaction_id,
                        holder = %holder.transaction_id,
                        attempt,
                        "document locked, retrying"
                    );
                    if attempt < attempts {
                        let base = self.config.backoff() * attempt;
                        let delay = base + jitter(self.config.lock_backoff_ms);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Ok(false)
    }

    /// Lock every id in order, or none of them
    ///
    /// Ids are sorted and deduplicated first so overlapping batches acquire
    /// in the same order. Returns the locked ids.
    ///
    /// # Errors
    /// [`StrataError::LockContention`] naming the first id that stayed
    /// locked; locks taken before it are released
    pub async fn lock_all(
        &self,
        pod: &str,
        ids: &[ResourceId],
        transaction_id: &str,
    ) -> StrataResult<Vec<ResourceId>> {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();

        let mut locked = Vec::with_capacity(ids.len());
        for id in ids {
            let acquired = match self.lock_one(pod, &id, transaction_id).await {
                Ok(acquired) => acquired,
                Err(e) => {
                    self.unlock_all(pod, &locked, transaction_id).await;
                    return Err(e);
                }
            };
            if !acquired {
                self.unlock_all(pod, &locked, transaction_id).await;
                return Err(StrataError::LockContention {
                    resource: id.to_string(),
                    attempts: self.config.lock_attempts.max(1),
                    transaction_id: transaction_id.to_string(),
                });
            }
            locked.push(id);
        }
        Ok(locked)
    }

    /// Release locks held by `transaction_id`; failures are logged
    pub async fn unlock_all(&self, pod: &str, ids: &[ResourceId], transaction_id: &str) {
        for id in ids {
            match self.documents.unlock(pod, id, transaction_id).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(resource = %id, transaction_id, "lock was no longer held");
                }
                Err(e) => {
                    tracing::error!(resource = %id, transaction_id, error = %e, "failed to release lock");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_store::{BaseDocuments, MemoryStore};

    fn manager(store: Arc<MemoryStore>, attempts: u32) -> LockManager {
        let config = TransactionConfig {
            lock_attempts: attempts,
            lock_backoff_ms: 0,
            ..TransactionConfig::default()
        };
        LockManager::new(store, config)
    }

    #[tokio::test]
    async fn lock_all_sorts_and_dedups() {
        let store = Arc::new(MemoryStore::new());
        let locks = manager(store.clone(), 3);
        let b = ResourceId::new("http://example.com/b", "ctx");
        let a = ResourceId::new("http://example.com/a", "ctx");

        let locked = locks
            .lock_all("CBD_testing", &[b.clone(), a.clone(), b.clone()], "t1")
            .await
            .unwrap();
        assert_eq!(locked, vec![a.clone(), b.clone()]);

        let doc = store.find("CBD_testing", &a).await.unwrap().unwrap();
        assert_eq!(doc.lock.unwrap().transaction_id, "t1");

        locks.unlock_all("CBD_testing", &locked, "t1").await;
        assert!(store.find("CBD_testing", &a).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn contention_releases_earlier_locks() {
        let store = Arc::new(MemoryStore::new());
        let locks = manager(store.clone(), 2);
        let a = ResourceId::new("http://example.com/a", "ctx");
        let b = ResourceId::new("http://example.com/b", "ctx");

        locks.lock_all("CBD_testing", &[b.clone()], "holder").await.unwrap();
        let err = locks
            .lock_all("CBD_testing", &[a.clone(), b.clone()], "t2")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        match err {
            StrataError::LockContention { resource, attempts, .. } => {
                assert_eq!(resource, b.to_string());
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
        // a was released again
        assert!(store.find("CBD_testing", &a).await.unwrap().is_none());
    }
}
