//! Job queue transport

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Opaque handle returned by a successful enqueue
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobToken(pub String);

impl fmt::Display for JobToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport-level failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Queue backend unreachable
    #[error("queue unavailable: {0}")]
    Unavailable(String),
    /// Backend refused the payload
    #[error("job rejected: {0}")]
    Rejected(String),
}

/// Queue submission seam
#[async_trait::async_trait]
pub trait JobTransport: Send + Sync {
    /// Submit `payload` to `queue`
    async fn enqueue(&self, queue: &str, payload: serde_json::Value) -> Result<JobToken, TransportError>;

    /// Whether a submitted job is known to the backend
    async fn status(&self, token: &JobToken) -> Result<bool, TransportError>;
}

/// A job accepted by [`MemoryTransport`]
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueuedJob {
    /// Target queue
    pub queue: String,
    /// Serialized job
    pub payload: serde_json::Value,
    /// Token handed back to the submitter
    pub token: JobToken,
}

/// In-process transport recording every accepted job
#[derive(Debug)]
pub struct MemoryTransport {
    jobs: Mutex<Vec<EnqueuedJob>>,
    statuses: Mutex<HashMap<JobToken, bool>>,
    accepted_before_failures: AtomicUsize,
    failures_pending: AtomicUsize,
    report_missing: AtomicBool,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            statuses: Mutex::new(HashMap::new()),
            accepted_before_failures: AtomicUsize::new(0),
            failures_pending: AtomicUsize::new(0),
            report_missing: AtomicBool::new(false),
        }
    }
}

impl MemoryTransport {
    /// Create an empty transport
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` enqueue calls with [`TransportError::Unavailable`]
    pub fn fail_next_enqueues(&self, n: usize) {
        self.fail_enqueues_after(0, n);
    }

    /// Accept `accepted` more enqueues, then fail the following `n`
    pub fn fail_enqueues_after(&self, accepted: usize, n: usize) {
        self.accepted_before_failures.store(accepted, Ordering::SeqCst);
        self.failures_pending.store(n, Ordering::SeqCst);
    }

    /// Make status checks report jobs as missing
    pub fn report_missing(&self, missing: bool) {
        self.report_missing.store(missing, Ordering::SeqCst);
    }

    /// Snapshot of accepted jobs
    #[must_use]
    pub fn jobs(&self) -> Vec<EnqueuedJob> {
        self.jobs.lock().clone()
    }

    /// Remove and return every accepted job
    pub fn drain(&self) -> Vec<EnqueuedJob> {
        std::mem::take(&mut *self.jobs.lock())
    }

    /// Number of accepted jobs not yet drained
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Whether nothing is waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl JobTransport for MemoryTransport {
    async fn enqueue(&self, queue: &str, payload: serde_json::Value) -> Result<JobToken, TransportError> {
        let spared = self
            .accepted_before_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let failing = !spared
            && self
                .failures_pending
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if failing {
            return Err(TransportError::Unavailable(format!("queue {queue} is down")));
        }

        let token = JobToken(uuid::Uuid::new_v4().to_string());
        self.statuses.lock().insert(token.clone(), true);
        self.jobs.lock().push(EnqueuedJob {
            queue: queue.to_string(),
            payload,
            token: token.clone(),
        });
        tracing::trace!(%queue, %token, "job enqueued");
        Ok(token)
    }

    async fn status(&self, token: &JobToken) -> Result<bool, TransportError> {
        if self.report_missing.load(Ordering::SeqCst) {
            return Ok(false);
        }
        Ok(self.statuses.lock().get(token).copied().unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let transport = MemoryTransport::new();
        transport.fail_next_enqueues(2);

        assert!(transport.enqueue("q", serde_json::json!({})).await.is_err());
        assert!(transport.enqueue("q", serde_json::json!({})).await.is_err());
        let token = transport.enqueue("q", serde_json::json!({"n": 1})).await.unwrap();

        assert!(transport.status(&token).await.unwrap());
        assert_eq!(transport.len(), 1);
        assert_eq!(transport.drain()[0].payload["n"], 1);
        assert!(transport.is_empty());
    }

    #[tokio::test]
    async fn failures_can_start_after_accepted_jobs() {
        let transport = MemoryTransport::new();
        transport.fail_enqueues_after(1, 1);

        assert!(transport.enqueue("q", serde_json::json!({})).await.is_ok());
        assert!(transport.enqueue("q", serde_json::json!({})).await.is_err());
        assert!(transport.enqueue("q", serde_json::json!({})).await.is_ok());
        assert_eq!(transport.len(), 2);
    }
}
