//! Transaction records and job groups

use crate::document::BaseDocument;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strata_graph::SubjectChange;

/// Lifecycle of a transaction record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    /// Written before any base document mutation
    Pending,
    /// All mutations applied and locks released
    Committed,
    /// Rolled back after a failure
    Failed,
    /// Aborted before mutating anything (lock contention)
    Cancelled,
}

impl TransactionStatus {
    /// Whether the record can no longer change
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Write-ahead record of one `save_changes` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Transaction id
    #[serde(rename = "_id")]
    pub id: String,
    /// Current status
    pub status: TransactionStatus,
    /// Store the transaction wrote to
    pub store: String,
    /// Base document collection the transaction wrote to
    pub pod: String,
    /// Context of every touched document
    pub context: String,
    /// Caller supplied description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Per-subject add/remove change-set
    pub changes: BTreeMap<String, SubjectChange>,
    /// Documents as they were before mutation; `None` when absent
    #[serde(default)]
    pub originals: BTreeMap<String, Option<BaseDocument>>,
    /// When the record was written
    pub created_at: DateTime<Utc>,
    /// When the status last changed
    pub updated_at: DateTime<Utc>,
    /// Why the transaction failed or was cancelled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl TransactionRecord {
    /// New pending record
    #[must_use]
    pub fn pending(
        id: impl Into<String>,
        store: impl Into<String>,
        pod: impl Into<String>,
        context: impl Into<String>,
        changes: BTreeMap<String, SubjectChange>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: TransactionStatus::Pending,
            store: store.into(),
            pod: pod.into(),
            context: context.into(),
            description: None,
            changes,
            originals: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            failure_reason: None,
        }
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }
}

/// Outstanding-job counter for one fan-out batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobGroup {
    /// Batch id shared by every job in the fan-out
    #[serde(rename = "_id")]
    pub id: String,
    /// Jobs not yet completed
    pub count: i64,
    /// Spec ids the batch was generating
    pub spec_ids: Vec<String>,
    /// Store the batch runs against
    pub store: String,
    /// When the batch was created; cleanup only removes older documents
    pub created_at: DateTime<Utc>,
    /// Some jobs were never enqueued, so unvisited documents are not stale
    #[serde(default)]
    pub incomplete: bool,
}

impl JobGroup {
    /// New group expecting `count` completions
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        count: i64,
        spec_ids: Vec<String>,
        store: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            count,
            spec_ids,
            store: store.into(),
            created_at,
            incomplete: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&TransactionStatus::Committed).unwrap();
        assert_eq!(json, "\"committed\"");
        assert!(TransactionStatus::Failed.is_terminal());
        assert!(!TransactionStatus::Pending.is_terminal());
    }
}
