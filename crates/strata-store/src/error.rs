//! Error types for store operations

use strata_graph::ResourceId;

/// Errors raised by document store backends
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Write attempted without holding the document lock
    #[error("lock on {resource} is not held by transaction {transaction_id}")]
    LockNotHeld {
        /// Document the write targeted
        resource: ResourceId,
        /// Transaction that attempted the write
        transaction_id: String,
    },

    /// Stored version differs from the one the write was based on
    #[error("version conflict on {resource}: expected {expected}, found {found}")]
    VersionConflict {
        /// Document the write targeted
        resource: ResourceId,
        /// Version the writer read
        expected: u64,
        /// Version currently stored
        found: u64,
    },

    /// A removal referenced a triple the document does not hold
    #[error("{resource} has no triple {predicate} {value:?} to remove")]
    MissingTriple {
        /// Document the change targeted
        resource: ResourceId,
        /// Predicate of the missing triple
        predicate: String,
        /// Object value of the missing triple
        value: String,
    },

    /// Transaction id already recorded
    #[error("transaction {0} already exists")]
    DuplicateTransaction(String),

    /// Transaction id not recorded
    #[error("unknown transaction {0}")]
    UnknownTransaction(String),

    /// Job group id not recorded
    #[error("unknown job group {0}")]
    UnknownJobGroup(String),

    /// Backend-specific failure
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;
