//! Error taxonomy
//!
//! Every failure a caller can observe maps to one variant:
//! - configuration problems, fatal before any side effect
//! - lock contention, the expected recoverable case
//! - transaction failures, after a full rollback
//! - queuing failures, after the enqueue retries ran out
//! - materialization failures, confined to one (resource, spec) build
//! - search input errors, never retried

use strata_composite::CompositeError;
use strata_spec::SpecError;
use strata_store::{SearchQueryError, StoreError};

/// Main Strata error type
#[derive(Debug, thiserror::Error)]
pub enum StrataError {
    /// Missing or invalid specification or configuration
    #[error("configuration error: {0}")]
    Configuration(#[from] SpecError),

    /// Job payload missing a required argument or malformed
    #[error("invalid job: {0}")]
    JobArgument(String),

    /// A document stayed locked by another transaction through every attempt
    ///
    /// Raised by [`crate::LockManager`]; a save reports it as
    /// [`StrataError::TransactionFailure`] with this message as the reason.
    #[error("lock contention on {resource} after {attempts} attempts (transaction {transaction_id})")]
    LockContention {
        /// Contended resource
        resource: String,
        /// Attempts made
        attempts: u32,
        /// Transaction that gave up
        transaction_id: String,
    },

    /// The transaction was rolled back
    #[error("transaction {transaction_id} failed: {reason}")]
    TransactionFailure {
        /// Transaction id
        transaction_id: String,
        /// What went wrong
        reason: String,
    },

    /// A job could not be enqueued
    #[error("failed to enqueue job on '{queue}' after {attempts} attempts: {last_error}")]
    Queuing {
        /// Target queue
        queue: String,
        /// Attempts made
        attempts: u32,
        /// The last underlying error
        last_error: String,
    },

    /// One derived document could not be built
    #[error("materialization failed: {0}")]
    Materialization(#[source] CompositeError),

    /// Invalid search input
    #[error("invalid search query: {0}")]
    SearchQuery(#[from] SearchQueryError),

    /// Store failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<CompositeError> for StrataError {
    fn from(e: CompositeError) -> Self {
        match e {
            CompositeError::Store(s) => Self::Store(s),
            CompositeError::Spec(s) => Self::Configuration(s),
            other => Self::Materialization(other),
        }
    }
}

impl StrataError {
    /// Check if the caller may resubmit
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockContention { .. } | Self::Queuing { .. })
    }

    /// Check if the error signals a broken invariant or bad configuration
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::JobArgument(_) | Self::TransactionFailure { .. }
        )
    }

    /// Check if this is a configuration error
    #[inline]
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::JobArgument(_))
    }
}

/// Result alias for this crate
pub type StrataResult<T> = Result<T, StrataError>;
