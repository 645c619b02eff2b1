//! Materialization errors

use strata_spec::{ExpressionError, SpecError};
use strata_store::StoreError;

/// Errors raised while resolving impact or building composites
#[derive(Debug, thiserror::Error)]
pub enum CompositeError {
    /// A required join points at a resource that does not exist
    #[error("{spec} for {resource}: joined resource {target} via {predicate} does not exist")]
    MissingJoin {
        /// Root resource
        resource: String,
        /// Spec id
        spec: String,
        /// Join predicate
        predicate: String,
        /// Missing target
        target: String,
    },

    /// A computed field failed on this row's data
    #[error("{spec} for {resource}: computed field '{field}' failed: {source}")]
    Expression {
        /// Root resource
        resource: String,
        /// Spec id
        spec: String,
        /// Field being computed
        field: String,
        /// Underlying error
        #[source]
        source: ExpressionError,
    },

    /// Any other per-build problem
    #[error("{spec} for {resource}: {message}")]
    Build {
        /// Root resource
        resource: String,
        /// Spec id
        spec: String,
        /// Description
        message: String,
    },

    /// Store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Unknown or invalid spec
    #[error(transparent)]
    Spec(#[from] SpecError),
}

impl CompositeError {
    /// Whether the failure is confined to one (resource, spec) build
    #[inline]
    #[must_use]
    pub fn is_materialization(&self) -> bool {
        matches!(
            self,
            Self::MissingJoin { .. } | Self::Expression { .. } | Self::Build { .. }
        )
    }
}

/// Result alias for this crate
pub type CompositeResult<T> = Result<T, CompositeError>;
