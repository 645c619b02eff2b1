//! Error types for graph construction

/// Errors raised while building a graph
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Subject URI was empty
    #[error("subject must not be empty")]
    EmptySubject,

    /// Predicate was empty
    #[error("predicate must not be empty (subject {subject})")]
    EmptyPredicate {
        /// Subject the triple was being added to
        subject: String,
    },

    /// URI objects must carry a value
    #[error("uri object must not be empty ({subject} {predicate})")]
    EmptyUriObject {
        /// Subject of the rejected triple
        subject: String,
        /// Predicate of the rejected triple
        predicate: String,
    },
}
