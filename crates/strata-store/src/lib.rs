//! Strata Store
//!
//! The persistence seams of the pipeline. Only atomic per-document
//! primitives are assumed of a backend:
//!
//! - [`BaseDocuments`]: base document reads and lock-guarded writes
//! - [`Lockable`]: insert-if-absent document locks with a lease
//! - [`CompositeDocuments`]: derived documents and their impact indexes
//! - [`TransactionLog`]: append-only transaction records
//! - [`JobGroups`]: atomically decrementable batch counters
//! - [`SearchProvider`]: search document indexing and querying
//! - [`JobTransport`]: queue submission and status polling
//!
//! [`MemoryStore`], [`MemorySearchProvider`] and [`MemoryTransport`] are
//! complete in-process implementations used by tests and single-node
//! deployments.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod document;
mod error;
mod memory;
mod record;
mod search;
mod store;
mod transport;

pub use document::{BaseDocument, CompositeDocument, DocumentLock};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use record::{JobGroup, TransactionRecord, TransactionStatus};
pub use search::{
    tokenize, MemorySearchProvider, SearchHead, SearchProvider, SearchQuery, SearchQueryError,
    SearchResults,
};
pub use store::{BaseDocuments, CompositeDocuments, DocumentStore, JobGroups, LockOutcome, Lockable, TransactionLog};
pub use transport::{EnqueuedJob, JobToken, JobTransport, MemoryTransport, TransportError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
