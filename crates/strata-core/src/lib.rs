//! Strata Core
//!
//! The write pipeline and its orchestration:
//! - [`TransactionCoordinator`] applies graph diffs to base documents under
//!   per-document locks, with a write-ahead record and rollback
//! - [`OperationQueue`] routes impacted subjects to queues and submits jobs
//! - [`JobRunner`] performs discovery, regeneration, backfill and revision
//!   maintenance jobs
//! - [`Driver`] is the facade tying them to a [`Config`](strata_spec::Config)
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_core::Driver;
//!
//! # async fn example(config: strata_spec::Config) -> strata_core::StrataResult<()> {
//! let driver = Driver::new(config, documents, provider, transport).await?;
//! let outcome = driver
//!     .save_changes("tripod_php_testing", "CBD_testing", &old, &new, None, None)
//!     .await?;
//! println!("committed {:?}", outcome.transaction_id);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod driver;
pub mod error;
pub mod inspect;
pub mod jobs;
pub mod lock;
pub mod queue;
pub mod runner;
pub mod services;
pub mod transaction;

pub use driver::Driver;
pub use error::{StrataError, StrataResult};
pub use jobs::Job;
pub use lock::LockManager;
pub use queue::OperationQueue;
pub use runner::{JobReport, JobRunner};
pub use services::{Services, StoreServices};
pub use transaction::{transaction_id, SaveOutcome, TransactionCoordinator};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Strata
    pub use crate::{Driver, Job, JobRunner, SaveOutcome, StrataError, StrataResult};
    pub use strata_composite::{CompositeSpecification, ImpactedSubject};
    pub use strata_graph::{MemoryGraph, Object, ResourceId};
    pub use strata_spec::{CompositeKind, Config};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
