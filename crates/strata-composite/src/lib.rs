//! Strata Composites
//!
//! Derived documents built from base resources: graph-shaped views,
//! flattened table rows and search documents. All three implement
//! [`CompositeSpecification`], which provides impact resolution and
//! regeneration on top of a small per-kind storage and shaping surface.
//!
//! # Example
//!
//! ```rust,ignore
//! let tables = TableComposite::new(sources);
//! for subject in tables.impacted_subjects(pod, &changes, context).await? {
//!     tables.update(&subject).await?;
//! }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod composite;
pub mod error;
pub mod extract;
mod impact;
mod materialize;
pub mod search;
pub mod set;
pub mod subject;
pub mod table;
pub mod view;

pub use composite::{CompositeSpecification, Outcome, Sources, UpdateReport};
pub use error::{CompositeError, CompositeResult};
pub use extract::JoinedResources;
pub use search::SearchComposite;
pub use set::Composites;
pub use subject::{merge_subjects, ImpactedSubject};
pub use table::TableComposite;
pub use view::ViewComposite;

/// Version of the strata-composite crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
