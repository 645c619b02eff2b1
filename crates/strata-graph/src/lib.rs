//! Strata Graph
//!
//! The graph collaborator consumed by the rest of the workspace:
//!
//! - [`ResourceId`] / [`CompositeId`]: compound document keys
//! - [`MemoryGraph`]: an immutable-per-call triple set
//! - [`GraphDiff`]: per-subject additions and removals between two graphs
//!
//! # Example
//!
//! ```rust
//! use strata_graph::{GraphDiff, MemoryGraph, Object};
//!
//! let old = MemoryGraph::new();
//! let mut new = MemoryGraph::new();
//! new.add_triple("http://example.com/doc1", "rdf:type", Object::uri("bibo:Book"))
//!     .unwrap();
//!
//! let diff = GraphDiff::between(&old, &new);
//! let changed = diff.changed_predicates();
//! assert_eq!(changed["http://example.com/doc1"], vec!["rdf:type".to_string()]);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

mod diff;
mod error;
mod graph;
mod id;

pub use diff::{ChangedPredicates, GraphDiff, SubjectChange};
pub use error::GraphError;
pub use graph::{MemoryGraph, Object, PredicateMap, Triple};
pub use id::{CompositeId, ResourceId};

/// Predicate carrying a resource's class membership
pub const RDF_TYPE: &str = "rdf:type";

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
