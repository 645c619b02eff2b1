//! Strata Specifications
//!
//! Declarative definitions of views, table rows and search documents, the
//! computed-field expression language, and the runtime configuration that
//! carries them.
//!
//! # Example
//!
//! ```rust
//! use strata_spec::{CompositeKind, Config};
//!
//! let config = Config::from_json_str(r#"{
//!     "default_context": "http://talisaspire.com/",
//!     "stores": {"main": {
//!         "pods": ["CBD_resources"],
//!         "table_specifications": [{
//!             "_id": "t_resource", "type": "bibo:Book", "from": "CBD_resources",
//!             "fields": [{"fieldName": "type", "predicates": ["rdf:type"]}]
//!         }]
//!     }}
//! }"#).unwrap();
//!
//! let registries = config.registries().unwrap();
//! let spec = registries["main"].require("t_resource").unwrap();
//! assert_eq!(spec.kind, CompositeKind::Table);
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod config;
pub mod error;
pub mod expression;
pub mod registry;
pub mod spec;

pub use config::{AsyncOperations, Config, QueueConfig, StoreConfig, TransactionConfig};
pub use error::{SpecError, SpecResult};
pub use expression::{
    evaluate_computed_fields, is_truthy, validate_computed_fields, ComputedField, Expression,
    ExpressionError,
};
pub use registry::{RegisteredSpec, SpecRegistry};
pub use spec::{
    CompositeKind, CountSpec, FieldSpec, FilterCondition, JoinSpec, PredicateSet, Specification,
    LINK_VALUE,
};

/// Version of the strata-spec crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
