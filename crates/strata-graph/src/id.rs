//! Compound document identities
//!
//! Every base document is keyed by `{r, c}` (resource, context); derived
//! documents add the spec id as `type`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one subject's base document
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    /// Resource URI
    #[serde(rename = "r")]
    pub resource: String,
    /// Context (named graph) URI
    #[serde(rename = "c")]
    pub context: String,
}

impl ResourceId {
    /// Create a new resource id
    #[inline]
    #[must_use]
    pub fn new(resource: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            context: context.into(),
        }
    }

    /// Key a derived document of `spec` on this resource
    #[inline]
    #[must_use]
    pub fn composite(&self, spec: impl Into<String>) -> CompositeId {
        CompositeId {
            resource: self.resource.clone(),
            context: self.context.clone(),
            spec: spec.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}> in <{}>", self.resource, self.context)
    }
}

/// Identity of a derived (composite) document
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CompositeId {
    /// Resource URI
    #[serde(rename = "r")]
    pub resource: String,
    /// Context URI
    #[serde(rename = "c")]
    pub context: String,
    /// Spec id the document was generated from
    #[serde(rename = "type")]
    pub spec: String,
}

impl CompositeId {
    /// The base document this composite is rooted at
    #[inline]
    #[must_use]
    pub fn resource_id(&self) -> ResourceId {
        ResourceId::new(self.resource.clone(), self.context.clone())
    }
}

impl fmt::Display for CompositeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:<{}> in <{}>", self.spec, self.resource, self.context)
    }
}
