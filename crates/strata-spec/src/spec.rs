//! Declarative composite specifications
//!
//! A specification describes how one derived document is built from a base
//! resource and the resources it joins to. The same structure serves views,
//! table rows and search documents; [`CompositeKind`] says which.

use crate::expression::ComputedField;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use strata_graph::RDF_TYPE;

/// Sentinel field value projecting the resource URI itself
pub const LINK_VALUE: &str = "_link_";

/// Derived document family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositeKind {
    /// Graph-shaped materialized view
    View,
    /// Flattened table row
    Table,
    /// Full-text search document
    Search,
}

impl CompositeKind {
    /// All kinds in materialization order
    pub const ALL: [CompositeKind; 3] = [Self::View, Self::Table, Self::Search];

    /// Lowercase name, also used as the operation name
    #[inline]
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::View => "view",
            Self::Table => "table",
            Self::Search => "search",
        }
    }

    /// Collection holding documents of this kind
    #[inline]
    #[must_use]
    pub fn collection(self) -> &'static str {
        match self {
            Self::View => "views",
            Self::Table => "table_rows",
            Self::Search => "search",
        }
    }
}

impl fmt::Display for CompositeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// Filter condition on one predicate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterCondition {
    /// `{"$exists": bool}`
    Exists {
        /// Whether the predicate must be present
        #[serde(rename = "$exists")]
        exists: bool,
    },
    /// The predicate must carry this value
    Equals(String),
}

impl FilterCondition {
    /// Check the condition against the values a resource has for the predicate
    #[must_use]
    pub fn matches(&self, values: &[&str]) -> bool {
        match self {
            Self::Exists { exists } => values.is_empty() != *exists,
            Self::Equals(expected) => values.iter().any(|v| v == expected),
        }
    }
}

/// One extracted field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Output name
    #[serde(rename = "fieldName")]
    pub field_name: String,
    /// Source predicates; values of all are collected in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub predicates: Vec<String>,
    /// Constant value, or [`LINK_VALUE`] for the resource URI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Keep at most this many values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    /// Concatenate values with this separator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glue: Option<String>,
    /// Available to computed fields, stripped before persistence
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub temporary: bool,
}

impl FieldSpec {
    /// Whether this field projects the resource URI
    #[inline]
    #[must_use]
    pub fn is_link(&self) -> bool {
        self.value.as_ref().and_then(Value::as_str) == Some(LINK_VALUE)
    }
}

/// Cardinality of a predicate, optionally filtered by regex
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountSpec {
    /// Output name
    #[serde(rename = "fieldName")]
    pub field_name: String,
    /// Predicate whose values are counted
    pub property: String,
    /// Only count values matching this pattern
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

/// Traversal of one predicate to the resources it points at
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinSpec {
    /// Fields extracted from the joined resource
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldSpec>,
    /// Search index fields extracted from the joined resource
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indices: Vec<FieldSpec>,
    /// Counts over the joined resource
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub counts: Vec<CountSpec>,
    /// View predicates copied from the joined resource (all when empty)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    /// Nested joins from the joined resource
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub joins: BTreeMap<String, JoinSpec>,
    /// Fail the build when the target does not exist
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
}

/// A view, table or search specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Specification {
    /// Spec id, also the `type` of generated documents
    #[serde(rename = "_id")]
    pub id: String,
    /// Applicable rdf:type values
    #[serde(rename = "type", deserialize_with = "one_or_many")]
    pub rdf_types: Vec<String>,
    /// Source pod
    pub from: String,
    /// Additional applicability conditions
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filter: BTreeMap<String, FilterCondition>,
    /// View predicates (all when empty)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    /// Extracted fields
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldSpec>,
    /// Search index fields
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indices: Vec<FieldSpec>,
    /// Joins keyed by predicate
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub joins: BTreeMap<String, JoinSpec>,
    /// Counts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub counts: Vec<CountSpec>,
    /// Computed fields in evaluation order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub computed_fields: Vec<ComputedField>,
    /// Queue override for jobs touching this spec
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,
    /// Store indexes to create for the spec's collection
    #[serde(default, rename = "ensureIndexes", skip_serializing_if = "Vec::is_empty")]
    pub ensure_indexes: Vec<Value>,
    /// Bumped when extraction logic changes
    #[serde(default)]
    pub revision: u32,
}

/// Predicates whose change can alter a spec's output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredicateSet {
    /// Every predicate matters (views without `include`)
    All,
    /// Only these
    Only(BTreeSet<String>),
}

impl PredicateSet {
    /// Whether any of `changed` is in the set
    #[must_use]
    pub fn intersects<S: AsRef<str>>(&self, changed: &[S]) -> bool {
        match self {
            Self::All => !changed.is_empty(),
            Self::Only(set) => changed.iter().any(|p| set.contains(p.as_ref())),
        }
    }

    /// Whether `predicate` is in the set
    #[must_use]
    pub fn contains(&self, predicate: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(set) => set.contains(predicate),
        }
    }
}

fn collect_fields(fields: &[FieldSpec], out: &mut BTreeSet<String>) {
    for f in fields {
        out.extend(f.predicates.iter().cloned());
    }
}

fn collect_counts(counts: &[CountSpec], out: &mut BTreeSet<String>) {
    out.extend(counts.iter().map(|c| c.property.clone()));
}

/// Returns `false` when a view level copies every predicate
fn collect_join(
    kind: CompositeKind,
    predicate: &str,
    join: &JoinSpec,
    out: &mut BTreeSet<String>,
) -> bool {
    out.insert(predicate.to_string());
    collect_fields(&join.fields, out);
    collect_fields(&join.indices, out);
    collect_counts(&join.counts, out);
    out.extend(join.include.iter().cloned());
    let mut bounded = !(kind == CompositeKind::View && join.include.is_empty());
    for (p, nested) in &join.joins {
        bounded &= collect_join(kind, p, nested, out);
    }
    bounded
}

impl Specification {
    /// Whether `types` intersects the applicable types
    #[must_use]
    pub fn applies_to_types<S: AsRef<str>>(&self, types: &[S]) -> bool {
        types
            .iter()
            .any(|t| self.rdf_types.iter().any(|r| r == t.as_ref()))
    }

    /// Every predicate the spec reads, `rdf:type` included
    #[must_use]
    pub fn predicate_set(&self, kind: CompositeKind) -> PredicateSet {
        let mut out = BTreeSet::new();
        out.insert(RDF_TYPE.to_string());
        out.extend(self.filter.keys().cloned());
        collect_fields(&self.fields, &mut out);
        collect_fields(&self.indices, &mut out);
        collect_counts(&self.counts, &mut out);
        out.extend(self.include.iter().cloned());

        let mut bounded = !(kind == CompositeKind::View && self.include.is_empty());
        for (p, join) in &self.joins {
            bounded &= collect_join(kind, p, join, &mut out);
        }
        if bounded {
            PredicateSet::Only(out)
        } else {
            PredicateSet::All
        }
    }

    /// Names of extracted and computed fields marked temporary
    #[must_use]
    pub fn temporary_fields(&self) -> BTreeSet<String> {
        self.fields
            .iter()
            .chain(&self.indices)
            .filter(|f| f.temporary)
            .map(|f| f.field_name.clone())
            .chain(
                self.computed_fields
                    .iter()
                    .filter(|f| f.temporary)
                    .map(|f| f.field_name.clone()),
            )
            .collect()
    }
}
