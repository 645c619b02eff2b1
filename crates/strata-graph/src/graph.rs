//! In-memory triple set
//!
//! Subjects, predicates and objects are kept in sorted maps so iteration
//! order (and therefore every document derived from a graph) is stable.

use crate::error::GraphError;
use crate::RDF_TYPE;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Object position of a triple
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Object {
    /// Lexical value (URI or literal text)
    #[serde(rename = "v")]
    pub value: String,
    /// Whether the value is a literal rather than a URI
    #[serde(rename = "l", default)]
    pub literal: bool,
}

impl Object {
    /// URI object
    #[inline]
    #[must_use]
    pub fn uri(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            literal: false,
        }
    }

    /// Literal object
    #[inline]
    #[must_use]
    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            literal: true,
        }
    }
}

/// A single `(subject, predicate, object)` statement
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Triple {
    /// Subject URI
    pub subject: String,
    /// Predicate
    pub predicate: String,
    /// Object
    pub object: Object,
}

/// Predicate to object-set projection of one subject
pub type PredicateMap = BTreeMap<String, BTreeSet<Object>>;

/// Mutable in-memory graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryGraph {
    subjects: BTreeMap<String, PredicateMap>,
}

impl MemoryGraph {
    /// Create an empty graph
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from triples
    ///
    /// # Errors
    /// Returns the first [`GraphError`] raised by [`MemoryGraph::add_triple`]
    pub fn from_triples(triples: impl IntoIterator<Item = Triple>) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for t in triples {
            graph.add_triple(t.subject, t.predicate, t.object)?;
        }
        Ok(graph)
    }

    /// Add a triple; returns `false` when it was already present
    ///
    /// # Errors
    /// Rejects empty subjects, empty predicates and empty URI objects
    pub fn add_triple(
        &mut self,
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: Object,
    ) -> Result<bool, GraphError> {
        let subject = subject.into();
        let predicate = predicate.into();
        if subject.is_empty() {
            return Err(GraphError::EmptySubject);
        }
        if predicate.is_empty() {
            return Err(GraphError::EmptyPredicate { subject });
        }
        if !object.literal && object.value.is_empty() {
            return Err(GraphError::EmptyUriObject { subject, predicate });
        }

        Ok(self
            .subjects
            .entry(subject)
            .or_default()
            .entry(predicate)
            .or_default()
            .insert(object))
    }

    /// Remove a triple; returns `true` when it was present
    pub fn remove_triple(&mut self, subject: &str, predicate: &str, object: &Object) -> bool {
        let Some(predicates) = self.subjects.get_mut(subject) else {
            return false;
        };
        let Some(objects) = predicates.get_mut(predicate) else {
            return false;
        };
        let removed = objects.remove(object);
        if objects.is_empty() {
            predicates.remove(predicate);
        }
        if predicates.is_empty() {
            self.subjects.remove(subject);
        }
        removed
    }

    /// Subjects in sorted order
    pub fn subjects(&self) -> impl Iterator<Item = &str> {
        self.subjects.keys().map(String::as_str)
    }

    /// Whether `subject` has any triple
    #[inline]
    #[must_use]
    pub fn has_subject(&self, subject: &str) -> bool {
        self.subjects.contains_key(subject)
    }

    /// Predicate map of `subject`
    #[inline]
    #[must_use]
    pub fn predicates(&self, subject: &str) -> Option<&PredicateMap> {
        self.subjects.get(subject)
    }

    /// Objects of `(subject, predicate)` in sorted order
    pub fn objects<'a>(&'a self, subject: &str, predicate: &str) -> impl Iterator<Item = &'a Object> {
        self.subjects
            .get(subject)
            .and_then(|p| p.get(predicate))
            .into_iter()
            .flatten()
    }

    /// `rdf:type` values of `subject`
    #[must_use]
    pub fn rdf_types(&self, subject: &str) -> Vec<String> {
        self.objects(subject, RDF_TYPE)
            .map(|o| o.value.clone())
            .collect()
    }

    /// Whether the exact triple is present
    #[must_use]
    pub fn has_triple(&self, subject: &str, predicate: &str, object: &Object) -> bool {
        self.subjects
            .get(subject)
            .and_then(|p| p.get(predicate))
            .is_some_and(|o| o.contains(object))
    }

    /// Sub-graph holding only `subject`'s triples
    #[must_use]
    pub fn describe(&self, subject: &str) -> MemoryGraph {
        let mut graph = MemoryGraph::new();
        if let Some(predicates) = self.subjects.get(subject) {
            graph.subjects.insert(subject.to_string(), predicates.clone());
        }
        graph
    }

    /// Iterate every triple
    pub fn triples(&self) -> impl Iterator<Item = Triple> + '_ {
        self.subjects.iter().flat_map(|(s, predicates)| {
            predicates.iter().flat_map(move |(p, objects)| {
                objects.iter().map(move |o| Triple {
                    subject: s.clone(),
                    predicate: p.clone(),
                    object: o.clone(),
                })
            })
        })
    }

    /// Total triple count
    #[must_use]
    pub fn len(&self) -> usize {
        self.subjects
            .values()
            .flat_map(BTreeMap::values)
            .map(BTreeSet::len)
            .sum()
    }

    /// Whether the graph holds no triples
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    /// Merge another graph into this one
    pub fn merge(&mut self, other: &MemoryGraph) {
        for (s, predicates) in &other.subjects {
            let target = self.subjects.entry(s.clone()).or_default();
            for (p, objects) in predicates {
                target.entry(p.clone()).or_default().extend(objects.iter().cloned());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemoryGraph {
        let mut g = MemoryGraph::new();
        g.add_triple("s1", RDF_TYPE, Object::uri("bibo:Book")).unwrap();
        g.add_triple("s1", "dct:title", Object::literal("A title")).unwrap();
        g.add_triple("s2", RDF_TYPE, Object::uri("foaf:Person")).unwrap();
        g
    }

    #[test]
    fn add_triple_rejects_empty_parts() {
        let mut g = MemoryGraph::new();
        assert_eq!(
            g.add_triple("", "p", Object::literal("x")),
            Err(GraphError::EmptySubject)
        );
        assert!(matches!(
            g.add_triple("s", "", Object::literal("x")),
            Err(GraphError::EmptyPredicate { .. })
        ));
        assert!(matches!(
            g.add_triple("s", "p", Object::uri("")),
            Err(GraphError::EmptyUriObject { .. })
        ));
        // empty literals are fine
        assert!(g.add_triple("s", "p", Object::literal("")).unwrap());
    }

    #[test]
    fn duplicate_add_is_noop() {
        let mut g = sample();
        assert!(!g.add_triple("s1", "dct:title", Object::literal("A title")).unwrap());
        assert_eq!(g.len(), 3);
    }

    #[test]
    fn remove_cleans_empty_subjects() {
        let mut g = sample();
        assert!(g.remove_triple("s2", RDF_TYPE, &Object::uri("foaf:Person")));
        assert!(!g.has_subject("s2"));
        assert!(!g.remove_triple("s2", RDF_TYPE, &Object::uri("foaf:Person")));
    }

    #[test]
    fn describe_returns_single_subject() {
        let g = sample();
        let d = g.describe("s1");
        assert_eq!(d.subjects().collect::<Vec<_>>(), vec!["s1"]);
        assert_eq!(d.rdf_types("s1"), vec!["bibo:Book".to_string()]);
        assert!(g.describe("missing").is_empty());
    }

    #[test]
    fn merge_unions_objects() {
        let mut a = sample();
        let mut b = MemoryGraph::new();
        b.add_triple("s1", "dct:title", Object::literal("Another")).unwrap();
        a.merge(&b);
        assert_eq!(a.objects("s1", "dct:title").count(), 2);
    }
}
