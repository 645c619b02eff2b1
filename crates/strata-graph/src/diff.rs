//! Per-subject graph differences

use crate::graph::{MemoryGraph, Object, PredicateMap};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Map of subject to the predicates that changed on it
pub type ChangedPredicates = BTreeMap<String, Vec<String>>;

/// Additions and removals for one subject
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectChange {
    /// Triples present in the new graph only
    pub additions: PredicateMap,
    /// Triples present in the old graph only
    pub removals: PredicateMap,
}

impl SubjectChange {
    /// Whether nothing changed
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }

    /// Predicates touched by either side, sorted and de-duplicated
    #[must_use]
    pub fn predicates(&self) -> Vec<String> {
        self.additions
            .keys()
            .chain(self.removals.keys())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Difference between two graphs keyed by subject
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDiff {
    subjects: BTreeMap<String, SubjectChange>,
}

impl GraphDiff {
    /// Compute the diff that turns `old` into `new`
    #[must_use]
    pub fn between(old: &MemoryGraph, new: &MemoryGraph) -> Self {
        let subjects: BTreeSet<&str> = old.subjects().chain(new.subjects()).collect();
        let empty = PredicateMap::new();

        let mut diff = GraphDiff::default();
        for subject in subjects {
            let before = old.predicates(subject).unwrap_or(&empty);
            let after = new.predicates(subject).unwrap_or(&empty);
            let change = SubjectChange {
                additions: difference(after, before),
                removals: difference(before, after),
            };
            if !change.is_empty() {
                diff.subjects.insert(subject.to_string(), change);
            }
        }
        diff
    }

    /// Subjects with at least one change
    pub fn subjects(&self) -> impl Iterator<Item = &str> {
        self.subjects.keys().map(String::as_str)
    }

    /// Change for one subject
    #[inline]
    #[must_use]
    pub fn get(&self, subject: &str) -> Option<&SubjectChange> {
        self.subjects.get(subject)
    }

    /// Iterate `(subject, change)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SubjectChange)> {
        self.subjects.iter().map(|(s, c)| (s.as_str(), c))
    }

    /// Number of touched subjects
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    /// Whether the graphs were identical
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    /// `{subject: [predicate]}` handed to impact resolution
    #[must_use]
    pub fn changed_predicates(&self) -> ChangedPredicates {
        self.subjects
            .iter()
            .map(|(s, c)| (s.clone(), c.predicates()))
            .collect()
    }
}

fn difference(left: &PredicateMap, right: &PredicateMap) -> PredicateMap {
    let mut out = PredicateMap::new();
    for (predicate, objects) in left {
        let missing: BTreeSet<Object> = match right.get(predicate) {
            Some(other) => objects.difference(other).cloned().collect(),
            None => objects.clone(),
        };
        if !missing.is_empty() {
            out.insert(predicate.clone(), missing);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RDF_TYPE;
    use proptest::prelude::*;

    #[test]
    fn identical_graphs_have_empty_diff() {
        let mut g = MemoryGraph::new();
        g.add_triple("s", RDF_TYPE, Object::uri("bibo:Book")).unwrap();
        assert!(GraphDiff::between(&g, &g.clone()).is_empty());
    }

    #[test]
    fn diff_tracks_additions_and_removals() {
        let mut old = MemoryGraph::new();
        old.add_triple("s", "dct:title", Object::literal("Old")).unwrap();
        old.add_triple("s", RDF_TYPE, Object::uri("bibo:Book")).unwrap();

        let mut new = old.clone();
        new.remove_triple("s", "dct:title", &Object::literal("Old"));
        new.add_triple("s", "dct:title", Object::literal("New")).unwrap();

        let diff = GraphDiff::between(&old, &new);
        let change = diff.get("s").unwrap();
        assert_eq!(change.predicates(), vec!["dct:title".to_string()]);
        assert!(change.additions["dct:title"].contains(&Object::literal("New")));
        assert!(change.removals["dct:title"].contains(&Object::literal("Old")));
    }

    #[test]
    fn deleted_subject_removes_everything() {
        let mut old = MemoryGraph::new();
        old.add_triple("s", "dct:title", Object::literal("Old")).unwrap();
        old.add_triple("s", RDF_TYPE, Object::uri("bibo:Book")).unwrap();

        let diff = GraphDiff::between(&old, &MemoryGraph::new());
        let changed = diff.changed_predicates();
        assert_eq!(
            changed["s"],
            vec!["dct:title".to_string(), RDF_TYPE.to_string()]
        );
        assert!(diff.get("s").unwrap().additions.is_empty());
    }

    fn arb_graph() -> impl Strategy<Value = MemoryGraph> {
        proptest::collection::vec(("[a-c]", "[p-r]", "[x-z]", any::<bool>()), 0..12).prop_map(
            |triples| {
                let mut g = MemoryGraph::new();
                for (s, p, o, literal) in triples {
                    let object = if literal { Object::literal(o) } else { Object::uri(o) };
                    g.add_triple(s, p, object).unwrap();
                }
                g
            },
        )
    }

    proptest! {
        #[test]
        fn applying_diff_to_old_yields_new(old in arb_graph(), new in arb_graph()) {
            let diff = GraphDiff::between(&old, &new);
            let mut patched = old.clone();
            for (subject, change) in diff.iter() {
                for (p, objects) in &change.removals {
                    for o in objects {
                        patched.remove_triple(subject, p, o);
                    }
                }
                for (p, objects) in &change.additions {
                    for o in objects {
                        patched.add_triple(subject, p.clone(), o.clone()).unwrap();
                    }
                }
            }
            prop_assert_eq!(patched, new);
        }
    }
}
