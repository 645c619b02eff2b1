//! Units of regeneration work

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use strata_graph::ResourceId;
use strata_spec::CompositeKind;

/// One resource whose derived documents of one kind need regeneration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactedSubject {
    /// Root resource
    #[serde(rename = "resourceId")]
    pub resource_id: ResourceId,
    /// Composite family
    pub operation: CompositeKind,
    /// Store name
    #[serde(rename = "storeName")]
    pub store: String,
    /// Pod holding the base document
    #[serde(rename = "podName")]
    pub pod: String,
    /// Spec ids to regenerate; empty means every spec of the operation
    #[serde(rename = "specTypes", default)]
    pub spec_types: Vec<String>,
}

impl ImpactedSubject {
    /// Create a subject
    #[must_use]
    pub fn new(
        resource_id: ResourceId,
        operation: CompositeKind,
        store: impl Into<String>,
        pod: impl Into<String>,
        spec_types: Vec<String>,
    ) -> Self {
        Self {
            resource_id,
            operation,
            store: store.into(),
            pod: pod.into(),
            spec_types,
        }
    }
}

type SubjectKey = (ResourceId, CompositeKind, String, String);

/// Merge subjects sharing resource, operation, store and pod, unioning their
/// spec ids; output is ordered by key
#[must_use]
pub fn merge_subjects(subjects: impl IntoIterator<Item = ImpactedSubject>) -> Vec<ImpactedSubject> {
    let mut merged: BTreeMap<SubjectKey, (bool, BTreeSet<String>)> = BTreeMap::new();
    for s in subjects {
        let entry = merged
            .entry((s.resource_id, s.operation, s.store, s.pod))
            .or_insert_with(|| (false, BTreeSet::new()));
        // an unrestricted subject stays unrestricted
        entry.0 |= s.spec_types.is_empty();
        entry.1.extend(s.spec_types);
    }
    merged
        .into_iter()
        .map(|((resource_id, operation, store, pod), (all, specs))| ImpactedSubject {
            resource_id,
            operation,
            store,
            pod,
            spec_types: if all { Vec::new() } else { specs.into_iter().collect() },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn subject(r: &str, specs: &[&str]) -> ImpactedSubject {
        ImpactedSubject::new(
            ResourceId::new(r, "ctx"),
            CompositeKind::Table,
            "store",
            "CBD_resources",
            specs.iter().map(|s| (*s).to_string()).collect(),
        )
    }

    #[test]
    fn merge_unions_spec_ids_per_resource() {
        let merged = merge_subjects(vec![
            subject("doc1", &["t_b"]),
            subject("doc2", &["t_a"]),
            subject("doc1", &["t_a", "t_b"]),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].resource_id.resource, "doc1");
        assert_eq!(merged[0].spec_types, vec!["t_a", "t_b"]);
    }

    #[test]
    fn unrestricted_wins() {
        let merged = merge_subjects(vec![subject("doc1", &["t_a"]), subject("doc1", &[])]);
        assert!(merged[0].spec_types.is_empty());
    }

    #[test]
    fn serializes_with_wire_names() {
        let v = serde_json::to_value(subject("doc1", &["t_a"])).unwrap();
        assert_eq!(v["resourceId"]["r"], "doc1");
        assert_eq!(v["operation"], "table");
        assert_eq!(v["specTypes"][0], "t_a");
        assert_eq!(v["podName"], "CBD_resources");
    }
}
