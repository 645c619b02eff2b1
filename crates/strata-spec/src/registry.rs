//! Per-store specification registry
//!
//! Built once from configuration and shared read-only. Validation happens
//! here, so a registry that exists is a registry that is usable.

use crate::error::{SpecError, SpecResult};
use crate::expression::validate_computed_fields;
use crate::spec::{CompositeKind, FieldSpec, JoinSpec, PredicateSet, Specification};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A validated spec with its precomputed predicate sets
#[derive(Debug, Clone)]
pub struct RegisteredSpec {
    /// Family of documents it produces
    pub kind: CompositeKind,
    /// The definition
    pub spec: Arc<Specification>,
    /// Predicates whose change can alter output
    pub predicates: PredicateSet,
}

impl RegisteredSpec {
    /// Spec id
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.spec.id
    }
}

/// Specifications of one store, indexed by id and kind
#[derive(Debug, Clone, Default)]
pub struct SpecRegistry {
    specs: BTreeMap<String, RegisteredSpec>,
    pods: BTreeSet<String>,
}

fn validate_fields(spec: &str, fields: &[FieldSpec]) -> SpecResult<()> {
    for f in fields {
        if f.field_name.is_empty() {
            return Err(SpecError::invalid(spec, "field with empty fieldName"));
        }
        match (f.predicates.is_empty(), f.value.is_some()) {
            (false, true) => {
                return Err(SpecError::invalid(
                    spec,
                    format!("field '{}' has both predicates and value", f.field_name),
                ))
            }
            (true, false) => {
                return Err(SpecError::invalid(
                    spec,
                    format!("field '{}' needs predicates or a value", f.field_name),
                ))
            }
            _ => {}
        }
        if f.limit == Some(0) {
            return Err(SpecError::invalid(
                spec,
                format!("field '{}' has a zero limit", f.field_name),
            ));
        }
    }
    Ok(())
}

fn validate_join(spec: &str, predicate: &str, join: &JoinSpec) -> SpecResult<()> {
    if predicate.is_empty() {
        return Err(SpecError::invalid(spec, "join on an empty predicate"));
    }
    validate_fields(spec, &join.fields)?;
    validate_fields(spec, &join.indices)?;
    validate_counts(spec, &join.counts)?;
    for (p, nested) in &join.joins {
        validate_join(spec, p, nested)?;
    }
    Ok(())
}

fn validate_counts(spec: &str, counts: &[crate::spec::CountSpec]) -> SpecResult<()> {
    for c in counts {
        if let Some(pattern) = &c.regex {
            Regex::new(pattern).map_err(|e| {
                SpecError::invalid(spec, format!("count '{}' regex: {e}", c.field_name))
            })?;
        }
    }
    Ok(())
}

fn validate(kind: CompositeKind, spec: &Specification, pods: &BTreeSet<String>) -> SpecResult<()> {
    let id = spec.id.as_str();
    if id.is_empty() {
        return Err(SpecError::Config("specification with empty _id".to_string()));
    }
    if spec.rdf_types.is_empty() {
        return Err(SpecError::invalid(id, "no applicable type"));
    }
    if !pods.contains(&spec.from) {
        return Err(SpecError::invalid(id, format!("'from' pod '{}' is not declared", spec.from)));
    }
    validate_fields(id, &spec.fields)?;
    validate_fields(id, &spec.indices)?;
    validate_counts(id, &spec.counts)?;
    for (p, join) in &spec.joins {
        validate_join(id, p, join)?;
    }

    if kind == CompositeKind::Search && spec.indices.is_empty() {
        return Err(SpecError::invalid(id, "search specifications need at least one index"));
    }
    if kind != CompositeKind::Table && !spec.computed_fields.is_empty() {
        return Err(SpecError::invalid(id, "computed fields are only supported on tables"));
    }
    validate_computed_fields(&spec.computed_fields).map_err(|source| SpecError::Expression {
        spec: id.to_string(),
        source,
    })
}

impl SpecRegistry {
    /// Validate and index the specifications of one store
    ///
    /// # Errors
    /// The first [`SpecError`] found
    pub fn new(
        pods: impl IntoIterator<Item = String>,
        views: Vec<Specification>,
        tables: Vec<Specification>,
        searches: Vec<Specification>,
    ) -> SpecResult<Self> {
        let pods: BTreeSet<String> = pods.into_iter().collect();
        let mut specs = BTreeMap::new();
        let grouped = [
            (CompositeKind::View, views),
            (CompositeKind::Table, tables),
            (CompositeKind::Search, searches),
        ];
        for (kind, list) in grouped {
            for spec in list {
                validate(kind, &spec, &pods)?;
                if specs.contains_key(&spec.id) {
                    return Err(SpecError::DuplicateSpec(spec.id));
                }
                let registered = RegisteredSpec {
                    kind,
                    predicates: spec.predicate_set(kind),
                    spec: Arc::new(spec),
                };
                specs.insert(registered.spec.id.clone(), registered);
            }
        }
        tracing::debug!(specs = specs.len(), "specification registry built");
        Ok(Self { specs, pods })
    }

    /// Look up a spec by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&RegisteredSpec> {
        self.specs.get(id)
    }

    /// Look up a spec by id, failing with [`SpecError::UnknownSpec`]
    ///
    /// # Errors
    /// Unknown id
    pub fn require(&self, id: &str) -> SpecResult<&RegisteredSpec> {
        self.get(id).ok_or_else(|| SpecError::UnknownSpec(id.to_string()))
    }

    /// Every spec of `kind`, ordered by id
    pub fn of_kind(&self, kind: CompositeKind) -> impl Iterator<Item = &RegisteredSpec> {
        self.specs.values().filter(move |s| s.kind == kind)
    }

    /// Specs of `kind` applicable to any of `types`
    #[must_use]
    pub fn for_types<S: AsRef<str>>(&self, kind: CompositeKind, types: &[S]) -> Vec<&RegisteredSpec> {
        self.of_kind(kind)
            .filter(|s| s.spec.applies_to_types(types))
            .collect()
    }

    /// Whether `pod` is declared
    #[must_use]
    pub fn has_pod(&self, pod: &str) -> bool {
        self.pods.contains(pod)
    }

    /// Declared pods
    pub fn pods(&self) -> impl Iterator<Item = &str> {
        self.pods.iter().map(String::as_str)
    }

    /// Number of specs
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Whether no specs are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Count of specs per kind
    #[must_use]
    pub fn counts(&self) -> BTreeMap<CompositeKind, usize> {
        let mut out = BTreeMap::new();
        for s in self.specs.values() {
            *out.entry(s.kind).or_insert(0) += 1;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(v: serde_json::Value) -> Specification {
        serde_json::from_value(v).unwrap()
    }

    fn pods() -> Vec<String> {
        vec!["CBD_resources".to_string()]
    }

    #[test]
    fn lookups_by_kind_and_type() {
        let registry = SpecRegistry::new(
            pods(),
            vec![spec(json!({"_id": "v_resource", "type": "bibo:Book", "from": "CBD_resources"}))],
            vec![spec(json!({"_id": "t_resource", "type": ["bibo:Book", "bibo:Journal"], "from": "CBD_resources",
                "fields": [{"fieldName": "type", "predicates": ["rdf:type"]}]}))],
            vec![],
        )
        .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.for_types(CompositeKind::Table, &["bibo:Journal"]).len(), 1);
        assert!(registry.for_types(CompositeKind::Table, &["foaf:Person"]).is_empty());
        assert_eq!(registry.of_kind(CompositeKind::View).count(), 1);
        assert_eq!(registry.require("t_resource").unwrap().kind, CompositeKind::Table);
        assert!(matches!(registry.require("nope"), Err(SpecError::UnknownSpec(_))));
    }

    #[test]
    fn ids_are_unique_across_kinds() {
        let s = json!({"_id": "dup", "type": "bibo:Book", "from": "CBD_resources",
            "fields": [{"fieldName": "t", "predicates": ["dct:title"]}]});
        let err = SpecRegistry::new(pods(), vec![spec(s.clone())], vec![spec(s)], vec![]).unwrap_err();
        assert!(matches!(err, SpecError::DuplicateSpec(id) if id == "dup"));
    }

    #[test]
    fn rejects_undeclared_pod_and_bad_fields() {
        let err = SpecRegistry::new(
            pods(),
            vec![],
            vec![spec(json!({"_id": "t", "type": "bibo:Book", "from": "elsewhere"}))],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, SpecError::Invalid { .. }));

        let err = SpecRegistry::new(
            pods(),
            vec![],
            vec![spec(json!({"_id": "t", "type": "bibo:Book", "from": "CBD_resources",
                "fields": [{"fieldName": "t"}]}))],
            vec![],
        )
        .unwrap_err();
        assert!(err.to_string().contains("needs predicates or a value"));

        let err = SpecRegistry::new(
            pods(),
            vec![],
            vec![spec(json!({"_id": "t", "type": "bibo:Book", "from": "CBD_resources",
                "counts": [{"fieldName": "n", "property": "dct:hasPart", "regex": "("}]}))],
            vec![],
        )
        .unwrap_err();
        assert!(err.to_string().contains("regex"));
    }

    #[test]
    fn rejects_cyclic_computed_fields() {
        let err = SpecRegistry::new(
            pods(),
            vec![],
            vec![spec(json!({"_id": "t", "type": "bibo:Book", "from": "CBD_resources",
                "computed_fields": [
                    {"fieldName": "a", "value": {"arithmetic": {"operator": "+", "operands": ["$a", 1]}}}
                ]}))],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, SpecError::Expression { .. }));
    }

    #[test]
    fn search_specs_need_indices() {
        let err = SpecRegistry::new(
            pods(),
            vec![],
            vec![],
            vec![spec(json!({"_id": "i", "type": "bibo:Book", "from": "CBD_resources"}))],
        )
        .unwrap_err();
        assert!(err.to_string().contains("at least one index"));
    }
}
