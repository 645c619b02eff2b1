//! Field extraction shared by every composite kind
//!
//! Building happens in two phases. [`JoinedResources::load`] walks the join
//! tree and fetches every joined base document; the shaping functions then
//! run synchronously over the fetched set. Every resource visited, found or
//! not, ends up in the impact index.

use crate::error::{CompositeError, CompositeResult};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use strata_graph::{Object, ResourceId};
use strata_spec::{
    evaluate_computed_fields, CountSpec, FieldSpec, JoinSpec, Specification,
};
use strata_store::{tokenize, BaseDocument, BaseDocuments};

/// Base documents reached through joins, keyed by id
#[derive(Debug, Default)]
pub struct JoinedResources {
    docs: HashMap<ResourceId, Option<BaseDocument>>,
}

fn join_targets<'a>(doc: &'a BaseDocument, predicate: &str) -> impl Iterator<Item = &'a Object> {
    doc.values(predicate).filter(|o| !o.literal)
}

impl JoinedResources {
    /// Fetch every resource the join tree of `spec` reaches from `root`
    ///
    /// # Errors
    /// Store failures
    pub async fn load<D: BaseDocuments + ?Sized>(
        documents: &D,
        pod: &str,
        root: &BaseDocument,
        joins: &BTreeMap<String, JoinSpec>,
    ) -> CompositeResult<Self> {
        let mut out = Self::default();
        let context = root.id.context.clone();
        let mut pending: Vec<(BaseDocument, &BTreeMap<String, JoinSpec>)> = vec![(root.clone(), joins)];

        while let Some((source, joins)) = pending.pop() {
            for (predicate, join) in joins {
                for target in join_targets(&source, predicate) {
                    let id = ResourceId::new(target.value.clone(), context.clone());
                    if !out.docs.contains_key(&id) {
                        let found = documents
                            .find(pod, &id)
                            .await?
                            .filter(|d| !d.is_placeholder());
                        out.docs.insert(id.clone(), found);
                    }
                    if join.joins.is_empty() {
                        continue;
                    }
                    if let Some(Some(doc)) = out.docs.get(&id) {
                        pending.push((doc.clone(), &join.joins));
                    }
                }
            }
        }
        Ok(out)
    }

    /// A joined document, if it exists
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&BaseDocument> {
        self.docs.get(id).and_then(Option::as_ref)
    }

    /// Every resource visited, including missing targets
    pub fn visited(&self) -> impl Iterator<Item = &ResourceId> {
        self.docs.keys()
    }
}

/// Root resource plus everything joined to it
#[must_use]
pub fn impact_index(root: &BaseDocument, joined: &JoinedResources) -> BTreeSet<ResourceId> {
    std::iter::once(root.id.clone())
        .chain(joined.visited().cloned())
        .collect()
}

/// Whether `doc` satisfies the spec's types and filter
#[must_use]
pub fn is_applicable(spec: &Specification, doc: &BaseDocument) -> bool {
    if doc.is_placeholder() || !spec.applies_to_types(&doc.rdf_types()) {
        return false;
    }
    spec.filter.iter().all(|(predicate, condition)| {
        let values: Vec<&str> = doc.values(predicate).map(|o| o.value.as_str()).collect();
        condition.matches(&values)
    })
}

/// The value a field takes on `doc`, `None` when there is nothing to store
#[must_use]
pub fn field_value(doc: &BaseDocument, field: &FieldSpec) -> Option<Value> {
    if field.is_link() {
        return Some(Value::String(doc.id.resource.clone()));
    }
    if let Some(constant) = &field.value {
        return Some(constant.clone());
    }

    let mut values: Vec<String> = field
        .predicates
        .iter()
        .flat_map(|p| doc.values(p).map(|o| o.value.clone()))
        .collect();
    if let Some(limit) = field.limit {
        values.truncate(limit);
    }
    match (values.len(), &field.glue) {
        (0, _) => None,
        (_, Some(glue)) => Some(Value::String(values.join(glue))),
        (1, None) => values.pop().map(Value::String),
        _ => Some(Value::Array(values.into_iter().map(Value::String).collect())),
    }
}

/// Store `value` under `name`, turning repeated writes into an array
pub fn put(row: &mut Map<String, Value>, name: &str, value: Value) {
    match row.get_mut(name) {
        None => {
            row.insert(name.to_string(), value);
        }
        Some(Value::Array(existing)) => match value {
            Value::Array(more) => existing.extend(more),
            single => existing.push(single),
        },
        Some(existing) => {
            let first = existing.take();
            let mut items = vec![first];
            match value {
                Value::Array(more) => items.extend(more),
                single => items.push(single),
            }
            *existing = Value::Array(items);
        }
    }
}

fn count(spec: &Specification, doc: &BaseDocument, c: &CountSpec) -> CompositeResult<usize> {
    let Some(pattern) = &c.regex else {
        return Ok(doc.values(&c.property).count());
    };
    let re = Regex::new(pattern).map_err(|e| CompositeError::Build {
        resource: doc.id.resource.clone(),
        spec: spec.id.clone(),
        message: format!("count '{}' regex: {e}", c.field_name),
    })?;
    Ok(doc.values(&c.property).filter(|o| re.is_match(&o.value)).count())
}

fn missing_join(spec: &Specification, root: &BaseDocument, predicate: &str, target: &ResourceId) -> CompositeError {
    CompositeError::MissingJoin {
        resource: root.id.resource.clone(),
        spec: spec.id.clone(),
        predicate: predicate.to_string(),
        target: target.resource.clone(),
    }
}

/// Documents joined from `source` through `predicate`, honouring `required`
fn resolve_join<'a>(
    spec: &Specification,
    root: &BaseDocument,
    source: &BaseDocument,
    predicate: &str,
    join: &JoinSpec,
    joined: &'a JoinedResources,
) -> CompositeResult<Vec<&'a BaseDocument>> {
    let mut out = Vec::new();
    for target in join_targets(source, predicate) {
        let id = ResourceId::new(target.value.clone(), source.id.context.clone());
        match joined.get(&id) {
            Some(doc) => out.push(doc),
            None if join.required => return Err(missing_join(spec, root, predicate, &id)),
            None => tracing::debug!(spec = %spec.id, target = %id, "optional join target missing"),
        }
    }
    Ok(out)
}

fn strip(row: &mut Map<String, Value>, names: &BTreeSet<String>) {
    for name in names {
        row.remove(name);
    }
}

fn join_temporaries(joins: &BTreeMap<String, JoinSpec>, out: &mut BTreeSet<String>) {
    for join in joins.values() {
        out.extend(
            join.fields
                .iter()
                .chain(&join.indices)
                .filter(|f| f.temporary)
                .map(|f| f.field_name.clone()),
        );
        join_temporaries(&join.joins, out);
    }
}

fn temporaries(spec: &Specification) -> BTreeSet<String> {
    let mut out = spec.temporary_fields();
    join_temporaries(&spec.joins, &mut out);
    out
}

fn table_joins(
    spec: &Specification,
    root: &BaseDocument,
    source: &BaseDocument,
    joins: &BTreeMap<String, JoinSpec>,
    joined: &JoinedResources,
    row: &mut Map<String, Value>,
) -> CompositeResult<()> {
    for (predicate, join) in joins {
        for doc in resolve_join(spec, root, source, predicate, join, joined)? {
            for field in &join.fields {
                if let Some(v) = field_value(doc, field) {
                    put(row, &field.field_name, v);
                }
            }
            for c in &join.counts {
                put(row, &c.field_name, Value::from(count(spec, doc, c)?));
            }
            table_joins(spec, root, doc, &join.joins, joined, row)?;
        }
    }
    Ok(())
}

/// Flattened table row: fields, joins, counts, then computed fields
///
/// # Errors
/// Missing required joins and computed field failures
pub fn table_row(
    spec: &Specification,
    root: &BaseDocument,
    joined: &JoinedResources,
) -> CompositeResult<Map<String, Value>> {
    let mut row = Map::new();
    for field in &spec.fields {
        if let Some(v) = field_value(root, field) {
            put(&mut row, &field.field_name, v);
        }
    }
    table_joins(spec, root, root, &spec.joins, joined, &mut row)?;
    for c in &spec.counts {
        row.insert(c.field_name.clone(), Value::from(count(spec, root, c)?));
    }

    evaluate_computed_fields(&spec.computed_fields, &mut row).map_err(|(field, source)| {
        CompositeError::Expression {
            resource: root.id.resource.clone(),
            spec: spec.id.clone(),
            field,
            source,
        }
    })?;
    strip(&mut row, &temporaries(spec));
    Ok(row)
}

fn graph_entry(doc: &BaseDocument, include: &[String]) -> Map<String, Value> {
    let mut entry = Map::new();
    entry.insert(
        "_id".to_string(),
        serde_json::json!({"r": doc.id.resource, "c": doc.id.context}),
    );
    for (predicate, objects) in &doc.properties {
        if !include.is_empty() && !include.contains(predicate) {
            continue;
        }
        let values = objects
            .iter()
            .map(|o| serde_json::json!({"v": o.value, "l": o.literal}))
            .collect();
        entry.insert(predicate.clone(), Value::Array(values));
    }
    entry
}

fn view_joins(
    spec: &Specification,
    root: &BaseDocument,
    source: &BaseDocument,
    joins: &BTreeMap<String, JoinSpec>,
    joined: &JoinedResources,
    graphs: &mut BTreeMap<ResourceId, Map<String, Value>>,
) -> CompositeResult<()> {
    for (predicate, join) in joins {
        for doc in resolve_join(spec, root, source, predicate, join, joined)? {
            let entry = graph_entry(doc, &join.include);
            match graphs.get_mut(&doc.id) {
                // reached twice through different joins: union the projections
                Some(existing) => {
                    for (k, v) in entry {
                        existing.entry(k).or_insert(v);
                    }
                }
                None => {
                    graphs.insert(doc.id.clone(), entry);
                }
            }
            view_joins(spec, root, doc, &join.joins, joined, graphs)?;
        }
    }
    Ok(())
}

/// View: the root description plus joined descriptions under `_graphs`
///
/// # Errors
/// Missing required joins
pub fn view_value(
    spec: &Specification,
    root: &BaseDocument,
    joined: &JoinedResources,
) -> CompositeResult<Map<String, Value>> {
    let mut graphs = BTreeMap::new();
    graphs.insert(root.id.clone(), graph_entry(root, &spec.include));
    view_joins(spec, root, root, &spec.joins, joined, &mut graphs)?;

    // root first, joined resources after in id order
    let mut ordered = Vec::with_capacity(graphs.len());
    if let Some(first) = graphs.remove(&root.id) {
        ordered.push(Value::Object(first));
    }
    ordered.extend(graphs.into_values().map(Value::Object));

    let mut value = Map::new();
    value.insert("_graphs".to_string(), Value::Array(ordered));
    Ok(value)
}

fn index_value(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => tokenize(s),
        Value::Array(items) => items.iter().flat_map(index_value).collect(),
        Value::Null => Vec::new(),
        other => tokenize(&other.to_string()),
    }
}

fn put_terms(index: &mut BTreeMap<String, Vec<String>>, name: &str, value: &Value) {
    let terms = index.entry(name.to_string()).or_default();
    for term in index_value(value) {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
}

fn search_joins(
    spec: &Specification,
    root: &BaseDocument,
    source: &BaseDocument,
    joins: &BTreeMap<String, JoinSpec>,
    joined: &JoinedResources,
    index: &mut BTreeMap<String, Vec<String>>,
    result: &mut Map<String, Value>,
) -> CompositeResult<()> {
    for (predicate, join) in joins {
        for doc in resolve_join(spec, root, source, predicate, join, joined)? {
            for field in &join.indices {
                if let Some(v) = field_value(doc, field) {
                    put_terms(index, &field.field_name, &v);
                }
            }
            for field in &join.fields {
                if let Some(v) = field_value(doc, field) {
                    put(result, &field.field_name, v);
                }
            }
            search_joins(spec, root, doc, &join.joins, joined, index, result)?;
        }
    }
    Ok(())
}

/// Search document: tokenized index fields plus a `result` projection
///
/// # Errors
/// Missing required joins
pub fn search_value(
    spec: &Specification,
    root: &BaseDocument,
    joined: &JoinedResources,
) -> CompositeResult<Map<String, Value>> {
    let mut index = BTreeMap::new();
    let mut result = Map::new();
    for field in &spec.indices {
        if let Some(v) = field_value(root, field) {
            put_terms(&mut index, &field.field_name, &v);
        }
    }
    for field in &spec.fields {
        if let Some(v) = field_value(root, field) {
            put(&mut result, &field.field_name, v);
        }
    }
    search_joins(spec, root, root, &spec.joins, joined, &mut index, &mut result)?;
    strip(&mut result, &temporaries(spec));

    let mut value = Map::new();
    for (name, terms) in index {
        value.insert(name, Value::Array(terms.into_iter().map(Value::String).collect()));
    }
    value.insert("result".to_string(), Value::Object(result));
    Ok(value)
}
