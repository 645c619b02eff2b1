//! Base and composite document shapes

use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strata_graph::{CompositeId, Object, PredicateMap, ResourceId, SubjectChange, RDF_TYPE};

/// Transient write lock held by one transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentLock {
    /// Transaction holding the lock
    #[serde(rename = "_lockedForTrans")]
    pub transaction_id: String,
    /// When the lock was taken
    #[serde(rename = "_lockedForTransTS")]
    pub locked_at: DateTime<Utc>,
}

/// One subject's flattened predicate projection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseDocument {
    /// Document key
    #[serde(rename = "_id")]
    pub id: ResourceId,
    /// Predicate to object values
    #[serde(default, skip_serializing_if = "PredicateMap::is_empty")]
    pub properties: PredicateMap,
    /// Incremented on every committed write
    #[serde(rename = "_version", default)]
    pub version: u64,
    /// Set by the first committed write
    #[serde(rename = "_cts", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Refreshed by every committed write
    #[serde(rename = "_uts", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Present while a transaction holds the document
    #[serde(rename = "_lock", default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<DocumentLock>,
}

impl BaseDocument {
    /// Empty, never-written document
    #[must_use]
    pub fn new(id: ResourceId) -> Self {
        Self {
            id,
            properties: PredicateMap::new(),
            version: 0,
            created_at: None,
            updated_at: None,
            lock: None,
        }
    }

    /// Whether this is a placeholder inserted only to carry a lock
    #[inline]
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.version == 0 && self.created_at.is_none() && self.properties.is_empty()
    }

    /// `rdf:type` values
    #[must_use]
    pub fn rdf_types(&self) -> Vec<String> {
        self.values(RDF_TYPE).map(|o| o.value.clone()).collect()
    }

    /// Objects of `predicate`
    pub fn values<'a>(&'a self, predicate: &str) -> impl Iterator<Item = &'a Object> {
        self.properties.get(predicate).into_iter().flatten()
    }

    /// Merge additions and drop removals
    ///
    /// # Errors
    /// [`StoreError::MissingTriple`] when a removal is not present; the
    /// document is left untouched in that case
    pub fn apply(&mut self, change: &SubjectChange) -> StoreResult<()> {
        for (predicate, objects) in &change.removals {
            for object in objects {
                let present = self
                    .properties
                    .get(predicate)
                    .is_some_and(|o| o.contains(object));
                if !present {
                    return Err(StoreError::MissingTriple {
                        resource: self.id.clone(),
                        predicate: predicate.clone(),
                        value: object.value.clone(),
                    });
                }
            }
        }

        for (predicate, objects) in &change.removals {
            if let Some(current) = self.properties.get_mut(predicate) {
                for object in objects {
                    current.remove(object);
                }
                if current.is_empty() {
                    self.properties.remove(predicate);
                }
            }
        }
        for (predicate, objects) in &change.additions {
            self.properties
                .entry(predicate.clone())
                .or_default()
                .extend(objects.iter().cloned());
        }
        Ok(())
    }

    /// Stamp a committed write: bump version, refresh timestamps
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = Some(now);
        if self.created_at.is_none() {
            self.created_at = Some(now);
        }
    }
}

/// A derived document: view, table row or search document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeDocument {
    /// `{r, c, type}` key
    #[serde(rename = "_id")]
    pub id: CompositeId,
    /// Generated content
    pub value: serde_json::Map<String, serde_json::Value>,
    /// Every resource this document's content depends on
    #[serde(rename = "_impactIndex")]
    pub impact_index: BTreeSet<ResourceId>,
    /// Spec revision the document was built against
    #[serde(rename = "_rev", default)]
    pub revision: u32,
    /// Time of the last (re)generation
    #[serde(rename = "_uts")]
    pub generated_at: DateTime<Utc>,
}

impl CompositeDocument {
    /// Whether `resource` is a dependency of this document
    #[inline]
    #[must_use]
    pub fn depends_on(&self, resource: &ResourceId) -> bool {
        self.impact_index.contains(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn id() -> ResourceId {
        ResourceId::new("http://example.com/doc1", "http://example.com/")
    }

    fn change(add: &[(&str, Object)], remove: &[(&str, Object)]) -> SubjectChange {
        let mut c = SubjectChange::default();
        for (p, o) in add {
            c.additions
                .entry((*p).to_string())
                .or_insert_with(BTreeSet::new)
                .insert(o.clone());
        }
        for (p, o) in remove {
            c.removals
                .entry((*p).to_string())
                .or_insert_with(BTreeSet::new)
                .insert(o.clone());
        }
        c
    }

    #[test]
    fn apply_merges_and_removes() {
        let mut doc = BaseDocument::new(id());
        doc.apply(&change(
            &[(RDF_TYPE, Object::uri("bibo:Book")), ("dct:title", Object::literal("T"))],
            &[],
        ))
        .unwrap();
        assert_eq!(doc.rdf_types(), vec!["bibo:Book".to_string()]);

        doc.apply(&change(&[], &[("dct:title", Object::literal("T"))])).unwrap();
        assert!(!doc.properties.contains_key("dct:title"));
    }

    #[test]
    fn apply_rejects_missing_removal_without_mutating() {
        let mut doc = BaseDocument::new(id());
        doc.apply(&change(&[("dct:title", Object::literal("T"))], &[])).unwrap();
        let before = doc.clone();

        let err = doc
            .apply(&change(
                &[("dct:title", Object::literal("New"))],
                &[("dct:title", Object::literal("Other"))],
            ))
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingTriple { .. }));
        assert_eq!(doc, before);
    }

    #[test]
    fn touch_sets_created_once() {
        let mut doc = BaseDocument::new(id());
        let t1 = Utc::now();
        doc.touch(t1);
        let t2 = t1 + chrono::Duration::seconds(5);
        doc.touch(t2);
        assert_eq!(doc.version, 2);
        assert_eq!(doc.created_at, Some(t1));
        assert_eq!(doc.updated_at, Some(t2));
    }

    #[test]
    fn placeholder_detection() {
        let mut doc = BaseDocument::new(id());
        assert!(doc.is_placeholder());
        doc.touch(Utc::now());
        assert!(!doc.is_placeholder());
    }

    #[test]
    fn emptied_document_keeps_bookkeeping_only() {
        let mut doc = BaseDocument::new(id());
        doc.apply(&change(&[(RDF_TYPE, Object::uri("bibo:Book"))], &[])).unwrap();
        doc.touch(Utc::now());
        doc.apply(&change(&[], &[(RDF_TYPE, Object::uri("bibo:Book"))])).unwrap();
        doc.touch(Utc::now());

        let json = serde_json::to_value(&doc).unwrap();
        let keys: BTreeSet<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            ["_id", "_version", "_cts", "_uts"].into_iter().collect()
        );
    }
}
