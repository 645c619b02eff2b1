//! Search document provider
//!
//! Search documents are composites whose value carries one or more term
//! index fields (e.g. `search_terms`) and a `result` object returned to
//! callers. Ranking is the provider's business; [`MemorySearchProvider`]
//! matches all query terms and orders hits by resource.

use crate::document::CompositeDocument;
use crate::error::{StoreError, StoreResult};
use crate::memory::CompositeTable;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use strata_graph::{CompositeId, ResourceId};

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is",
    "it", "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there",
    "these", "they", "this", "to", "was", "will", "with",
];

/// Split text into lowercased index terms, dropping stop words
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

/// Invalid search input; never retried
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SearchQueryError {
    /// Query text was empty
    #[error("query must not be empty")]
    EmptyQuery,
    /// Search document type was empty
    #[error("search document type must not be empty")]
    EmptyType,
    /// No index fields to match against
    #[error("at least one index field is required")]
    NoIndices,
    /// No result fields to return
    #[error("at least one result field is required")]
    NoFields,
    /// Negative limit
    #[error("limit must not be negative (got {0})")]
    NegativeLimit(i64),
    /// Negative offset
    #[error("offset must not be negative (got {0})")]
    NegativeOffset(i64),
}

/// Search request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Free text
    pub query: String,
    /// Search document spec id
    #[serde(rename = "type")]
    pub spec: String,
    /// Index fields to match terms against
    pub indices: Vec<String>,
    /// Dotted paths of fields to return
    pub fields: Vec<String>,
    /// Page size
    pub limit: i64,
    /// Page start
    pub offset: i64,
}

impl SearchQuery {
    /// Reject malformed requests
    ///
    /// # Errors
    /// The first violated constraint
    pub fn validate(&self) -> Result<(), SearchQueryError> {
        if self.query.trim().is_empty() {
            return Err(SearchQueryError::EmptyQuery);
        }
        if self.spec.trim().is_empty() {
            return Err(SearchQueryError::EmptyType);
        }
        if self.indices.is_empty() {
            return Err(SearchQueryError::NoIndices);
        }
        if self.fields.is_empty() {
            return Err(SearchQueryError::NoFields);
        }
        if self.limit < 0 {
            return Err(SearchQueryError::NegativeLimit(self.limit));
        }
        if self.offset < 0 {
            return Err(SearchQueryError::NegativeOffset(self.offset));
        }
        Ok(())
    }
}

/// Response metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHead {
    /// Total matches before paging
    pub count: usize,
    /// Requested page size
    pub limit: i64,
    /// Requested page start
    pub offset: i64,
    /// Original query text
    pub query: String,
    /// Terms actually matched after stop-word removal
    pub query_terms_used: Vec<String>,
    /// Wall time, e.g. `"0.0012 secs"`
    pub duration: String,
}

/// Search response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    /// Metadata
    pub head: SearchHead,
    /// Projected hits
    pub results: Vec<Map<String, Value>>,
}

/// Full-text provider seam
#[async_trait::async_trait]
pub trait SearchProvider: Send + Sync {
    /// Insert or replace a search document
    async fn index_document(&self, doc: CompositeDocument) -> StoreResult<()>;

    /// Delete `resource`'s documents of the given types (all types when empty)
    async fn delete_document(
        &self,
        resource: &str,
        context: &str,
        types: &[String],
    ) -> StoreResult<usize>;

    /// Run a query
    async fn search(&self, query: &SearchQuery) -> Result<SearchResults, SearchQueryError>;

    /// Fetch by `_id`
    async fn get_document(&self, id: &CompositeId) -> StoreResult<Option<CompositeDocument>>;

    /// Documents whose impact index contains any of `resources`
    async fn find_impacted(&self, resources: &[ResourceId]) -> StoreResult<Vec<CompositeDocument>>;

    /// Documents of one search spec
    async fn find_by_spec(&self, spec: &str) -> StoreResult<Vec<CompositeDocument>>;

    /// Documents rooted at `resource`
    async fn find_by_resource(&self, resource: &ResourceId) -> StoreResult<Vec<CompositeDocument>>;

    /// Delete documents of `spec` last generated before `before`
    async fn delete_stale(&self, spec: &str, before: DateTime<Utc>) -> StoreResult<usize>;
}

/// In-process search provider
#[derive(Debug, Default)]
pub struct MemorySearchProvider {
    table: RwLock<CompositeTable>,
    failures_pending: AtomicUsize,
}

impl MemorySearchProvider {
    /// Create an empty provider
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed documents
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    /// Whether nothing is indexed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fail the next `n` index writes with [`StoreError::Backend`]
    pub fn fail_next_writes(&self, n: usize) {
        self.failures_pending.store(n, Ordering::SeqCst);
    }
}

fn lookup<'a>(value: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = value.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn insert_path(target: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            target.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = target
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(map) = child {
                insert_path(map, rest, value);
            }
        }
    }
}

fn index_terms(doc: &CompositeDocument, indices: &[String]) -> BTreeSet<String> {
    indices
        .iter()
        .filter_map(|field| lookup(&doc.value, field))
        .flat_map(|v| match v {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        })
        .filter_map(|v| v.as_str().map(str::to_lowercase))
        .collect()
}

#[async_trait::async_trait]
impl SearchProvider for MemorySearchProvider {
    async fn index_document(&self, doc: CompositeDocument) -> StoreResult<()> {
        let failing = self
            .failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Backend(format!("index unavailable for {}", doc.id)));
        }
        self.table.write().upsert(doc);
        Ok(())
    }

    async fn delete_document(
        &self,
        resource: &str,
        context: &str,
        types: &[String],
    ) -> StoreResult<usize> {
        let mut table = self.table.write();
        let targets: Vec<CompositeId> = table
            .by_resource(&ResourceId::new(resource, context))
            .into_iter()
            .map(|d| d.id)
            .filter(|id| types.is_empty() || types.contains(&id.spec))
            .collect();
        Ok(targets.iter().filter(|id| table.delete(id)).count())
    }

    async fn search(&self, query: &SearchQuery) -> Result<SearchResults, SearchQueryError> {
        query.validate()?;
        let started = Instant::now();
        let terms = tokenize(&query.query);

        let table = self.table.read();
        let hits: Vec<&CompositeDocument> = table
            .values()
            .filter(|d| d.id.spec == query.spec)
            .filter(|d| {
                let available = index_terms(d, &query.indices);
                !terms.is_empty() && terms.iter().all(|t| available.contains(t))
            })
            .collect();

        // validated non-negative above
        let offset = usize::try_from(query.offset).unwrap_or(0);
        let limit = usize::try_from(query.limit).unwrap_or(0);
        let results = hits
            .iter()
            .skip(offset)
            .take(limit)
            .map(|d| {
                let mut out = Map::new();
                out.insert(
                    "_id".to_string(),
                    serde_json::to_value(&d.id).unwrap_or(Value::Null),
                );
                for field in &query.fields {
                    if let Some(v) = lookup(&d.value, field) {
                        insert_path(&mut out, field, v.clone());
                    }
                }
                out
            })
            .collect();

        Ok(SearchResults {
            head: SearchHead {
                count: hits.len(),
                limit: query.limit,
                offset: query.offset,
                query: query.query.clone(),
                query_terms_used: terms,
                duration: format!("{:.4} secs", started.elapsed().as_secs_f64()),
            },
            results,
        })
    }

    async fn get_document(&self, id: &CompositeId) -> StoreResult<Option<CompositeDocument>> {
        Ok(self.table.read().get(id))
    }

    async fn find_impacted(&self, resources: &[ResourceId]) -> StoreResult<Vec<CompositeDocument>> {
        Ok(self.table.read().impacted(resources))
    }

    async fn find_by_spec(&self, spec: &str) -> StoreResult<Vec<CompositeDocument>> {
        Ok(self.table.read().by_spec(spec))
    }

    async fn find_by_resource(&self, resource: &ResourceId) -> StoreResult<Vec<CompositeDocument>> {
        Ok(self.table.read().by_resource(resource))
    }

    async fn delete_stale(&self, spec: &str, before: DateTime<Utc>) -> StoreResult<usize> {
        Ok(self.table.write().delete_stale(spec, before))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(r: &str, spec: &str, terms: &[&str], title: &str) -> CompositeDocument {
        let value = json!({
            "search_terms": terms,
            "result": {"title": title, "link": r},
        });
        CompositeDocument {
            id: ResourceId::new(r, "ctx").composite(spec),
            value: value.as_object().unwrap().clone(),
            impact_index: [ResourceId::new(r, "ctx")].into_iter().collect(),
            revision: 0,
            generated_at: Utc::now(),
        }
    }

    fn query(text: &str) -> SearchQuery {
        SearchQuery {
            query: text.to_string(),
            spec: "i_search_resource".to_string(),
            indices: vec!["search_terms".to_string()],
            fields: vec!["result.title".to_string()],
            limit: 10,
            offset: 0,
        }
    }

    #[test]
    fn tokenize_drops_stop_words() {
        assert_eq!(tokenize("The Physics of Sound"), vec!["physics", "sound"]);
        assert!(tokenize("  ").is_empty());
    }

    #[test]
    fn validation_rejects_bad_input() {
        assert_eq!(query("").validate(), Err(SearchQueryError::EmptyQuery));

        let mut q = query("x");
        q.limit = -1;
        assert_eq!(q.validate(), Err(SearchQueryError::NegativeLimit(-1)));

        let mut q = query("x");
        q.offset = -3;
        assert_eq!(q.validate(), Err(SearchQueryError::NegativeOffset(-3)));

        let mut q = query("x");
        q.indices.clear();
        assert_eq!(q.validate(), Err(SearchQueryError::NoIndices));

        let mut q = query("x");
        q.fields.clear();
        assert_eq!(q.validate(), Err(SearchQueryError::NoFields));

        let mut q = query("x");
        q.spec = String::new();
        assert_eq!(q.validate(), Err(SearchQueryError::EmptyType));
    }

    #[tokio::test]
    async fn search_matches_all_terms_and_pages() {
        let provider = MemorySearchProvider::new();
        provider
            .index_document(doc("a", "i_search_resource", &["physics", "sound"], "Sound"))
            .await
            .unwrap();
        provider
            .index_document(doc("b", "i_search_resource", &["physics", "light"], "Light"))
            .await
            .unwrap();
        provider
            .index_document(doc("c", "i_other", &["physics"], "Other"))
            .await
            .unwrap();

        let all = provider.search(&query("physics")).await.unwrap();
        assert_eq!(all.head.count, 2);
        assert_eq!(all.results[0]["result"]["title"], "Sound");
        assert_eq!(all.head.query_terms_used, vec!["physics"]);

        let narrowed = provider.search(&query("the physics of light")).await.unwrap();
        assert_eq!(narrowed.head.count, 1);
        assert_eq!(narrowed.results[0]["_id"]["r"], "b");

        let mut paged = query("physics");
        paged.offset = 1;
        paged.limit = 1;
        let page = provider.search(&paged).await.unwrap();
        assert_eq!(page.head.count, 2);
        assert_eq!(page.results.len(), 1);
        assert_eq!(page.results[0]["result"]["title"], "Light");
    }

    #[tokio::test]
    async fn delete_document_respects_types() {
        let provider = MemorySearchProvider::new();
        provider.index_document(doc("a", "i_one", &["x"], "A")).await.unwrap();
        provider.index_document(doc("a", "i_two", &["x"], "A")).await.unwrap();

        let removed = provider
            .delete_document("a", "ctx", &["i_two".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(provider.len(), 1);

        let removed = provider.delete_document("a", "ctx", &[]).await.unwrap();
        assert_eq!(removed, 1);
        assert!(provider.is_empty());
    }
}
