//! Search documents
//!
//! Documents live in the search provider rather than the document store.
//! A resource may own documents of several search specs at once; the shared
//! update path removes those whose spec it no longer matches.

use crate::composite::{CompositeSpecification, Sources};
use crate::error::CompositeResult;
use crate::extract::{search_value, JoinedResources};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use strata_graph::{CompositeId, ResourceId};
use strata_spec::{CompositeKind, Specification};
use strata_store::{
    BaseDocument, CompositeDocument, SearchProvider, SearchQuery, SearchQueryError, SearchResults,
    StoreResult,
};

/// Search documents held by a [`SearchProvider`]
#[derive(Clone)]
pub struct SearchComposite {
    sources: Sources,
    provider: Arc<dyn SearchProvider>,
}

impl fmt::Debug for SearchComposite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchComposite")
            .field("sources", &self.sources)
            .finish_non_exhaustive()
    }
}

impl SearchComposite {
    /// Create over `sources`, indexing into `provider`
    #[must_use]
    pub fn new(sources: Sources, provider: Arc<dyn SearchProvider>) -> Self {
        Self { sources, provider }
    }

    /// Run a query against the provider
    ///
    /// # Errors
    /// [`SearchQueryError`] for invalid input
    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResults, SearchQueryError> {
        self.provider.search(query).await
    }

    /// Remove every search document of `resource` whose type is in `types`
    /// (all types when empty)
    ///
    /// # Errors
    /// Store failures
    pub async fn delete_types(&self, resource: &ResourceId, types: &[String]) -> StoreResult<usize> {
        self.provider
            .delete_document(&resource.resource, &resource.context, types)
            .await
    }
}

#[async_trait::async_trait]
impl CompositeSpecification for SearchComposite {
    fn kind(&self) -> CompositeKind {
        CompositeKind::Search
    }

    fn sources(&self) -> &Sources {
        &self.sources
    }

    fn shape(
        &self,
        spec: &Specification,
        root: &BaseDocument,
        joined: &JoinedResources,
    ) -> CompositeResult<Map<String, Value>> {
        search_value(spec, root, joined)
    }

    async fn save(&self, doc: CompositeDocument) -> StoreResult<()> {
        self.provider.index_document(doc).await
    }

    async fn remove(&self, id: &CompositeId) -> StoreResult<bool> {
        let removed = self
            .delete_types(&id.resource_id(), std::slice::from_ref(&id.spec))
            .await?;
        Ok(removed > 0)
    }

    async fn fetch(&self, id: &CompositeId) -> StoreResult<Option<CompositeDocument>> {
        self.provider.get_document(id).await
    }

    async fn for_resource(&self, resource: &ResourceId) -> StoreResult<Vec<CompositeDocument>> {
        self.provider.find_by_resource(resource).await
    }

    async fn dependents(&self, resources: &[ResourceId]) -> StoreResult<Vec<CompositeDocument>> {
        self.provider.find_impacted(resources).await
    }

    async fn for_spec(&self, spec: &str) -> StoreResult<Vec<CompositeDocument>> {
        self.provider.find_by_spec(spec).await
    }

    async fn remove_stale(&self, spec: &str, before: DateTime<Utc>) -> StoreResult<usize> {
        self.provider.delete_stale(spec, before).await
    }

    async fn ensure_indexes(&self) -> CompositeResult<usize> {
        // the provider owns its own indexing
        Ok(0)
    }
}
