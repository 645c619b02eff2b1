//! Materialized views

use crate::composite::{CompositeSpecification, Sources};
use crate::error::CompositeResult;
use crate::extract::{view_value, JoinedResources};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use strata_graph::{CompositeId, ResourceId};
use strata_spec::{CompositeKind, Specification};
use strata_store::{BaseDocument, CompositeDocument, StoreResult};

/// Graph-shaped views stored in the `views` collection
#[derive(Debug, Clone)]
pub struct ViewComposite {
    sources: Sources,
}

impl ViewComposite {
    /// Create over `sources`
    #[inline]
    #[must_use]
    pub fn new(sources: Sources) -> Self {
        Self { sources }
    }
}

const COLLECTION: &str = "views";

#[async_trait::async_trait]
impl CompositeSpecification for ViewComposite {
    fn kind(&self) -> CompositeKind {
        CompositeKind::View
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
        view_value(spec, root, joined)
    }

    async fn save(&self, doc: CompositeDocument) -> StoreResult<()> {
        self.sources.documents.upsert_composite(COLLECTION, doc).await
    }

    async fn remove(&self, id: &CompositeId) -> StoreResult<bool> {
        self.sources.documents.delete_composite(COLLECTION, id).await
    }

    async fn fetch(&self, id: &CompositeId) -> StoreResult<Option<CompositeDocument>> {
        self.sources.documents.get_composite(COLLECTION, id).await
    }

    async fn for_resource(&self, resource: &ResourceId) -> StoreResult<Vec<CompositeDocument>> {
        self.sources.documents.find_by_resource(COLLECTION, resource).await
    }

    async fn dependents(&self, resources: &[ResourceId]) -> StoreResult<Vec<CompositeDocument>> {
        self.sources.documents.find_impacted(COLLECTION, resources).await
    }

    async fn for_spec(&self, spec: &str) -> StoreResult<Vec<CompositeDocument>> {
        self.sources.documents.find_by_spec(COLLECTION, spec).await
    }

    async fn remove_stale(&self, spec: &str, before: DateTime<Utc>) -> StoreResult<usize> {
        self.sources.documents.delete_stale(COLLECTION, spec, before).await
    }
}
