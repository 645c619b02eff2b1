//! Flattened table rows

use crate::composite::{CompositeSpecification, Sources};
use crate::error::CompositeResult;
use crate::extract::{table_row, JoinedResources};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use strata_graph::{CompositeId, ResourceId};
use strata_spec::{CompositeKind, Specification};
use strata_store::{BaseDocument, CompositeDocument, StoreResult};

/// Table rows stored in the `table_rows` collection
#[derive(Debug, Clone)]
pub struct TableComposite {
    sources: Sources,
}

impl TableComposite {
    /// Create over `sources`
    #[inline]
    #[must_use]
    pub fn new(sources: Sources) -> Self {
        Self { sources }
    }

    /// One page of a spec's rows, ordered by resource
    ///
    /// # Errors
    /// Store failures
    pub async fn rows(
        &self,
        spec: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> StoreResult<Vec<CompositeDocument>> {
        let rows = self.for_spec(spec).await?.into_iter().skip(offset);
        Ok(match limit {
            Some(n) => rows.take(n).collect(),
            None => rows.collect(),
        })
    }
}

const COLLECTION: &str = "table_rows";

#[async_trait::async_trait]
impl CompositeSpecification for TableComposite {
    fn kind(&self) -> CompositeKind {
        CompositeKind::Table
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
        table_row(spec, root, joined)
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
