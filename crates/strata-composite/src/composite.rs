//! The seam shared by views, tables and search documents
//!
//! Each kind supplies its document shape and where its documents live;
//! impact resolution, regeneration, backfill and revision maintenance are
//! common and provided by [`CompositeSpecification`].

use crate::error::CompositeResult;
use crate::extract::JoinedResources;
use crate::subject::ImpactedSubject;
use crate::{impact, materialize};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use strata_graph::{ChangedPredicates, CompositeId, ResourceId};
use strata_spec::{CompositeKind, SpecRegistry, Specification};
use strata_store::{BaseDocument, CompositeDocument, DocumentStore, StoreResult};

/// What a composite kind reads from
#[derive(Clone)]
pub struct Sources {
    /// Store name
    pub store: String,
    /// Specifications of the store
    pub registry: Arc<SpecRegistry>,
    /// Base and composite documents
    pub documents: Arc<dyn DocumentStore>,
}

impl Sources {
    /// Create sources
    #[must_use]
    pub fn new(
        store: impl Into<String>,
        registry: Arc<SpecRegistry>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            store: store.into(),
            registry,
            documents,
        }
    }
}

impl fmt::Debug for Sources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sources")
            .field("store", &self.store)
            .field("specs", &self.registry.len())
            .finish_non_exhaustive()
    }
}

/// Result of regenerating one (resource, spec) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Document written
    Generated(CompositeId),
    /// Resource no longer applicable; document removed
    Deleted(CompositeId),
    /// Not applicable and nothing stored
    Skipped(CompositeId),
    /// Build failed; siblings were unaffected
    Failed {
        /// Document that could not be built
        id: CompositeId,
        /// Error message
        reason: String,
    },
}

/// Outcomes of one [`CompositeSpecification::update`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// One entry per spec considered
    pub outcomes: Vec<Outcome>,
}

impl UpdateReport {
    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }

    /// Documents written
    #[must_use]
    pub fn generated(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Generated(_)))
    }

    /// Documents removed
    #[must_use]
    pub fn deleted(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Deleted(_)))
    }

    /// Builds that failed
    #[must_use]
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed { .. }))
    }

    /// Merge another report into this one
    pub fn extend(&mut self, other: UpdateReport) {
        self.outcomes.extend(other.outcomes);
    }
}

/// A family of derived documents
#[async_trait::async_trait]
pub trait CompositeSpecification: Send + Sync {
    /// Which family
    fn kind(&self) -> CompositeKind;

    /// Store, registry and documents
    fn sources(&self) -> &Sources;

    /// Build the document value for an applicable resource
    ///
    /// # Errors
    /// Materialization errors for this build only
    fn shape(
        &self,
        spec: &Specification,
        root: &BaseDocument,
        joined: &JoinedResources,
    ) -> CompositeResult<Map<String, Value>>;

    /// Persist a built document
    async fn save(&self, doc: CompositeDocument) -> StoreResult<()>;

    /// Remove one document; `false` when absent
    async fn remove(&self, id: &CompositeId) -> StoreResult<bool>;

    /// Fetch one document
    async fn fetch(&self, id: &CompositeId) -> StoreResult<Option<CompositeDocument>>;

    /// Documents rooted at `resource`
    async fn for_resource(&self, resource: &ResourceId) -> StoreResult<Vec<CompositeDocument>>;

    /// Documents whose impact index mentions any of `resources`
    async fn dependents(&self, resources: &[ResourceId]) -> StoreResult<Vec<CompositeDocument>>;

    /// Documents of one spec
    async fn for_spec(&self, spec: &str) -> StoreResult<Vec<CompositeDocument>>;

    /// Delete documents of `spec` generated before `before`
    async fn remove_stale(&self, spec: &str, before: DateTime<Utc>) -> StoreResult<usize>;

    /// Create the store indexes declared by this kind's specs
    async fn ensure_indexes(&self) -> CompositeResult<usize> {
        let sources = self.sources();
        let collection = self.kind().collection();
        let mut created = 0;
        for spec in sources.registry.of_kind(self.kind()) {
            if !spec.spec.ensure_indexes.is_empty() {
                created += sources
                    .documents
                    .ensure_indexes(collection, &spec.spec.ensure_indexes)
                    .await?;
            }
        }
        Ok(created)
    }

    /// Resources whose documents of this kind must be regenerated after
    /// `changes` were committed to `pod` in `context`
    async fn impacted_subjects(
        &self,
        pod: &str,
        changes: &ChangedPredicates,
        context: &str,
    ) -> CompositeResult<Vec<ImpactedSubject>> {
        impact::resolve(self, pod, changes, context).await
    }

    /// Regenerate or delete every document named by `subject`
    async fn update(&self, subject: &ImpactedSubject) -> CompositeResult<UpdateReport> {
        materialize::update(self, subject).await
    }

    /// Regenerate one (resource, spec) pair
    async fn regenerate(&self, resource: &ResourceId, spec: &str) -> CompositeResult<Outcome> {
        let spec = self.sources().registry.require(spec)?;
        materialize::regenerate(self, resource, spec).await
    }

    /// One subject per resource of the spec's types, for bulk backfill
    async fn backfill_subjects(&self, spec: &str, context: &str) -> CompositeResult<Vec<ImpactedSubject>> {
        materialize::backfill_subjects(self, spec, context).await
    }

    /// Subjects whose stored document was built against an older revision
    async fn stale_subjects(&self, spec: &str) -> CompositeResult<Vec<ImpactedSubject>> {
        materialize::stale_subjects(self, spec).await
    }
}
