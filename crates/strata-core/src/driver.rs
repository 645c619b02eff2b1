//! The public facade
//!
//! A [`Driver`] owns the wiring for every configured store. Writes go
//! through the transaction coordinator; afterwards composite kinds
//! configured as synchronous are regenerated before the call returns and
//! the rest are handed to the queue as one discovery job.

use crate::error::{StrataError, StrataResult};
use crate::jobs::Job;
use crate::runner::JobRunner;
use crate::services::{Services, StoreServices};
use crate::transaction::SaveOutcome;
use std::sync::Arc;
use strata_composite::{CompositeSpecification, UpdateReport};
use strata_graph::{ChangedPredicates, MemoryGraph, ResourceId};
use strata_spec::{CompositeKind, Config, SpecError};
use strata_store::{CompositeDocument, DocumentStore, JobToken, JobTransport, SearchProvider, SearchQuery, SearchResults};

/// Entry point for reads, writes and maintenance
#[derive(Debug, Clone)]
pub struct Driver {
    services: Arc<Services>,
}

impl Driver {
    /// Wire a driver and create the indexes the specs declare
    ///
    /// # Errors
    /// [`StrataError::Configuration`] for invalid configuration,
    /// [`StrataError::Store`] if index creation fails
    pub async fn new(
        config: Config,
        documents: Arc<dyn DocumentStore>,
        provider: Arc<dyn SearchProvider>,
        transport: Arc<dyn JobTransport>,
    ) -> StrataResult<Self> {
        let services = Services::new(config, documents, provider, transport)?;
        for store in services.stores.values() {
            for composite in store.composites.iter() {
                let created = composite.ensure_indexes().await?;
                if created > 0 {
                    tracing::debug!(store = %store.name, kind = %composite.kind(), created, "indexes ensured");
                }
            }
        }
        tracing::info!(stores = services.stores.len(), "driver ready");
        Ok(Self {
            services: Arc::new(services),
        })
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.services.config
    }

    /// Runner sharing this driver's wiring
    #[must_use]
    pub fn runner(&self) -> JobRunner {
        JobRunner::new(self.services.clone())
    }

    fn store(&self, name: &str) -> StrataResult<&StoreServices> {
        self.services.store(name)
    }

    fn context<'a>(&'a self, context: Option<&'a str>) -> &'a str {
        context.unwrap_or(self.services.config.default_context.as_str())
    }

    /// Commit the difference between `old` and `new` and bring derived
    /// documents up to date
    ///
    /// # Errors
    /// - [`StrataError::Configuration`] for unknown stores or pods
    /// - [`StrataError::TransactionFailure`] after a rollback, including
    ///   lock retries running out
    ///
    /// Derived documents that fail to build inline are logged; they never
    /// turn a committed save into an error.
    /// - [`StrataError::Queuing`] when the discovery job could not be
    ///   enqueued; the commit itself stands
    #[tracing::instrument(skip(self, old, new, description))]
    pub async fn save_changes(
        &self,
        store: &str,
        pod: &str,
        old: &MemoryGraph,
        new: &MemoryGraph,
        context: Option<&str>,
        description: Option<String>,
    ) -> StrataResult<SaveOutcome> {
        let services = self.store(store)?;
        services.require_pod(pod)?;
        let context = self.context(context);

        let outcome = services
            .coordinator
            .save_changes(pod, old, new, context, description)
            .await?;
        if outcome.is_noop() {
            return Ok(outcome);
        }

        let asynchronous = &self.services.config.async_operations;
        let (deferred, inline): (Vec<CompositeKind>, Vec<CompositeKind>) =
            CompositeKind::ALL.into_iter().partition(|k| asynchronous.is_async(*k));

        let report = Self::materialize(services, pod, &inline, &outcome.changes, context).await;
        if report.failed() > 0 {
            tracing::warn!(failed = report.failed(), "some derived documents could not be built");
        }

        if !deferred.is_empty() {
            let job = Job::DiscoverImpactedSubjects {
                store: store.to_string(),
                pod: pod.to_string(),
                context: context.to_string(),
                changes: outcome.changes.clone(),
                operations: deferred,
                queue: None,
            };
            let queue = &self.services.queue;
            queue.submit(&queue.config().discover_queue, &job).await?;
        }
        Ok(outcome)
    }

    async fn materialize(
        services: &StoreServices,
        pod: &str,
        kinds: &[CompositeKind],
        changes: &ChangedPredicates,
        context: &str,
    ) -> UpdateReport {
        let mut report = UpdateReport::default();
        for kind in kinds {
            // the base data is committed; a failed kind is left for a refresh
            if let Err(e) = Self::materialize_kind(services, pod, *kind, changes, context, &mut report).await {
                metrics::counter!("strata.driver.inline_failed", "kind" => kind.as_str()).increment(1);
                tracing::error!(operation = %kind, error = %e, "inline materialization failed after commit");
            }
        }
        report
    }

    async fn materialize_kind(
        services: &StoreServices,
        pod: &str,
        kind: CompositeKind,
        changes: &ChangedPredicates,
        context: &str,
        report: &mut UpdateReport,
    ) -> StrataResult<()> {
        let composite = services.composites.get(kind);
        for subject in composite.impacted_subjects(pod, changes, context).await? {
            report.extend(composite.update(&subject).await?);
        }
        Ok(())
    }

    /// Fetch a view, generating it when it does not exist yet
    ///
    /// # Errors
    /// [`StrataError::Configuration`] for unknown stores or non-view specs
    pub async fn get_view(
        &self,
        store: &str,
        resource: &str,
        context: Option<&str>,
        spec: &str,
    ) -> StrataResult<Option<CompositeDocument>> {
        let services = self.store(store)?;
        let registered = services.registry.require(spec)?;
        if registered.kind != CompositeKind::View {
            return Err(StrataError::Configuration(SpecError::invalid(spec, "is not a view specification")));
        }
        let views = &services.composites.views;
        let id = ResourceId::new(resource, self.context(context));
        let key = id.composite(spec);
        if let Some(doc) = views.fetch(&key).await? {
            return Ok(Some(doc));
        }
        views.regenerate(&id, spec).await?;
        Ok(views.fetch(&key).await?)
    }

    /// One page of table rows
    ///
    /// # Errors
    /// [`StrataError::Configuration`] for unknown stores or non-table specs
    pub async fn get_table_rows(
        &self,
        store: &str,
        spec: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> StrataResult<Vec<CompositeDocument>> {
        let services = self.store(store)?;
        let registered = services.registry.require(spec)?;
        if registered.kind != CompositeKind::Table {
            return Err(StrataError::Configuration(SpecError::invalid(spec, "is not a table specification")));
        }
        Ok(services.composites.tables.rows(spec, offset, limit).await?)
    }

    /// Query search documents
    ///
    /// # Errors
    /// [`StrataError::SearchQuery`] for invalid input,
    /// [`StrataError::Configuration`] for unknown stores or non-search specs
    pub async fn search(&self, store: &str, query: &SearchQuery) -> StrataResult<SearchResults> {
        let services = self.store(store)?;
        query.validate()?;
        let registered = services.registry.require(&query.spec)?;
        if registered.kind != CompositeKind::Search {
            return Err(StrataError::Configuration(SpecError::invalid(&query.spec, "is not a search specification")));
        }
        Ok(services.composites.search.search(query).await?)
    }

    /// Queue a backfill of every document of `spec`
    ///
    /// # Errors
    /// [`StrataError::Configuration`] for unknown stores or specs,
    /// [`StrataError::Queuing`] if the job could not be enqueued
    pub async fn generate(&self, store: &str, spec: &str, context: Option<&str>) -> StrataResult<JobToken> {
        let services = self.store(store)?;
        services.registry.require(spec)?;
        let job = Job::GenerateForSpec {
            store: store.to_string(),
            spec: spec.to_string(),
            context: context.map(str::to_string),
            queue: None,
        };
        self.submit_maintenance(&job).await
    }

    /// Queue regeneration of documents built against an older revision of
    /// `spec`
    ///
    /// # Errors
    /// As [`Driver::generate`]
    pub async fn refresh_stale(&self, store: &str, spec: &str) -> StrataResult<JobToken> {
        let services = self.store(store)?;
        services.registry.require(spec)?;
        let job = Job::RefreshStale {
            store: store.to_string(),
            spec: spec.to_string(),
            queue: None,
        };
        self.submit_maintenance(&job).await
    }

    async fn submit_maintenance(&self, job: &Job) -> StrataResult<JobToken> {
        let queue = &self.services.queue;
        queue.submit(&queue.config().discover_queue, job).await
    }
}
