//! Job execution

use crate::error::StrataResult;
use crate::jobs::Job;
use crate::services::{Services, StoreServices};
use chrono::Utc;
use std::sync::Arc;
use strata_composite::{ImpactedSubject, UpdateReport};
use strata_graph::ChangedPredicates;
use strata_spec::CompositeKind;
use strata_store::{JobGroup, JobToken};

/// What one job did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobReport {
    /// Subjects resolved or processed
    pub subjects: usize,
    /// Follow-up jobs submitted
    pub enqueued: Vec<JobToken>,
    /// Regeneration outcomes
    pub update: UpdateReport,
    /// Stale documents removed by job group cleanup
    pub cleaned: usize,
}

/// Executes [`Job`]s against shared [`Services`]
#[derive(Debug, Clone)]
pub struct JobRunner {
    services: Arc<Services>,
}

impl JobRunner {
    /// Create a runner
    #[must_use]
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    /// Decode and run a transport payload
    ///
    /// # Errors
    /// [`StrataError::JobArgument`] for bad payloads, otherwise as
    /// [`JobRunner::perform`]
    pub async fn perform_payload(&self, payload: serde_json::Value) -> StrataResult<JobReport> {
        self.perform(Job::from_payload(payload)?).await
    }

    /// Run one job
    ///
    /// # Errors
    /// Configuration errors for unknown stores, pods or specs, queuing
    /// errors for follow-up jobs and store failures
    #[tracing::instrument(skip(self, job), fields(job = job.name(), store = job.store()))]
    pub async fn perform(&self, job: Job) -> StrataResult<JobReport> {
        job.validate()?;
        let store = self.services.store(job.store())?;
        match job {
            Job::DiscoverImpactedSubjects {
                pod,
                context,
                changes,
                operations,
                queue,
                ..
            } => {
                store.require_pod(&pod)?;
                self.discover(store, &pod, &changes, &context, &operations, queue.as_deref())
                    .await
            }
            Job::ApplyOperation { subjects, group, .. } => self.apply(store, &subjects, group.as_deref()).await,
            Job::GenerateForSpec {
                spec, context, queue, ..
            } => {
                let context = context.unwrap_or_else(|| self.services.config.default_context.clone());
                self.generate(store, &spec, &context, queue.as_deref()).await
            }
            Job::RefreshStale { spec, queue, .. } => self.refresh(store, &spec, queue.as_deref()).await,
        }
    }

    async fn discover(
        &self,
        store: &StoreServices,
        pod: &str,
        changes: &ChangedPredicates,
        context: &str,
        operations: &[CompositeKind],
        queue: Option<&str>,
    ) -> StrataResult<JobReport> {
        let mut subjects = Vec::new();
        for kind in operations {
            subjects.extend(store.composites.get(*kind).impacted_subjects(pod, changes, context).await?);
        }
        let count = subjects.len();
        let enqueued = if subjects.is_empty() {
            Vec::new()
        } else {
            self.services
                .queue
                .create_job(&store.name, &store.registry, subjects, queue, None)
                .await?
        };
        tracing::info!(impacted = count, jobs = enqueued.len(), "impacted subjects queued");
        Ok(JobReport {
            subjects: count,
            enqueued,
            ..JobReport::default()
        })
    }

    async fn apply(
        &self,
        store: &StoreServices,
        subjects: &[ImpactedSubject],
        group: Option<&str>,
    ) -> StrataResult<JobReport> {
        let mut report = JobReport {
            subjects: subjects.len(),
            ..JobReport::default()
        };
        for subject in subjects {
            let update = store.composites.get(subject.operation).update(subject).await?;
            report.update.extend(update);
        }
        if let Some(group) = group {
            report.cleaned = self.complete_group(store, group).await?;
        }
        tracing::debug!(
            generated = report.update.generated(),
            deleted = report.update.deleted(),
            failed = report.update.failed(),
            "apply finished"
        );
        Ok(report)
    }

    /// Decrement `group`; the job reaching zero removes documents of the
    /// group's specs that were not regenerated since the group was created
    async fn complete_group(&self, store: &StoreServices, group: &str) -> StrataResult<usize> {
        let remaining = self.services.documents.decrement_job_group(group, 1).await?;
        if remaining > 0 {
            tracing::trace!(group, remaining, "job group still running");
            return Ok(0);
        }
        if remaining < 0 {
            tracing::warn!(group, remaining, "job group decremented past zero");
            return Ok(0);
        }
        self.finish_group(store, group).await
    }

    async fn finish_group(&self, store: &StoreServices, id: &str) -> StrataResult<usize> {
        let documents = &self.services.documents;
        let Some(group) = documents.get_job_group(id).await? else {
            return Err(strata_store::StoreError::UnknownJobGroup(id.to_string()).into());
        };
        let removed = if group.incomplete {
            tracing::warn!(group = %group.id, "job group fan-out was cut short, stale documents kept");
            0
        } else {
            self.cleanup(store, &group).await?
        };
        documents.delete_job_group(id).await?;
        Ok(removed)
    }

    /// Account for chunks that were never enqueued
    async fn abandon_chunks(&self, store: &StoreServices, id: &str, unsent: i64) -> StrataResult<()> {
        let documents = &self.services.documents;
        documents.mark_job_group_incomplete(id).await?;
        if documents.decrement_job_group(id, unsent).await? == 0 {
            self.finish_group(store, id).await?;
        }
        Ok(())
    }

    async fn cleanup(&self, store: &StoreServices, group: &JobGroup) -> StrataResult<usize> {
        let mut removed = 0;
        for spec in &group.spec_ids {
            let registered = store.registry.require(spec)?;
            removed += store
                .composites
                .get(registered.kind)
                .remove_stale(spec, group.created_at)
                .await?;
        }
        tracing::info!(group = %group.id, removed, "job group complete, stale documents removed");
        Ok(removed)
    }

    async fn generate(
        &self,
        store: &StoreServices,
        spec: &str,
        context: &str,
        queue: Option<&str>,
    ) -> StrataResult<JobReport> {
        let registered = store.registry.require(spec)?;
        let composite = store.composites.get(registered.kind);
        let subjects = composite.backfill_subjects(spec, context).await?;
        let count = subjects.len();

        let batch = self.services.queue.config().batch_size.max(1);
        let chunks: Vec<Vec<ImpactedSubject>> = subjects.chunks(batch).map(<[_]>::to_vec).collect();
        let group = JobGroup::new(
            format!("group_{}", ulid::Ulid::new()),
            i64::try_from(chunks.len()).unwrap_or(i64::MAX),
            vec![spec.to_string()],
            store.name.clone(),
            Utc::now(),
        );
        self.services.documents.create_job_group(group.clone()).await?;

        let mut report = JobReport {
            subjects: count,
            ..JobReport::default()
        };
        if chunks.is_empty() {
            // nothing to regenerate, so every existing document is stale
            report.cleaned = self.finish_group(store, &group.id).await?;
            return Ok(report);
        }
        let total = chunks.len();
        for (sent, chunk) in chunks.into_iter().enumerate() {
            match self
                .services
                .queue
                .create_job(&store.name, &store.registry, chunk, queue, Some(&group.id))
                .await
            {
                Ok(tokens) => report.enqueued.extend(tokens),
                Err(e) => {
                    let unsent = i64::try_from(total - sent).unwrap_or(i64::MAX);
                    if let Err(group_err) = self.abandon_chunks(store, &group.id, unsent).await {
                        tracing::error!(group = %group.id, error = %group_err, "failed to settle job group");
                    }
                    return Err(e);
                }
            }
        }
        tracing::info!(spec, subjects = count, group = %group.id, "backfill fanned out");
        Ok(report)
    }

    async fn refresh(&self, store: &StoreServices, spec: &str, queue: Option<&str>) -> StrataResult<JobReport> {
        let registered = store.registry.require(spec)?;
        let subjects = store.composites.get(registered.kind).stale_subjects(spec).await?;
        let count = subjects.len();
        let enqueued = if subjects.is_empty() {
            Vec::new()
        } else {
            self.services
                .queue
                .create_job(&store.name, &store.registry, subjects, queue, None)
                .await?
        };
        tracing::info!(spec, stale = count, "stale documents queued");
        Ok(JobReport {
            subjects: count,
            enqueued,
            ..JobReport::default()
        })
    }
}
