//! Regeneration shared by every composite kind

use crate::composite::{CompositeSpecification, Outcome, UpdateReport};
use crate::error::CompositeResult;
use crate::extract::{impact_index, is_applicable, JoinedResources};
use crate::subject::ImpactedSubject;
use chrono::Utc;
use std::collections::BTreeSet;
use std::time::Instant;
use strata_graph::ResourceId;
use strata_spec::{RegisteredSpec, SpecError};
use strata_store::CompositeDocument;

fn require_kind<C: CompositeSpecification + ?Sized>(
    composite: &C,
    spec: &RegisteredSpec,
) -> CompositeResult<()> {
    if spec.kind == composite.kind() {
        Ok(())
    } else {
        Err(SpecError::invalid(
            spec.id(),
            format!("is a {} specification, not a {}", spec.kind, composite.kind()),
        )
        .into())
    }
}

pub(crate) async fn regenerate<C: CompositeSpecification + ?Sized>(
    composite: &C,
    resource: &ResourceId,
    spec: &RegisteredSpec,
) -> CompositeResult<Outcome> {
    require_kind(composite, spec)?;
    let started = Instant::now();
    let kind = composite.kind().as_str();
    let id = resource.composite(spec.id());
    let documents = &composite.sources().documents;

    let root = documents
        .find(&spec.spec.from, resource)
        .await?
        .filter(|d| is_applicable(&spec.spec, d));
    let Some(root) = root else {
        if composite.remove(&id).await? {
            metrics::counter!("strata.composite.deleted", "kind" => kind).increment(1);
            tracing::debug!(spec = %spec.id(), %resource, "no longer applicable, removed");
            return Ok(Outcome::Deleted(id));
        }
        return Ok(Outcome::Skipped(id));
    };

    let joined = JoinedResources::load(documents.as_ref(), &spec.spec.from, &root, &spec.spec.joins).await?;
    let value = composite.shape(&spec.spec, &root, &joined)?;
    composite
        .save(CompositeDocument {
            id: id.clone(),
            value,
            impact_index: impact_index(&root, &joined),
            revision: spec.spec.revision,
            generated_at: Utc::now(),
        })
        .await?;

    metrics::counter!("strata.composite.generated", "kind" => kind).increment(1);
    metrics::histogram!("strata.composite.generate_ms", "kind" => kind)
        .record(started.elapsed().as_secs_f64() * 1000.0);
    tracing::trace!(spec = %spec.id(), %resource, "generated");
    Ok(Outcome::Generated(id))
}

pub(crate) async fn update<C: CompositeSpecification + ?Sized>(
    composite: &C,
    subject: &ImpactedSubject,
) -> CompositeResult<UpdateReport> {
    let registry = &composite.sources().registry;
    let resource = &subject.resource_id;
    let requested: Vec<&RegisteredSpec> = if subject.spec_types.is_empty() {
        registry.of_kind(composite.kind()).collect()
    } else {
        subject
            .spec_types
            .iter()
            .map(|id| registry.require(id))
            .collect::<Result<_, _>>()?
    };

    let mut report = UpdateReport::default();
    for spec in &requested {
        match regenerate(composite, resource, spec).await {
            Ok(outcome) => report.outcomes.push(outcome),
            Err(e) if e.is_materialization() => {
                metrics::counter!("strata.composite.failed", "kind" => composite.kind().as_str()).increment(1);
                tracing::error!(spec = %spec.id(), %resource, error = %e, "materialization failed");
                report.outcomes.push(Outcome::Failed {
                    id: resource.composite(spec.id()),
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }

    // documents of other specs this resource no longer qualifies for
    let requested: BTreeSet<&str> = requested.iter().map(|s| s.id()).collect();
    for existing in composite.for_resource(resource).await? {
        if requested.contains(existing.id.spec.as_str()) {
            continue;
        }
        let Some(spec) = registry.get(&existing.id.spec) else {
            continue;
        };
        let still_applies = composite
            .sources()
            .documents
            .find(&spec.spec.from, resource)
            .await?
            .is_some_and(|d| is_applicable(&spec.spec, &d));
        if !still_applies && composite.remove(&existing.id).await? {
            metrics::counter!("strata.composite.deleted", "kind" => composite.kind().as_str()).increment(1);
            report.outcomes.push(Outcome::Deleted(existing.id));
        }
    }
    Ok(report)
}

pub(crate) async fn backfill_subjects<C: CompositeSpecification + ?Sized>(
    composite: &C,
    spec: &str,
    context: &str,
) -> CompositeResult<Vec<ImpactedSubject>> {
    let sources = composite.sources();
    let spec = sources.registry.require(spec)?;
    require_kind(composite, spec)?;
    let docs = sources
        .documents
        .find_by_type(&spec.spec.from, context, &spec.spec.rdf_types)
        .await?;
    Ok(docs
        .into_iter()
        .map(|d| {
            ImpactedSubject::new(
                d.id,
                composite.kind(),
                sources.store.clone(),
                spec.spec.from.clone(),
                vec![spec.id().to_string()],
            )
        })
        .collect())
}

pub(crate) async fn stale_subjects<C: CompositeSpecification + ?Sized>(
    composite: &C,
    spec: &str,
) -> CompositeResult<Vec<ImpactedSubject>> {
    let sources = composite.sources();
    let registered = sources.registry.require(spec)?;
    require_kind(composite, registered)?;
    let current = registered.spec.revision;
    Ok(composite
        .for_spec(spec)
        .await?
        .into_iter()
        .filter(|d| d.revision != current)
        .map(|d| {
            ImpactedSubject::new(
                d.id.resource_id(),
                composite.kind(),
                sources.store.clone(),
                registered.spec.from.clone(),
                vec![spec.to_string()],
            )
        })
        .collect())
}

