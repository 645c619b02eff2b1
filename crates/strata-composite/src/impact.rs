//! Impact resolution
//!
//! Only specs reading the pod the changes were committed to are considered.
//! First-order impact: a changed resource whose current type matches a spec
//! that reads one of the changed predicates. Second-order impact: stored
//! documents whose impact index lists the changed resource, again only when
//! the spec reads a changed predicate. Both are merged per resource.

use crate::composite::CompositeSpecification;
use crate::error::CompositeResult;
use crate::subject::{merge_subjects, ImpactedSubject};
use strata_graph::{ChangedPredicates, ResourceId};

pub(crate) async fn resolve<C: CompositeSpecification + ?Sized>(
    composite: &C,
    pod: &str,
    changes: &ChangedPredicates,
    context: &str,
) -> CompositeResult<Vec<ImpactedSubject>> {
    let kind = composite.kind();
    let sources = composite.sources();
    let reads_pod = sources.registry.of_kind(kind).any(|s| s.spec.from == pod);
    if !reads_pod || changes.is_empty() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for (subject, predicates) in changes {
        let resource = ResourceId::new(subject.clone(), context);
        let touched = sources
            .registry
            .of_kind(kind)
            .any(|s| s.spec.from == pod && s.predicates.intersects(predicates));
        if !touched {
            continue;
        }
        let current = sources
            .documents
            .find(pod, &resource)
            .await?
            .map(|d| d.rdf_types())
            .unwrap_or_default();
        for spec in sources.registry.for_types(kind, current.as_slice()) {
            if spec.spec.from == pod && spec.predicates.intersects(predicates) {
                found.push(ImpactedSubject::new(
                    resource.clone(),
                    kind,
                    sources.store.clone(),
                    pod,
                    vec![spec.id().to_string()],
                ));
            }
        }
    }

    let changed: Vec<ResourceId> = changes
        .keys()
        .map(|s| ResourceId::new(s.clone(), context))
        .collect();
    for doc in composite.dependents(&changed).await? {
        let Some(spec) = sources.registry.get(&doc.id.spec) else {
            tracing::debug!(spec = %doc.id.spec, "dependent document of an unregistered spec");
            continue;
        };
        if spec.kind != kind || spec.spec.from != pod {
            continue;
        }
        let triggered = doc
            .impact_index
            .iter()
            .filter_map(|r| changes.get(&r.resource).filter(|_| r.context == context))
            .any(|predicates| spec.predicates.intersects(predicates));
        if triggered {
            found.push(ImpactedSubject::new(
                doc.id.resource_id(),
                kind,
                sources.store.clone(),
                pod,
                vec![spec.id().to_string()],
            ));
        }
    }

    let merged = merge_subjects(found);
    tracing::debug!(
        operation = %kind,
        pod,
        changed = changes.len(),
        impacted = merged.len(),
        "impact resolved"
    );
    Ok(merged)
}
