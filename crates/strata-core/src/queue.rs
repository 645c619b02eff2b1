//! Submission of jobs to the transport
//!
//! Apply jobs are grouped per destination queue: a spec's own `queue`
//! wins over the queue named by the caller, which wins over the configured
//! default. Each submission is retried with a linearly growing pause and,
//! when configured, confirmed with a status call.

use crate::error::{StrataError, StrataResult};
use crate::jobs::Job;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use strata_composite::{merge_subjects, ImpactedSubject};
use strata_spec::{QueueConfig, SpecRegistry};
use strata_store::{JobToken, JobTransport};

/// Submits jobs with bounded retries
#[derive(Clone)]
pub struct OperationQueue {
    transport: Arc<dyn JobTransport>,
    config: QueueConfig,
}

impl std::fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationQueue")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl OperationQueue {
    /// Create a queue over `transport`
    #[must_use]
    pub fn new(transport: Arc<dyn JobTransport>, config: QueueConfig) -> Self {
        Self { transport, config }
    }

    /// Queue settings in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Enqueue one job
    ///
    /// # Errors
    /// [`StrataError::Queuing`] naming the last transport error once every
    /// attempt failed
    #[tracing::instrument(skip(self, job), fields(job = job.name()))]
    pub async fn submit(&self, queue: &str, job: &Job) -> StrataResult<JobToken> {
        let payload = job.to_payload()?;
        let attempts = self.config.enqueue_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.attempt(queue, payload.clone()).await {
                Ok(token) => {
                    metrics::counter!("strata.queue.enqueued", "queue" => queue.to_string()).increment(1);
                    tracing::debug!(token = %token.0, attempt, "job enqueued");
                    return Ok(token);
                }
                Err(e) => {
                    metrics::counter!("strata.queue.retry", "queue" => queue.to_string()).increment(1);
                    tracing::warn!(attempt, error = %e, "enqueue failed");
                    last_error = e;
                    if attempt < attempts {
                        let pause = Duration::from_millis(self.config.enqueue_backoff_ms) * attempt;
                        tokio::time::sleep(pause).await;
                    }
                }
            }
        }

        tracing::error!(attempts, %last_error, "giving up on enqueue");
        Err(StrataError::Queuing {
            queue: queue.to_string(),
            attempts,
            last_error,
        })
    }

    async fn attempt(&self, queue: &str, payload: serde_json::Value) -> Result<JobToken, String> {
        let token = self
            .transport
            .enqueue(queue, payload)
            .await
            .map_err(|e| e.to_string())?;
        if !self.config.verify_status {
            return Ok(token);
        }
        match self.transport.status(&token).await {
            Ok(true) => Ok(token),
            Ok(false) => Err(format!("job {} not found after enqueue", token.0)),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Split subjects by destination queue
    ///
    /// A subject naming specs routed to different queues is split so each
    /// queue only receives the specs routed to it.
    #[must_use]
    pub fn route(
        &self,
        registry: &SpecRegistry,
        subjects: Vec<ImpactedSubject>,
        queue: Option<&str>,
    ) -> BTreeMap<String, Vec<ImpactedSubject>> {
        let fallback = queue.unwrap_or(self.config.apply_queue.as_str());
        let mut routed: BTreeMap<String, Vec<ImpactedSubject>> = BTreeMap::new();

        for subject in subjects {
            if subject.spec_types.is_empty() {
                routed.entry(fallback.to_string()).or_default().push(subject);
                continue;
            }
            let mut per_queue: BTreeMap<&str, Vec<String>> = BTreeMap::new();
            for spec in &subject.spec_types {
                let target = registry
                    .get(spec)
                    .and_then(|s| s.spec.queue.as_deref())
                    .unwrap_or(fallback);
                per_queue.entry(target).or_default().push(spec.clone());
            }
            for (target, specs) in per_queue {
                routed.entry(target.to_string()).or_default().push(ImpactedSubject {
                    spec_types: specs,
                    ..subject.clone()
                });
            }
        }

        routed
            .into_iter()
            .map(|(q, subjects)| (q, merge_subjects(subjects)))
            .collect()
    }

    /// Enqueue one apply job per destination queue
    ///
    /// # Errors
    /// [`StrataError::Queuing`] for the first queue that could not be reached
    pub async fn create_job(
        &self,
        store: &str,
        registry: &SpecRegistry,
        subjects: Vec<ImpactedSubject>,
        queue: Option<&str>,
        group: Option<&str>,
    ) -> StrataResult<Vec<JobToken>> {
        let mut tokens = Vec::new();
        for (target, subjects) in self.route(registry, subjects, queue) {
            let job = Job::ApplyOperation {
                store: store.to_string(),
                subjects,
                group: group.map(str::to_string),
            };
            tokens.push(self.submit(&target, &job).await?);
        }
        Ok(tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_store::MemoryTransport;

    fn queue(transport: Arc<MemoryTransport>) -> OperationQueue {
        let config = QueueConfig {
            enqueue_backoff_ms: 0,
            ..QueueConfig::default()
        };
        OperationQueue::new(transport, config)
    }

    fn job() -> Job {
        Job::RefreshStale {
            store: "tripod_php_testing".to_string(),
            spec: "t_resource".to_string(),
            queue: None,
        }
    }

    #[tokio::test]
    async fn retries_until_the_transport_accepts() {
        let transport = Arc::new(MemoryTransport::new());
        transport.fail_next_enqueues(4);
        let token = queue(transport.clone()).submit("strata::apply", &job()).await.unwrap();
        assert!(!token.0.is_empty());
        assert_eq!(transport.len(), 1);
    }

    #[tokio::test]
    async fn exhausting_retries_names_the_last_error() {
        let transport = Arc::new(MemoryTransport::new());
        transport.fail_next_enqueues(5);
        let err = queue(transport.clone()).submit("strata::apply", &job()).await.unwrap_err();
        match &err {
            StrataError::Queuing { queue, attempts, last_error } => {
                assert_eq!(queue, "strata::apply");
                assert_eq!(*attempts, 5);
                assert!(!last_error.is_empty());
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(transport.is_empty());
    }

    #[tokio::test]
    async fn failed_status_check_counts_as_a_retry() {
        let transport = Arc::new(MemoryTransport::new());
        transport.report_missing(true);
        let err = queue(transport).submit("strata::apply", &job()).await.unwrap_err();
        assert!(err.to_string().contains("not found after enqueue"));
    }

    fn registry() -> SpecRegistry {
        let table = |id: &str, queue: Option<&str>| -> strata_spec::Specification {
            let mut spec = serde_json::json!({
                "_id": id, "type": "bibo:Book", "from": "CBD_testing",
                "fields": [{"fieldName": "type", "predicates": ["rdf:type"]}]
            });
            if let Some(q) = queue {
                spec["queue"] = serde_json::Value::from(q);
            }
            serde_json::from_value(spec).unwrap()
        };
        SpecRegistry::new(
            ["CBD_testing".to_string()],
            Vec::new(),
            vec![
                table("t_0", Some("q_a")),
                table("t_1", Some("q_a")),
                table("t_2", Some("q_b")),
                table("t_3", None),
            ],
            Vec::new(),
        )
        .unwrap()
    }

    fn target(spec: &str) -> &'static str {
        match spec {
            "t_0" | "t_1" => "q_a",
            "t_2" => "q_b",
            _ => "strata::apply",
        }
    }

    proptest::proptest! {
        #[test]
        fn routing_yields_one_entry_per_queue(
            picks in proptest::collection::vec((0usize..5, 0usize..4), 1..20)
        ) {
            let registry = registry();
            let subjects: Vec<ImpactedSubject> = picks
                .iter()
                .map(|(r, s)| ImpactedSubject::new(
                    strata_graph::ResourceId::new(format!("http://example.com/{r}"), "ctx"),
                    strata_spec::CompositeKind::Table,
                    "store",
                    "CBD_testing",
                    vec![format!("t_{s}")],
                ))
                .collect();
            let expected: std::collections::BTreeSet<&str> =
                picks.iter().map(|(_, s)| target(&format!("t_{s}"))).collect();

            let routed = queue(Arc::new(MemoryTransport::new())).route(&registry, subjects, None);
            let queues: std::collections::BTreeSet<&str> = routed.keys().map(String::as_str).collect();
            proptest::prop_assert_eq!(queues, expected);

            for (q, subjects) in &routed {
                let mut seen = std::collections::BTreeSet::new();
                for subject in subjects {
                    proptest::prop_assert!(seen.insert(subject.resource_id.clone()));
                    for spec in &subject.spec_types {
                        proptest::prop_assert_eq!(target(spec), q.as_str());
                    }
                }
            }
        }
    }
}
