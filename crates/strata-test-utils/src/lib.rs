//! Testing utilities for the Strata workspace
//!
//! Shared fixtures: a sample configuration, graph builders and a driver
//! wired to the in-memory store, search provider and transport.

#![allow(missing_docs)]

use serde_json::json;
use std::sync::Arc;
use strata_core::{Driver, JobReport, StrataResult};
use strata_graph::{MemoryGraph, Object, ResourceId};
use strata_spec::{AsyncOperations, Config, QueueConfig, TransactionConfig};
use strata_store::{EnqueuedJob, MemorySearchProvider, MemoryStore, MemoryTransport};

pub const CTX: &str = "http://talisaspire.com/";
pub const POD: &str = "CBD_testing";
pub const STORE: &str = "tripod_php_testing";
pub const SLOW_QUEUE: &str = "strata::slow";

pub const DOC1: &str = "http://example.com/doc1";
pub const AUTHOR1: &str = "http://example.com/author1";

/// Sample configuration with fast retries
pub fn sample_config() -> Config {
    let text = json!({
        "default_context": CTX,
        "stores": {STORE: {
            "pods": [POD],
            "view_specifications": [{
                "_id": "v_resource_full", "type": "bibo:Book", "from": POD,
                "joins": {"dct:creator": {"include": ["foaf:name"]}}
            }],
            "table_specifications": [
                {
                    "_id": "t_resource", "type": "bibo:Book", "from": POD,
                    "fields": [{"fieldName": "type", "predicates": ["rdf:type"]}]
                },
                {
                    "_id": "t_authors", "type": "bibo:Book", "from": POD,
                    "fields": [{"fieldName": "title", "predicates": ["dct:title"]}],
                    "joins": {"dct:creator": {"fields": [{"fieldName": "author", "predicates": ["foaf:name"]}]}}
                },
                {
                    "_id": "t_titles_slow", "type": "bibo:Book", "from": POD, "queue": SLOW_QUEUE,
                    "fields": [{"fieldName": "title", "predicates": ["dct:title"]}],
                    "computed_fields": [
                        {"fieldName": "shout", "value": {"replace": {"search": " ", "replace": "_", "subject": "$title"}}}
                    ]
                }
            ],
            "search_specifications": [{
                "_id": "i_search_book", "type": "bibo:Book", "from": POD,
                "indices": [{"fieldName": "search_terms", "predicates": ["dct:title"]}],
                "fields": [{"fieldName": "title", "predicates": ["dct:title"]}]
            }]
        }}
    })
    .to_string();
    let config = Config::from_json_str(&text).unwrap();
    config
        .with_transaction(TransactionConfig {
            lock_attempts: 3,
            lock_backoff_ms: 1,
            ..TransactionConfig::default()
        })
        .with_queue(QueueConfig {
            enqueue_backoff_ms: 1,
            batch_size: 2,
            ..QueueConfig::default()
        })
}

pub fn rid(resource: &str) -> ResourceId {
    ResourceId::new(resource, CTX)
}

fn object(value: &str) -> Object {
    if value.starts_with("http://") || (value.contains(':') && !value.contains(' ')) {
        Object::uri(value)
    } else {
        Object::literal(value)
    }
}

/// Build a graph from `(subject, predicate, object)`; prefixed names and
/// `http://` values become URIs, everything else a literal
pub fn graph(triples: &[(&str, &str, &str)]) -> MemoryGraph {
    let mut g = MemoryGraph::new();
    for (s, p, o) in triples {
        g.add_triple(*s, *p, object(o)).unwrap();
    }
    g
}

pub fn book_graph(title: &str) -> MemoryGraph {
    graph(&[
        (DOC1, "rdf:type", "bibo:Book"),
        (DOC1, "dct:title", title),
        (DOC1, "dct:creator", AUTHOR1),
        (AUTHOR1, "rdf:type", "foaf:Person"),
        (AUTHOR1, "foaf:name", "Ada Lovelace"),
    ])
}

/// A driver over in-memory backends
pub struct TestDriver {
    pub driver: Driver,
    pub store: Arc<MemoryStore>,
    pub provider: Arc<MemorySearchProvider>,
    pub transport: Arc<MemoryTransport>,
}

impl TestDriver {
    pub async fn new(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MemorySearchProvider::new());
        let transport = Arc::new(MemoryTransport::new());
        let driver = Driver::new(config, store.clone(), provider.clone(), transport.clone())
            .await
            .unwrap();
        Self {
            driver,
            store,
            provider,
            transport,
        }
    }

    pub async fn sample() -> Self {
        Self::new(sample_config()).await
    }

    /// Every composite kind materialized inline
    pub async fn synchronous() -> Self {
        Self::new(sample_config().with_async_operations(AsyncOperations::all_sync())).await
    }

    pub async fn save(&self, old: &MemoryGraph, new: &MemoryGraph) -> StrataResult<strata_core::SaveOutcome> {
        self.driver.save_changes(STORE, POD, old, new, None, None).await
    }

    pub async fn run_job(&self, job: &EnqueuedJob) -> StrataResult<JobReport> {
        self.driver.runner().perform_payload(job.payload.clone()).await
    }

    /// Run queued jobs, and the jobs they enqueue, until the transport is empty
    pub async fn run_pending(&self) -> Vec<JobReport> {
        let mut reports = Vec::new();
        loop {
            let jobs = self.transport.drain();
            if jobs.is_empty() {
                return reports;
            }
            for job in jobs {
                reports.push(self.run_job(&job).await.unwrap());
            }
        }
    }
}
