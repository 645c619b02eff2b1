#![allow(dead_code)]

use serde_json::json;
use std::sync::Arc;
use strata_composite::{Composites, Sources};
use strata_graph::{Object, ResourceId};
use strata_spec::Config;
use strata_store::{BaseDocument, BaseDocuments, MemorySearchProvider, MemoryStore};

pub const CTX: &str = "http://talisaspire.com/";
pub const POD: &str = "CBD_testing";
pub const STORE: &str = "tripod_php_testing";

pub fn config() -> Config {
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
                    "_id": "t_publisher", "type": "bibo:Book", "from": POD, "revision": 2,
                    "joins": {"dct:publisher": {"required": true,
                        "fields": [{"fieldName": "publisher", "predicates": ["foaf:name"]}]}}
                }
            ],
            "search_specifications": [
                {
                    "_id": "i_search_book", "type": "bibo:Book", "from": POD,
                    "indices": [{"fieldName": "search_terms", "predicates": ["dct:title"]}],
                    "fields": [{"fieldName": "title", "predicates": ["dct:title"]}]
                },
                {
                    "_id": "i_search_chapter", "type": "bibo:Chapter", "from": POD,
                    "indices": [{"fieldName": "search_terms", "predicates": ["dct:title"]}],
                    "fields": [{"fieldName": "title", "predicates": ["dct:title"]}]
                }
            ]
        }}
    })
    .to_string();
    Config::from_json_str(&text).unwrap()
}

pub fn rid(r: &str) -> ResourceId {
    ResourceId::new(r, CTX)
}

pub fn doc(r: &str, props: &[(&str, &str)]) -> BaseDocument {
    let mut d = BaseDocument::new(rid(r));
    for (p, v) in props {
        let o = if v.starts_with("http://") || (v.contains(':') && !v.contains(' ')) {
            Object::uri(*v)
        } else {
            Object::literal(*v)
        };
        d.properties.entry((*p).to_string()).or_default().insert(o);
    }
    d.touch(chrono::Utc::now());
    d
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub provider: Arc<MemorySearchProvider>,
    pub composites: Composites,
}

impl Fixture {
    pub fn new() -> Self {
        let registries = config().registries().unwrap();
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(MemorySearchProvider::new());
        let sources = Sources::new(STORE, registries[STORE].clone(), store.clone());
        let composites = Composites::new(&sources, provider.clone());
        Self {
            store,
            provider,
            composites,
        }
    }

    pub async fn put(&self, d: BaseDocument) {
        self.store.seed(POD, d);
    }

    pub async fn delete(&self, r: &str) {
        self.store.evict(POD, &rid(r));
    }
}

pub fn book() -> BaseDocument {
    doc(
        "http://example.com/doc1",
        &[
            ("rdf:type", "bibo:Book"),
            ("dct:title", "The Physics of Sound"),
            ("dct:creator", "http://example.com/author1"),
        ],
    )
}

pub fn author() -> BaseDocument {
    doc("http://example.com/author1", &[("rdf:type", "foaf:Person"), ("foaf:name", "Ada Lovelace")])
}
