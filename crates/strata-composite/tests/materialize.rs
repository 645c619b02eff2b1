//! Regeneration, deletion and maintenance of derived documents

mod common;

use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use strata_composite::{CompositeSpecification, ImpactedSubject, Outcome};
use strata_spec::CompositeKind;
use strata_store::{SearchQuery, SearchProvider};

fn subject(kind: CompositeKind, r: &str, specs: &[&str]) -> ImpactedSubject {
    ImpactedSubject::new(
        rid(r),
        kind,
        STORE,
        POD,
        specs.iter().map(|s| (*s).to_string()).collect(),
    )
}

/// Regenerating from unchanged base data yields the same document
#[tokio::test]
async fn regeneration_is_idempotent() {
    let f = Fixture::new();
    f.put(book()).await;
    f.put(author()).await;
    let tables = &f.composites.tables;
    let id = rid("http://example.com/doc1").composite("t_authors");

    tables.regenerate(&id.resource_id(), "t_authors").await.unwrap();
    let first = tables.fetch(&id).await.unwrap().unwrap();
    tables.regenerate(&id.resource_id(), "t_authors").await.unwrap();
    let second = tables.fetch(&id).await.unwrap().unwrap();

    assert_eq!(first.value, second.value);
    assert_eq!(first.impact_index, second.impact_index);
    assert_eq!(first.revision, second.revision);
    assert_eq!(
        serde_json::Value::Object(second.value),
        json!({"title": "The Physics of Sound", "author": "Ada Lovelace"})
    );
}

#[tokio::test]
async fn rows_carry_the_spec_revision() {
    let f = Fixture::new();
    f.put(book()).await;
    f.put(doc("http://example.com/pub1", &[("foaf:name", "Acme")])).await;
    f.put(doc(
        "http://example.com/doc1",
        &[("rdf:type", "bibo:Book"), ("dct:publisher", "http://example.com/pub1")],
    ))
    .await;

    let outcome = f
        .composites
        .tables
        .regenerate(&rid("http://example.com/doc1"), "t_publisher")
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Generated(_)));
    let row = f
        .composites
        .tables
        .fetch(&rid("http://example.com/doc1").composite("t_publisher"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.revision, 2);
    assert_eq!(row.value["publisher"], "Acme");
}

/// A failing spec does not stop its siblings
#[tokio::test]
async fn materialization_failures_are_isolated() {
    let f = Fixture::new();
    f.put(doc(
        "http://example.com/doc1",
        &[("rdf:type", "bibo:Book"), ("dct:publisher", "http://example.com/missing")],
    ))
    .await;

    let report = f
        .composites
        .tables
        .update(&subject(CompositeKind::Table, "http://example.com/doc1", &["t_publisher", "t_resource"]))
        .await
        .unwrap();
    assert_eq!(report.failed(), 1);
    assert_eq!(report.generated(), 1);
    assert_eq!(f.store.composite_count("table_rows"), 1);
}

#[tokio::test]
async fn unknown_spec_is_a_configuration_error() {
    let f = Fixture::new();
    let err = f
        .composites
        .tables
        .update(&subject(CompositeKind::Table, "http://example.com/doc1", &["t_nope"]))
        .await
        .unwrap_err();
    assert!(!err.is_materialization());
}

/// Removing every triple of a subject removes documents that depended on it
#[tokio::test]
async fn deleted_resource_loses_its_documents() {
    let f = Fixture::new();
    f.put(book()).await;
    let tables = &f.composites.tables;
    let all = subject(CompositeKind::Table, "http://example.com/doc1", &[]);
    let report = tables.update(&all).await.unwrap();
    assert_eq!(report.generated(), 3);

    let mut emptied = book();
    emptied.properties.clear();
    f.put(emptied).await;
    let report = tables.update(&all).await.unwrap();
    assert_eq!(report.deleted(), 3);
    assert_eq!(f.store.composite_count("table_rows"), 0);
}

#[tokio::test]
async fn inapplicable_types_are_skipped() {
    let f = Fixture::new();
    f.put(doc("http://example.com/p1", &[("rdf:type", "foaf:Person")])).await;
    let outcome = f
        .composites
        .tables
        .regenerate(&rid("http://example.com/p1"), "t_resource")
        .await
        .unwrap();
    assert!(matches!(outcome, Outcome::Skipped(_)));
}

#[tokio::test]
async fn views_include_joined_graphs() {
    let f = Fixture::new();
    f.put(book()).await;
    f.put(author()).await;
    let views = &f.composites.views;
    views
        .update(&subject(CompositeKind::View, "http://example.com/doc1", &[]))
        .await
        .unwrap();

    let view = views
        .fetch(&rid("http://example.com/doc1").composite("v_resource_full"))
        .await
        .unwrap()
        .unwrap();
    let graphs = view.value["_graphs"].as_array().unwrap();
    assert_eq!(graphs.len(), 2);
    assert_eq!(graphs[1]["foaf:name"], json!([{"v": "Ada Lovelace", "l": true}]));
    assert!(view.depends_on(&rid("http://example.com/author1")));
}

/// A resource owning several search document types keeps the ones it still
/// matches and loses the rest
#[tokio::test]
async fn search_documents_follow_type_changes() {
    let f = Fixture::new();
    f.put(doc(
        "http://example.com/doc1",
        &[("rdf:type", "bibo:Book"), ("rdf:type", "bibo:Chapter"), ("dct:title", "Physics of Sound")],
    ))
    .await;
    let search = &f.composites.search;
    let report = search
        .update(&subject(CompositeKind::Search, "http://example.com/doc1", &[]))
        .await
        .unwrap();
    assert_eq!(report.generated(), 2);
    assert_eq!(f.provider.len(), 2);

    f.put(doc(
        "http://example.com/doc1",
        &[("rdf:type", "bibo:Book"), ("dct:title", "Physics of Light")],
    ))
    .await;
    let report = search
        .update(&subject(CompositeKind::Search, "http://example.com/doc1", &["i_search_book"]))
        .await
        .unwrap();
    assert_eq!(report.generated(), 1);
    assert_eq!(report.deleted(), 1);
    assert_eq!(f.provider.len(), 1);

    let results = f
        .provider
        .search(&SearchQuery {
            query: "light".to_string(),
            spec: "i_search_book".to_string(),
            indices: vec!["search_terms".to_string()],
            fields: vec!["result.title".to_string()],
            limit: 10,
            offset: 0,
        })
        .await
        .unwrap();
    assert_eq!(results.head.count, 1);
    assert_eq!(results.results[0]["result"]["title"], "Physics of Light");
}

#[tokio::test]
async fn backfill_and_revision_maintenance() {
    let f = Fixture::new();
    for n in 0..3 {
        f.put(doc(&format!("http://example.com/b{n}"), &[("rdf:type", "bibo:Book")])).await;
    }
    f.put(author()).await;
    let tables = &f.composites.tables;

    let subjects = tables.backfill_subjects("t_resource", CTX).await.unwrap();
    assert_eq!(subjects.len(), 3);
    for s in &subjects {
        tables.update(s).await.unwrap();
    }
    assert!(tables.stale_subjects("t_resource").await.unwrap().is_empty());
    assert_eq!(tables.rows("t_resource", 1, Some(1)).await.unwrap().len(), 1);

    let mut old = tables
        .fetch(&rid("http://example.com/b0").composite("t_resource"))
        .await
        .unwrap()
        .unwrap();
    old.revision = 7;
    tables.save(old).await.unwrap();
    let stale = tables.stale_subjects("t_resource").await.unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].resource_id, rid("http://example.com/b0"));

    assert!(tables.backfill_subjects("v_resource_full", CTX).await.is_err());
}
