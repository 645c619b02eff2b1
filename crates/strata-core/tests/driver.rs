use pretty_assertions::assert_eq;
use strata_core::StrataError;
use strata_graph::MemoryGraph;
use strata_spec::AsyncOperations;
use strata_store::{SearchQuery, TransactionLog, TransactionStatus};
use strata_test_utils::{book_graph, sample_config, TestDriver, AUTHOR1, CTX, DOC1, STORE};

fn query(text: &str) -> SearchQuery {
    SearchQuery {
        query: text.to_string(),
        spec: "i_search_book".to_string(),
        indices: vec!["search_terms".to_string()],
        fields: vec!["result.title".to_string()],
        limit: 10,
        offset: 0,
    }
}

#[tokio::test]
async fn empty_saves_do_nothing() {
    let t = TestDriver::sample().await;
    let book = book_graph("Unchanged");
    let outcome = t.save(&book, &book).await.unwrap();
    assert!(outcome.is_noop());
    assert!(outcome.changes.is_empty());
    assert!(t.transport.is_empty());
}

#[tokio::test]
async fn save_reports_changed_predicates() {
    let t = TestDriver::synchronous().await;
    let outcome = t.save(&MemoryGraph::new(), &book_graph("The Physics of Sound")).await.unwrap();
    assert_eq!(
        outcome.changes[DOC1],
        vec!["dct:creator".to_string(), "dct:title".to_string(), "rdf:type".to_string()]
    );
    assert_eq!(outcome.changes[AUTHOR1].len(), 2);
}

#[tokio::test]
async fn views_are_generated_on_read() {
    let config = sample_config().with_async_operations(AsyncOperations {
        views: true,
        tables: true,
        search: true,
    });
    let t = TestDriver::new(config).await;
    t.save(&MemoryGraph::new(), &book_graph("The Physics of Sound")).await.unwrap();
    assert_eq!(t.store.composite_count("views"), 0);

    let view = t
        .driver
        .get_view(STORE, DOC1, None, "v_resource_full")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.id.context, CTX);
    assert_eq!(view.value["_graphs"].as_array().unwrap().len(), 2);
    assert_eq!(t.store.composite_count("views"), 1);

    let missing = t
        .driver
        .get_view(STORE, "http://example.com/nothing", None, "v_resource_full")
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn reads_check_the_spec_kind() {
    let t = TestDriver::synchronous().await;
    let err = t.driver.get_view(STORE, DOC1, None, "t_resource").await.unwrap_err();
    assert!(err.is_configuration());
    let err = t.driver.get_table_rows(STORE, "v_resource_full", 0, None).await.unwrap_err();
    assert!(err.is_configuration());
    let err = t.driver.get_table_rows("nowhere", "t_resource", 0, None).await.unwrap_err();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn table_rows_page_by_resource() {
    let t = TestDriver::synchronous().await;
    t.save(&MemoryGraph::new(), &book_graph("The Physics of Sound")).await.unwrap();
    let rows = t.driver.get_table_rows(STORE, "t_authors", 0, Some(10)).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value["title"], "The Physics of Sound");
    assert_eq!(rows[0].value["author"], "Ada Lovelace");
    assert!(t.driver.get_table_rows(STORE, "t_authors", 1, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn search_finds_indexed_terms() {
    let t = TestDriver::synchronous().await;
    t.save(&MemoryGraph::new(), &book_graph("The Physics of Sound")).await.unwrap();

    let results = t.driver.search(STORE, &query("physics")).await.unwrap();
    assert_eq!(results.head.count, 1);
    assert_eq!(results.results[0]["result"]["title"], "The Physics of Sound");

    let results = t.driver.search(STORE, &query("chemistry")).await.unwrap();
    assert_eq!(results.head.count, 0);
}

#[tokio::test]
async fn invalid_search_input_is_rejected() {
    let t = TestDriver::synchronous().await;
    let mut q = query("physics");
    q.limit = -1;
    let err = t.driver.search(STORE, &q).await.unwrap_err();
    assert!(matches!(err, StrataError::SearchQuery(_)));
    assert!(!err.is_retryable());

    let mut q = query("physics");
    q.spec = "t_resource".to_string();
    assert!(t.driver.search(STORE, &q).await.unwrap_err().is_configuration());
}

#[tokio::test]
async fn inline_failures_keep_the_commit_and_the_deferred_job() {
    let operations = AsyncOperations {
        views: false,
        tables: true,
        search: false,
    };
    let t = TestDriver::new(sample_config().with_async_operations(operations)).await;
    t.provider.fail_next_writes(1);

    let outcome = t.save(&MemoryGraph::new(), &book_graph("The Physics of Sound")).await.unwrap();
    let transaction_id = outcome.transaction_id.clone().unwrap();
    let record = t.store.get_transaction(&transaction_id).await.unwrap().unwrap();
    assert_eq!(record.status, TransactionStatus::Committed);
    assert_eq!(t.store.composite_count("views"), 1);
    assert!(t.provider.is_empty());
    assert_eq!(t.transport.len(), 1);

    t.run_pending().await;
    assert_eq!(t.store.composite_count("table_rows"), 3);
}
