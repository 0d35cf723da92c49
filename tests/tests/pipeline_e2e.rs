//! End-to-end tests for the ingest → queue → enrichment → store pipeline.
//!
//! Backends are in-memory; the lookup service is a wiremock server, so no
//! Docker is required.

use axum_test::TestServer;
use integration_tests::{
    fixtures,
    mocks::FlakyStore,
    setup::{TestContext, DEFAULT_POSTCODE},
};
use pipeline_core::{RecordStatus, RecordStore, WorkItem, WorkQueue};
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};
use worker::WritePolicy;

/// Scenario A: one resolvable row and one out-of-range row
#[tokio::test]
async fn test_valid_and_invalid_coordinates() {
    let ctx = TestContext::new().await;
    ctx.datasets
        .put("uploads", "batch.csv", fixtures::scenario_a_csv());

    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");
    let response = server
        .post("/ingest")
        .json(&fixtures::storage_event(&[("uploads", "batch.csv")]))
        .await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["rows_enqueued"], 2);

    let consumer = ctx.consumer(WritePolicy::PendingOnly);
    let round = ctx.drain(&consumer, 5).await.unwrap();
    assert_eq!(round.acked, 2);
    assert!(ctx.queue.is_empty());

    let resolved = ctx.store.get("1").await.unwrap().unwrap();
    assert_eq!(resolved.status(), RecordStatus::Ok);
    assert_eq!(resolved.state.postcode(), Some(DEFAULT_POSTCODE));

    let failed = ctx.store.get("2").await.unwrap().unwrap();
    assert_eq!(failed.status(), RecordStatus::Error);
    let cause = failed.state.error().unwrap_or_default();
    assert!(cause.contains("400"), "unexpected error cause: {}", cause);
}

/// Scenario A read back through the API
#[tokio::test]
async fn test_record_view_after_enrichment() {
    let ctx = TestContext::new().await;
    ctx.datasets
        .put("uploads", "batch.csv", fixtures::scenario_a_csv());
    ctx.ingest
        .ingest_file(&pipeline_core::DatasetRef::new("uploads", "batch.csv"))
        .await
        .unwrap();
    ctx.drain(&ctx.consumer(WritePolicy::PendingOnly), 5)
        .await
        .unwrap();

    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let ok: serde_json::Value = server.get("/records/1").await.json();
    assert_eq!(ok["status"], "OK");
    assert_eq!(ok["postcode"], DEFAULT_POSTCODE);
    assert!(ok.get("error").is_none());

    let err: serde_json::Value = server.get("/records/2").await.json();
    assert_eq!(err["status"], "ERROR");
    assert!(err.get("postcode").is_none());
}

/// Scenario B: a work item for an unknown id completes without side effects
#[tokio::test]
async fn test_unknown_id_completes_without_change() {
    let ctx = TestContext::new().await;
    ctx.queue.enqueue(&WorkItem::single("ghost")).await.unwrap();

    let round = ctx
        .drain(&ctx.consumer(WritePolicy::PendingOnly), 3)
        .await
        .unwrap();

    assert_eq!(round.received, 1);
    assert_eq!(round.acked, 1);
    assert!(ctx.store.is_empty());
    assert!(ctx.queue.is_empty());

    let requests = ctx.lookup_server.received_requests().await.unwrap_or_default();
    assert!(requests.is_empty(), "lookup must not be called for unknown ids");
}

/// Each row yields exactly one record and one single-id work item
#[tokio::test]
async fn test_one_record_and_item_per_row() {
    let ctx = TestContext::new().await;
    ctx.datasets
        .put("uploads", "bulk.csv", fixtures::bulk_csv("row", 25));

    let summary = ctx
        .ingest
        .ingest_event(
            &serde_json::from_value(fixtures::storage_event(&[("uploads", "bulk.csv")])).unwrap(),
        )
        .await;

    assert_eq!(summary.rows_read(), 25);
    assert_eq!(summary.rows_enqueued(), 25);
    assert_eq!(ctx.store.len(), 25);

    let items = ctx.queue.pending_items();
    assert_eq!(items.len(), 25);
    assert!(items.iter().all(|item| item.len() == 1));
    assert!(ctx
        .store
        .snapshot()
        .iter()
        .all(|r| r.status() == RecordStatus::Pending));
}

/// A multi-id work item settles every id independently
#[tokio::test]
async fn test_multi_id_item() {
    let ctx = TestContext::new().await;
    ctx.datasets.put(
        "uploads",
        "batch.csv",
        fixtures::dataset_csv(&[("a", "51.5", "-0.1"), ("b", "200", "0"), ("c", "52.0", "0.1")]),
    );
    ctx.ingest
        .ingest_file(&pipeline_core::DatasetRef::new("uploads", "batch.csv"))
        .await
        .unwrap();

    // Replace the per-row items with one batch item
    let consumer = ctx.consumer(WritePolicy::PendingOnly);
    while !ctx.queue.is_empty() {
        for delivery in ctx.queue.receive(10).await.unwrap() {
            ctx.queue.ack(&delivery.receipt).await.unwrap();
        }
    }
    ctx.queue
        .enqueue(&WorkItem::new(vec!["a".into(), "b".into(), "c".into(), "zz".into()]))
        .await
        .unwrap();

    let round = ctx.drain(&consumer, 3).await.unwrap();
    assert_eq!(round.acked, 1);

    let statuses: Vec<_> = ctx.store.snapshot().iter().map(|r| r.status()).collect();
    assert_eq!(
        statuses,
        [RecordStatus::Ok, RecordStatus::Error, RecordStatus::Ok]
    );
}

/// Redelivering a settled item under PendingOnly leaves the record alone
#[tokio::test]
async fn test_redelivery_is_idempotent() {
    let ctx = TestContext::new().await;
    ctx.datasets.put(
        "uploads",
        "one.csv",
        fixtures::dataset_csv(&[("1", "51.5", "-0.1")]),
    );
    ctx.ingest
        .ingest_file(&pipeline_core::DatasetRef::new("uploads", "one.csv"))
        .await
        .unwrap();

    let consumer = ctx.consumer(WritePolicy::PendingOnly);
    ctx.drain(&consumer, 3).await.unwrap();
    let first = ctx.store.get("1").await.unwrap().unwrap();

    // Duplicate delivery of the same item
    ctx.queue.enqueue(&WorkItem::single("1")).await.unwrap();
    let round = ctx.drain(&consumer, 3).await.unwrap();

    assert_eq!(round.acked, 1);
    assert_eq!(ctx.store.get("1").await.unwrap().unwrap(), first);

    let lookups = ctx.lookup_server.received_requests().await.unwrap_or_default();
    assert_eq!(lookups.len(), 1, "terminal record must not be looked up again");
}

/// Overwrite policy re-resolves terminal records
#[tokio::test]
async fn test_overwrite_policy_replaces_result() {
    let ctx = TestContext::without_lookup_mocks().await;
    Mock::given(method("GET"))
        .and(path("/postcodes"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(fixtures::postcode_body("EC1A 1BB")),
        )
        .mount(&ctx.lookup_server)
        .await;

    ctx.datasets.put(
        "uploads",
        "one.csv",
        fixtures::dataset_csv(&[("1", "51.5", "-0.1")]),
    );
    ctx.ingest
        .ingest_file(&pipeline_core::DatasetRef::new("uploads", "one.csv"))
        .await
        .unwrap();
    ctx.store
        .update("1", &pipeline_core::RecordState::failed("timeout"), None)
        .await
        .unwrap();

    let round = ctx
        .drain(&ctx.consumer(WritePolicy::Overwrite), 3)
        .await
        .unwrap();
    assert_eq!(round.acked, 1);

    let record = ctx.store.get("1").await.unwrap().unwrap();
    assert_eq!(record.state.postcode(), Some("EC1A 1BB"));
}

/// Transient lookup failures are retried before the record is settled
#[tokio::test]
async fn test_transient_lookup_failure_is_retried() {
    let ctx = TestContext::without_lookup_mocks().await;
    Mock::given(method("GET"))
        .and(path("/postcodes"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&ctx.lookup_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/postcodes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(fixtures::postcode_body("N1 9GU")))
        .with_priority(5)
        .mount(&ctx.lookup_server)
        .await;

    ctx.datasets.put(
        "uploads",
        "one.csv",
        fixtures::dataset_csv(&[("1", "51.53", "-0.12")]),
    );
    ctx.ingest
        .ingest_file(&pipeline_core::DatasetRef::new("uploads", "one.csv"))
        .await
        .unwrap();
    ctx.drain(&ctx.consumer(WritePolicy::PendingOnly), 3)
        .await
        .unwrap();

    let record = ctx.store.get("1").await.unwrap().unwrap();
    assert_eq!(record.state.postcode(), Some("N1 9GU"));
    assert_eq!(
        ctx.lookup_server
            .received_requests()
            .await
            .unwrap_or_default()
            .len(),
        3
    );
}

/// A store failure leaves the item unacked; the redelivery settles it
#[tokio::test]
async fn test_store_failure_redelivers_item() {
    let ctx = TestContext::new().await;
    ctx.datasets.put(
        "uploads",
        "one.csv",
        fixtures::dataset_csv(&[("1", "51.5", "-0.1")]),
    );
    ctx.ingest
        .ingest_file(&pipeline_core::DatasetRef::new("uploads", "one.csv"))
        .await
        .unwrap();

    let flaky = Arc::new(FlakyStore::new(ctx.store.clone(), 1));
    let consumer = ctx.consumer_with_store(flaky, WritePolicy::PendingOnly);

    let first = consumer.run_once().await.unwrap();
    assert_eq!(first.left_for_redelivery, 1);
    assert_eq!(ctx.queue.len(), 1);
    assert_eq!(
        ctx.store.get("1").await.unwrap().unwrap().status(),
        RecordStatus::Pending
    );

    let second = consumer.run_once().await.unwrap();
    assert_eq!(second.acked, 1);
    assert!(ctx.queue.is_empty());
    assert_eq!(
        ctx.store.get("1").await.unwrap().unwrap().status(),
        RecordStatus::Ok
    );
}
