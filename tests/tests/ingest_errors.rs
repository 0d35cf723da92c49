//! Tests for error handling in the ingest stage and its HTTP surface.

use axum::http::StatusCode;
use axum_test::TestServer;
use integration_tests::{
    fixtures,
    mocks::{RawPayloadQueue, RejectingQueue},
    setup::TestContext,
};
use pipeline_core::{DatasetRef, MemoryQueue, RecordStatus, RecordStore, WorkQueue};
use std::sync::Arc;
use worker::{
    ConsumerWorker, EnrichmentWorker, IngestStage, LookupClient, RetryPolicy, WritePolicy,
};

/// Malformed notification body returns 400 DATA_002
#[tokio::test]
async fn test_malformed_notification_returns_400() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let response = server
        .post("/ingest")
        .content_type("application/json")
        .bytes("{not json".into())
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "DATA_002");
}

/// Notification without records is a successful no-op
#[tokio::test]
async fn test_empty_notification_is_noop() {
    let ctx = TestContext::new().await;
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let response = server.post("/ingest").json(&serde_json::json!({})).await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["rows_enqueued"], 0);
    assert!(ctx.queue.is_empty());
}

/// Scenario C: one failed download does not stop the other file
#[tokio::test]
async fn test_failed_download_does_not_block_other_files() {
    let ctx = TestContext::new().await;
    ctx.datasets.put(
        "uploads",
        "good.csv",
        fixtures::dataset_csv(&[("1", "51.5", "-0.1"), ("2", "52.0", "0.1")]),
    );
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let response = server
        .post("/ingest")
        .json(&fixtures::storage_event(&[
            ("uploads", "missing.csv"),
            ("uploads", "good.csv"),
        ]))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["rows_enqueued"], 2);
    assert_eq!(body["failed"][0]["key"], "missing.csv");
    assert_eq!(body["files"][0]["key"], "good.csv");

    assert_eq!(ctx.store.len(), 2);
    assert_eq!(ctx.queue.len(), 2);
}

/// URL-encoded object keys are decoded before download
#[tokio::test]
async fn test_encoded_object_key() {
    let ctx = TestContext::new().await;
    ctx.datasets.put(
        "uploads",
        "march 2024/coords.csv",
        fixtures::dataset_csv(&[("1", "51.5", "-0.1")]),
    );

    let summary = ctx
        .ingest
        .ingest_event(
            &serde_json::from_value(fixtures::storage_event(&[(
                "uploads",
                "march+2024%2Fcoords.csv",
            )]))
            .unwrap(),
        )
        .await;

    assert!(summary.failed.is_empty(), "failed: {:?}", summary.failed);
    assert_eq!(summary.rows_enqueued(), 1);
}

/// Undecodable rows are rejected, decodable ones still flow
#[tokio::test]
async fn test_rejected_rows_are_counted() {
    let ctx = TestContext::new().await;
    ctx.datasets.put(
        "uploads",
        "mixed.csv",
        &b"id,latitude,longitude\n1,51.5,-0.1\n2,\xff\xfe,-0.2\n3,52.0,0.1\n"[..],
    );

    let report = ctx
        .ingest
        .ingest_file(&DatasetRef::new("uploads", "mixed.csv"))
        .await
        .unwrap();

    assert_eq!(report.rows_read, 3);
    assert_eq!(report.rows_rejected, 1);
    assert_eq!(report.rows_enqueued, 2);

    let ids: Vec<_> = ctx.store.snapshot().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, ["1", "3"]);
}

/// A row shorter than the header is registered with empty values
#[tokio::test]
async fn test_short_row_is_registered_and_fails_enrichment() {
    let ctx = TestContext::new().await;
    ctx.datasets
        .put("uploads", "short.csv", "id,latitude,longitude\n7,51.5\n8,51.5,-0.1\n");
    let server = TestServer::new(ctx.router.clone()).expect("Failed to create test server");

    let response = server
        .post("/ingest")
        .json(&fixtures::storage_event(&[("uploads", "short.csv")]))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["rows_enqueued"], 2);
    assert_eq!(body["files"][0]["rows_rejected"], 0);

    let consumer = ctx.consumer(WritePolicy::PendingOnly);
    ctx.drain(&consumer, 5).await.unwrap();

    let record = ctx.store.get("7").await.unwrap().unwrap();
    assert_eq!(record.longitude, "");
    assert_eq!(record.status(), RecordStatus::Error);
    assert_eq!(record.state.error(), Some("invalid longitude ''"));
    assert_eq!(
        ctx.store.get("8").await.unwrap().unwrap().status(),
        RecordStatus::Ok
    );
}

/// A dataset with no header row is a file failure
#[tokio::test]
async fn test_empty_dataset_is_reported_as_failed() {
    let ctx = TestContext::new().await;
    ctx.datasets.put("uploads", "empty.csv", "");

    let summary = ctx
        .ingest
        .ingest_all(&[DatasetRef::new("uploads", "empty.csv")])
        .await;

    assert!(summary.files.is_empty());
    assert_eq!(summary.failed.len(), 1);
    assert!(summary.failed[0].cause.contains("header"));
}

/// Publish failures are counted and do not abort the file
#[tokio::test]
async fn test_publish_failure_is_counted_per_row() {
    let ctx = TestContext::new().await;
    ctx.datasets.put(
        "uploads",
        "batch.csv",
        fixtures::dataset_csv(&[("1", "51.5", "-0.1"), ("2", "52.0", "0.1"), ("3", "53.0", "0.2")]),
    );

    let queue = Arc::new(RejectingQueue::new(ctx.queue.clone(), &["2"]));
    let stage = IngestStage::new(ctx.datasets.clone(), ctx.store.clone(), queue);

    let report = stage
        .ingest_file(&DatasetRef::new("uploads", "batch.csv"))
        .await
        .unwrap();

    assert_eq!(report.rows_read, 3);
    assert_eq!(report.rows_registered, 3);
    assert_eq!(report.rows_enqueued, 2);
    assert_eq!(report.publish_failures, 1);

    // The unpublished row stays PENDING; re-ingest is the recovery path
    assert_eq!(
        ctx.store.get("2").await.unwrap().unwrap().status(),
        RecordStatus::Pending
    );
}

/// Undecodable queue payloads are acked and dropped
#[tokio::test]
async fn test_undecodable_payload_is_acked() {
    let ctx = TestContext::new().await;
    let queue = Arc::new(RawPayloadQueue::new(b"{\"latitude\": 51.5}"));

    let lookup = LookupClient::new(
        &format!("{}/postcodes", ctx.lookup_server.uri()),
        RetryPolicy::default(),
        std::time::Duration::from_secs(1),
    )
    .unwrap();
    let enrichment = EnrichmentWorker::new(ctx.store.clone(), Arc::new(lookup));
    let consumer = ConsumerWorker::new(queue.clone(), Arc::new(enrichment));

    let round = consumer.run_once().await.unwrap();
    assert_eq!(round.undecodable, 1);
    assert_eq!(round.acked, 1);
    assert_eq!(queue.acked().len(), 1);
    assert!(ctx.store.is_empty());
}

/// Items enqueued directly are visible to any consumer of the queue
#[tokio::test]
async fn test_memory_queue_is_shared() {
    let queue = Arc::new(MemoryQueue::default());
    queue
        .enqueue(&pipeline_core::WorkItem::single("1"))
        .await
        .unwrap();
    let as_trait: Arc<dyn WorkQueue> = queue.clone();
    assert_eq!(as_trait.receive(5).await.unwrap().len(), 1);
}
