//! Record store contract tests.
//!
//! The same checks run against the in-memory store and, with Docker
//! available, against ClickHouse.

use clickhouse_client::{init_schema, ClickHouseClient, ClickHouseRecordStore, CoordinateRow};
use integration_tests::containers::TestContainers;
use pipeline_core::{
    CoordinateRecord, CreateOutcome, MemoryRecordStore, RecordState, RecordStatus, RecordStore,
    UpdateOutcome,
};

async fn check_store_contract(store: &dyn RecordStore) {
    let record = CoordinateRecord::pending("rec-1", "51.5", "-0.1");

    // Register once, second registration keeps the record
    assert_eq!(
        store.create_pending(&record).await.unwrap(),
        CreateOutcome::Created
    );
    assert_eq!(
        store.create_pending(&record).await.unwrap(),
        CreateOutcome::AlreadyExists
    );

    let stored = store.get("rec-1").await.unwrap().unwrap();
    assert_eq!(stored, record);
    assert!(store.get("rec-missing").await.unwrap().is_none());

    // Guarded write applies to a PENDING record
    let resolved = RecordState::resolved("SW1A 2AA").unwrap();
    assert_eq!(
        store
            .update("rec-1", &resolved, Some(RecordStatus::Pending))
            .await
            .unwrap(),
        UpdateOutcome::Applied
    );

    // A second guarded write loses
    assert_eq!(
        store
            .update("rec-1", &RecordState::failed("late"), Some(RecordStatus::Pending))
            .await
            .unwrap(),
        UpdateOutcome::Conflict {
            current: RecordStatus::Ok
        }
    );
    assert_eq!(store.get("rec-1").await.unwrap().unwrap().state, resolved);

    // Unguarded write overwrites
    let failed = RecordState::failed("Invalid longitude/latitude submitted");
    assert_eq!(
        store.update("rec-1", &failed, None).await.unwrap(),
        UpdateOutcome::Applied
    );
    let stored = store.get("rec-1").await.unwrap().unwrap();
    assert_eq!(stored.status(), RecordStatus::Error);
    assert_eq!(stored.state.postcode(), None);

    // Re-registration never resets a terminal record
    store.create_pending(&record).await.unwrap();
    assert_eq!(
        store.get("rec-1").await.unwrap().unwrap().status(),
        RecordStatus::Error
    );

    assert_eq!(
        store
            .update("rec-missing", &failed, Some(RecordStatus::Pending))
            .await
            .unwrap(),
        UpdateOutcome::NotFound
    );
    assert!(store.update("rec-1", &RecordState::Pending, None).await.is_err());
}

#[tokio::test]
async fn test_memory_store_contract() {
    let store = MemoryRecordStore::new();
    check_store_contract(&store).await;
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_clickhouse_store_contract() {
    let containers = TestContainers::start().await;
    let client = ClickHouseClient::new(containers.clickhouse_config.clone());
    init_schema(&client)
        .await
        .expect("Failed to initialize schema");

    let store = ClickHouseRecordStore::new(client);
    store.truncate().await.expect("Failed to truncate");

    check_store_contract(&store).await;
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_clickhouse_duplicate_registration_never_resets_state() {
    let containers = TestContainers::start().await;
    let client = ClickHouseClient::new(containers.clickhouse_config.clone());
    init_schema(&client)
        .await
        .expect("Failed to initialize schema");

    let store = ClickHouseRecordStore::new(client.clone());
    store.truncate().await.expect("Failed to truncate");

    let record = CoordinateRecord::pending("dup-1", "51.5", "-0.1");
    store.create_pending(&record).await.unwrap();
    store
        .update(
            "dup-1",
            &RecordState::resolved("SW1A 2AA").unwrap(),
            Some(RecordStatus::Pending),
        )
        .await
        .unwrap();

    // A racing registration that slipped past the existence check
    let mut insert = client
        .inner()
        .insert::<CoordinateRow>("coordinates")
        .unwrap();
    insert.write(&CoordinateRow::from(&record)).await.unwrap();
    insert.end().await.unwrap();

    let stored = store.get("dup-1").await.unwrap().unwrap();
    assert_eq!(stored.status(), RecordStatus::Ok);
    assert_eq!(store.count().await.unwrap(), 1);

    assert_eq!(
        store
            .update("dup-1", &RecordState::failed("late"), Some(RecordStatus::Pending))
            .await
            .unwrap(),
        UpdateOutcome::Conflict {
            current: RecordStatus::Ok
        }
    );
}
