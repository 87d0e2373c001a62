//! Integration tests for persistence through the SQLite store
//!
//! These tests verify that:
//! - Events ingested over the bus land in the database exactly once
//! - Data survives closing and reopening the database
//! - The batch jobs aggregate and expire rows in SQLite

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use telemetry_pipeline::{
    DataPoint,
    bus::memory::MemoryBroker,
    pipeline::Pipeline,
    storage::{EventRow, EventStore, sqlite::SqliteStore},
};
use tempfile::tempdir;

use crate::helpers::*;

#[tokio::test]
async fn test_ingested_events_survive_reopen() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("pipeline.db");

    let broker = MemoryBroker::new();
    let store = Arc::new(SqliteStore::new(&db_path).await.unwrap());

    let mut running = spawn_pipeline(Pipeline::consumer(
        test_config(),
        store.clone(),
        Arc::new(broker.clone()),
    ))
    .await;

    // whole milliseconds, the precision the database keeps
    let observed_at = Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 0).unwrap();
    let event = metric_event("sqlite-1", "sysA", 95.0)
        .with_timestamp(observed_at)
        .with_attribute("host", "alpha");

    publish_event(&broker, "telemetry.data.system.metrics", &event).await;
    wait_for_stats(&running.pipeline, "both writes", |s| s.persisted == 2).await;

    running.shutdown().await.unwrap();

    // the pipeline leaves the store to its owner
    assert!(store.health_check().await.unwrap().healthy);
    store.close().await.unwrap();
    drop(store);

    let reopened = SqliteStore::new(&db_path).await.unwrap();
    assert_eq!(reopened.count_events().await.unwrap(), 1);
    assert_eq!(reopened.get_event("sqlite-1").await.unwrap(), Some(event));
}

#[tokio::test]
async fn test_batch_jobs_run_against_sqlite() {
    let temp_dir = tempdir().unwrap();
    let store = Arc::new(
        SqliteStore::new(temp_dir.path().join("batch.db"))
            .await
            .unwrap(),
    );

    let now = Utc::now();
    let rows = [
        metric_event("recent-a", "sysA", 30.0).with_timestamp(now - chrono::Duration::minutes(3)),
        metric_event("recent-b", "sysA", 50.0).with_timestamp(now - chrono::Duration::minutes(4)),
        DataPoint::new("sysA", "metrics")
            .with_id("expired")
            .with_timestamp(now - chrono::Duration::days(40)),
    ];
    for event in &rows {
        store
            .upsert_event(&EventRow::from_data_point(event).unwrap())
            .await
            .unwrap();
    }

    let mut config = test_config();
    config.batch.interval = Duration::from_millis(20);

    let mut running = spawn_pipeline(Pipeline::consumer(
        config,
        store.clone(),
        Arc::new(MemoryBroker::new()),
    ))
    .await;

    let aggregates = wait_for_aggregates(store.as_ref()).await;
    wait_for_stats(&running.pipeline, "a batch run", |s| s.batch_runs >= 1).await;
    running.shutdown().await.unwrap();

    let samples: u64 = aggregates.iter().map(|row| row.sample_count).sum();
    assert_eq!(samples, 2);
    assert!(store.get_event("expired").await.unwrap().is_none());
    assert_eq!(store.count_events().await.unwrap(), 2);

    store.close().await.unwrap();
}
