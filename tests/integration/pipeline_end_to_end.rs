//! End-to-end flows through a running pipeline
//!
//! Every test runs a real pipeline against the in-process broker and an
//! in-memory store, publishing from a separate bus connection the way an
//! external producer would.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use pretty_assertions::assert_eq;
use telemetry_pipeline::{
    Attributes, AttributeValue, DataPoint,
    bus::memory::MemoryBroker,
    pipeline::{AlertMetric, MetricsSampler, Pipeline},
    storage::{EventRow, EventStore, memory::MemoryStore},
};
use tokio::sync::broadcast::error::TryRecvError;

use crate::helpers::*;

struct FixedSampler {
    cpu: f64,
}

impl MetricsSampler for FixedSampler {
    fn sample(&mut self) -> Attributes {
        Attributes::from([("cpu_usage".to_string(), AttributeValue::from(self.cpu))])
    }
}

#[tokio::test]
async fn test_system_metric_over_threshold_alerts_and_persists_once() {
    let broker = MemoryBroker::new();
    let store = Arc::new(MemoryStore::new());
    let mut running = spawn_pipeline(Pipeline::consumer(
        test_config(),
        store.clone(),
        Arc::new(broker.clone()),
    ))
    .await;
    let mut alerts = running.pipeline.alerts();

    let event = metric_event("e1", "sysA", 95.0);
    publish_event(&broker, "telemetry.data.system.metrics", &event).await;

    // delivered to both the ingest and the system-metrics subscription
    wait_for_stats(&running.pipeline, "both handlers to persist", |s| {
        s.persisted == 2
    })
    .await;

    let breach = alerts.recv().await.unwrap();
    assert_eq!(breach.event_id, "e1");
    assert_eq!(breach.metric, AlertMetric::Cpu);
    assert_eq!(breach.value, 95.0);
    assert_eq!(breach.limit, 90.0);
    assert!(matches!(alerts.try_recv(), Err(TryRecvError::Empty)));

    assert_eq!(store.count_events().await.unwrap(), 1);
    assert_eq!(store.get_event("e1").await.unwrap(), Some(event));

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_non_system_event_is_persisted_without_alert() {
    let broker = MemoryBroker::new();
    let store = Arc::new(MemoryStore::new());
    let mut running = spawn_pipeline(Pipeline::consumer(
        test_config(),
        store.clone(),
        Arc::new(broker.clone()),
    ))
    .await;
    let mut alerts = running.pipeline.alerts();

    publish_event(
        &broker,
        "telemetry.data.sysA.metrics",
        &metric_event("e2", "sysA", 99.0),
    )
    .await;

    wait_for_stats(&running.pipeline, "ingest to persist", |s| s.persisted == 1).await;

    assert!(store.get_event("e2").await.unwrap().is_some());
    assert!(matches!(alerts.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(running.pipeline.stats().alerts_raised, 0);

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_redelivered_event_is_stored_once() {
    let broker = MemoryBroker::new();
    let store = Arc::new(MemoryStore::new());
    let mut running = spawn_pipeline(Pipeline::consumer(
        test_config(),
        store.clone(),
        Arc::new(broker.clone()),
    ))
    .await;

    let event = metric_event("dup", "edge-1", 12.0);
    for _ in 0..3 {
        publish_event(&broker, "telemetry.data.edge-1.metrics", &event).await;
    }

    wait_for_stats(&running.pipeline, "three writes", |s| s.persisted == 3).await;
    assert_eq!(store.count_events().await.unwrap(), 1);

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_payload_is_dropped_and_dispatch_continues() {
    let broker = MemoryBroker::new();
    let store = Arc::new(MemoryStore::new());
    let mut running = spawn_pipeline(Pipeline::consumer(
        test_config(),
        store.clone(),
        Arc::new(broker.clone()),
    ))
    .await;

    publish(
        &broker,
        "telemetry.data.sysA.metrics",
        Bytes::from_static(b"{ not an event"),
    )
    .await;
    publish(
        &broker,
        "telemetry.data.sysA.metrics",
        Bytes::from_static(
            br#"{"id":"","timestamp":"2025-01-01T00:00:00Z","source":"a","category":"b"}"#,
        ),
    )
    .await;
    publish_event(
        &broker,
        "telemetry.data.sysA.metrics",
        &metric_event("after-garbage", "sysA", 1.0),
    )
    .await;

    wait_for_stats(&running.pipeline, "the valid event", |s| s.persisted == 1).await;

    let stats = running.pipeline.stats();
    assert_eq!(stats.received, 3);
    assert_eq!(stats.decode_failures, 2);
    assert_eq!(store.count_events().await.unwrap(), 1);

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_events_outside_namespace_are_ignored() {
    let broker = MemoryBroker::new();
    let store = Arc::new(MemoryStore::new());
    let mut running = spawn_pipeline(Pipeline::consumer(
        test_config(),
        store.clone(),
        Arc::new(broker.clone()),
    ))
    .await;

    let event = metric_event("foreign", "sysA", 1.0);
    publish_event(&broker, "other.data.sysA.metrics", &event).await;
    // `>` needs at least one token after `data`
    publish_event(&broker, "telemetry.data", &event).await;
    publish_event(&broker, "telemetry.data.sysA.metrics", &metric_event("mine", "sysA", 1.0))
        .await;

    wait_for_stats(&running.pipeline, "own event", |s| s.persisted == 1).await;

    assert_eq!(running.pipeline.stats().received, 1);
    assert!(store.get_event("foreign").await.unwrap().is_none());

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_store_rejection_is_contained() {
    let broker = MemoryBroker::new();
    let store = Arc::new(InstrumentedStore::new());
    let mut running = spawn_pipeline(Pipeline::consumer(
        test_config(),
        store.clone(),
        Arc::new(broker.clone()),
    ))
    .await;
    let mut alerts = running.pipeline.alerts();

    store.reject_writes(true);
    publish_event(
        &broker,
        "telemetry.data.system.metrics",
        &metric_event("lost", "sysA", 97.0),
    )
    .await;

    wait_for_stats(&running.pipeline, "both writes to fail", |s| {
        s.persist_failures == 2
    })
    .await;
    // alerting happens before persistence and is unaffected
    assert_eq!(alerts.recv().await.unwrap().event_id, "lost");

    store.reject_writes(false);
    publish_event(
        &broker,
        "telemetry.data.sysA.metrics",
        &metric_event("kept", "sysA", 10.0),
    )
    .await;

    wait_for_stats(&running.pipeline, "recovery", |s| s.persisted == 1).await;
    assert!(store.get_event("lost").await.unwrap().is_none());
    assert!(store.get_event("kept").await.unwrap().is_some());

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_manager_publishes_and_ingests_its_own_samples() {
    let broker = MemoryBroker::new();
    let store = Arc::new(MemoryStore::new());

    let mut config = test_config();
    config.monitor.interval = Duration::from_millis(20);

    let mut running = spawn_pipeline(Pipeline::manager(
        config,
        store.clone(),
        Arc::new(broker.clone()),
        Box::new(FixedSampler { cpu: 99.0 }),
    ))
    .await;
    let mut alerts = running.pipeline.alerts();

    let breach = tokio::time::timeout(Duration::from_secs(5), alerts.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(breach.source, "system");
    assert_eq!(breach.metric, AlertMetric::Cpu);

    let sample = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(sample) = store.get_event(&breach.event_id).await.unwrap() {
                break sample;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("sample was never persisted");
    assert_eq!(sample.category, "host");
    assert!(running.pipeline.stats().published >= 1);

    running.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_batch_jobs_aggregate_and_expire() {
    let broker = MemoryBroker::new();
    let store = Arc::new(MemoryStore::new());

    let now = Utc::now();
    for (id, age, cpu) in [("fresh-1", 1, 20.0), ("fresh-2", 2, 40.0)] {
        let event = metric_event(id, "sysA", cpu).with_timestamp(now - chrono::Duration::minutes(age));
        store
            .upsert_event(&EventRow::from_data_point(&event).unwrap())
            .await
            .unwrap();
    }
    let stale = DataPoint::new("sysA", "metrics")
        .with_id("stale")
        .with_timestamp(now - chrono::Duration::days(45));
    store
        .upsert_event(&EventRow::from_data_point(&stale).unwrap())
        .await
        .unwrap();

    let mut config = test_config();
    config.batch.interval = Duration::from_millis(20);

    let mut running = spawn_pipeline(Pipeline::consumer(
        config,
        store.clone(),
        Arc::new(broker.clone()),
    ))
    .await;

    wait_for_stats(&running.pipeline, "a batch run", |s| s.batch_runs >= 1).await;

    let aggregates = wait_for_aggregates(store.as_ref()).await;
    let total_samples: u64 = aggregates.iter().map(|row| row.sample_count).sum();
    assert_eq!(total_samples, 2);
    assert!(aggregates.iter().all(|row| row.source == "sysA"));

    assert!(store.get_event("stale").await.unwrap().is_none());
    assert_eq!(store.count_events().await.unwrap(), 2);
    assert_eq!(running.pipeline.stats().batch_failures, 0);

    running.shutdown().await.unwrap();
}
