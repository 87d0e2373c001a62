//! Helper functions for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use telemetry_pipeline::{
    DataPoint, PipelineResult,
    bus::{MessageBus, memory::MemoryBroker},
    config::PipelineConfig,
    pipeline::{LifecycleState, Pipeline, RetryPolicy, StatsSnapshot},
    storage::{
        AggregateRow, AggregationWindow, EventRow, EventStore, HealthStatus, StorageError,
        StorageResult, memory::MemoryStore,
    },
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default configuration with bootstrap retries short enough for tests
pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.store_retry = RetryPolicy::new(3, Duration::from_millis(10));
    config.bus_retry = RetryPolicy::new(3, Duration::from_millis(10));
    config
}

pub fn metric_event(id: &str, source: &str, cpu: f64) -> DataPoint {
    DataPoint::new(source, "metrics")
        .with_id(id)
        .with_attribute("cpu_usage", cpu)
}

/// Publish from a short-lived connection of its own
pub async fn publish(broker: &MemoryBroker, subject: &str, payload: impl Into<Bytes>) {
    let bus = broker.connection();
    bus.publish(subject, payload.into()).await.unwrap();
    bus.close().await.unwrap();
}

pub async fn publish_event(broker: &MemoryBroker, subject: &str, event: &DataPoint) {
    publish(broker, subject, event.encode().unwrap()).await;
}

/// Poll a synchronous condition until it holds
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;

    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

pub async fn wait_for_stats(
    pipeline: &Pipeline,
    what: &str,
    predicate: impl Fn(&StatsSnapshot) -> bool,
) {
    eventually(what, || predicate(&pipeline.stats())).await;
}

pub async fn wait_for_state(pipeline: &Pipeline, state: LifecycleState) {
    let mut changes = pipeline.state_changes();
    tokio::time::timeout(WAIT_TIMEOUT, changes.wait_for(|current| *current == state))
        .await
        .unwrap_or_else(|_| panic!("pipeline never reached {state:?}"))
        .unwrap();
}

pub async fn wait_for_aggregates(store: &dyn EventStore) -> Vec<AggregateRow> {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;

    loop {
        let rows = store.query_aggregates().await.unwrap();
        if !rows.is_empty() {
            return rows;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for aggregates"
        );
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// A pipeline whose `start` runs in a background task
pub struct RunningPipeline {
    pub pipeline: Arc<Pipeline>,
    pub ctx: CancellationToken,
    pub task: JoinHandle<PipelineResult<()>>,
}

impl RunningPipeline {
    /// Cancel the lifecycle context and wait for `start` to return
    pub async fn shutdown(&mut self) -> PipelineResult<()> {
        self.ctx.cancel();
        tokio::time::timeout(WAIT_TIMEOUT, &mut self.task)
            .await
            .expect("start did not return after cancellation")
            .expect("start panicked")
    }
}

/// Start the pipeline in the background and wait until it is running
pub async fn spawn_pipeline(pipeline: Pipeline) -> RunningPipeline {
    let pipeline = Arc::new(pipeline);
    let ctx = CancellationToken::new();

    let task = tokio::spawn({
        let pipeline = Arc::clone(&pipeline);
        let ctx = ctx.clone();
        async move { pipeline.start(ctx).await }
    });

    wait_for_state(&pipeline, LifecycleState::Running).await;

    RunningPipeline {
        pipeline,
        ctx,
        task,
    }
}

/// In-memory store with switchable write failures and optional write latency
#[derive(Default)]
pub struct InstrumentedStore {
    pub inner: MemoryStore,
    reject_writes: AtomicBool,
    write_delay: Option<Duration>,
    writes_started: AtomicUsize,
}

impl InstrumentedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_write_delay(delay: Duration) -> Self {
        Self {
            write_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    pub fn writes_started(&self) -> usize {
        self.writes_started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventStore for InstrumentedStore {
    async fn upsert_event(&self, row: &EventRow) -> StorageResult<()> {
        self.writes_started.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }

        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StorageError::QueryFailed("database is locked".to_string()));
        }

        self.inner.upsert_event(row).await
    }

    async fn get_event(&self, id: &str) -> StorageResult<Option<DataPoint>> {
        self.inner.get_event(id).await
    }

    async fn count_events(&self) -> StorageResult<usize> {
        self.inner.count_events().await
    }

    async fn aggregate_window(&self, window: &AggregationWindow) -> StorageResult<usize> {
        self.inner.aggregate_window(window).await
    }

    async fn query_aggregates(&self) -> StorageResult<Vec<AggregateRow>> {
        self.inner.query_aggregates().await
    }

    async fn cleanup_old_events(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        self.inner.cleanup_old_events(before).await
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        self.inner.health_check().await
    }

    async fn get_stats(&self) -> StorageResult<String> {
        self.inner.get_stats().await
    }

    async fn close(&self) -> StorageResult<()> {
        self.inner.close().await
    }
}
