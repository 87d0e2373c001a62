//! Startup against unreachable or slow dependencies
//!
//! These run on a paused clock so the default retry budgets (15 store
//! attempts, 10 bus attempts, 2 s apart) are exercised without waiting.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use telemetry_pipeline::{
    PipelineError,
    bus::memory::MemoryBroker,
    config::PipelineConfig,
    error::Dependency,
    pipeline::{LifecycleState, Pipeline},
    storage::{EventStore, memory::MemoryStore},
};
use tokio_util::sync::CancellationToken;

use crate::helpers::*;

#[tokio::test(start_paused = true)]
async fn test_unreachable_store_fails_startup_without_touching_the_bus() {
    let broker = MemoryBroker::new();
    let store = Arc::new(MemoryStore::new());
    store.close().await.unwrap();

    let pipeline = Pipeline::consumer(
        PipelineConfig::default(),
        store.clone(),
        Arc::new(broker.clone()),
    );
    let started = tokio::time::Instant::now();

    let err = pipeline.start(CancellationToken::new()).await.unwrap_err();

    assert_matches!(
        err,
        PipelineError::DependencyUnavailable {
            dependency: Dependency::Store,
            attempts: 15,
            ..
        }
    );
    assert_eq!(started.elapsed(), Duration::from_secs(28));
    assert_eq!(broker.open_connections(), 0);
    assert_eq!(pipeline.state(), LifecycleState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_bus_fails_startup_and_keeps_store_open() {
    let broker = MemoryBroker::new();
    broker.set_available(false);
    let store = Arc::new(MemoryStore::new());

    let pipeline = Pipeline::consumer(
        PipelineConfig::default(),
        store.clone(),
        Arc::new(broker.clone()),
    );

    let err = pipeline.start(CancellationToken::new()).await.unwrap_err();

    assert_matches!(
        &err,
        PipelineError::DependencyUnavailable {
            dependency: Dependency::Bus,
            attempts: 10,
            ..
        }
    );
    assert!(err.to_string().contains("message bus"));
    assert_eq!(broker.subscription_count(), 0);
    assert!(!store.is_closed());
    assert!(store.health_check().await.unwrap().healthy);
}

#[tokio::test(start_paused = true)]
async fn test_bus_recovering_within_budget_lets_startup_proceed() {
    let broker = MemoryBroker::new();
    broker.set_available(false);

    // broker comes up after a few failed attempts
    let delayed = broker.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        delayed.set_available(true);
    });

    let pipeline = Arc::new(Pipeline::consumer(
        PipelineConfig::default(),
        Arc::new(MemoryStore::new()),
        Arc::new(broker.clone()),
    ));
    let ctx = CancellationToken::new();
    let task = tokio::spawn({
        let pipeline = Arc::clone(&pipeline);
        let ctx = ctx.clone();
        async move { pipeline.start(ctx).await }
    });

    pipeline
        .state_changes()
        .wait_for(|state| *state == LifecycleState::Running)
        .await
        .unwrap();

    assert_eq!(broker.open_connections(), 1);
    assert_eq!(broker.subscription_count(), 2);

    ctx.cancel();
    task.await.unwrap().unwrap();
    assert_eq!(broker.open_connections(), 0);
}

#[tokio::test]
async fn test_save_before_start_reports_missing_store() {
    let pipeline = Pipeline::consumer(
        test_config(),
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryBroker::new()),
    );

    let result = pipeline
        .save(&metric_event("early", "sysA", 1.0))
        .await;

    assert_matches!(result, Err(PipelineError::StoreUnavailable));
}
