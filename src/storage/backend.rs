//! Storage backend trait definition
//!
//! This module defines the core `EventStore` trait that all
//! storage implementations must implement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::DataPoint;

use super::error::StorageResult;
use super::schema::{AggregateRow, AggregationWindow, EventRow};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: std::collections::HashMap<String, String>,
}

/// Trait for the time-series event store
///
/// The store is shared with sibling pipelines and other processes; it is
/// expected to provide row-level atomicity for each upsert. The pipeline
/// never wraps several statements in one transaction.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they will be used
/// across async tasks.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert an event, or overwrite timestamp, source, category and
    /// attributes of the row with the same id
    async fn upsert_event(&self, row: &EventRow) -> StorageResult<()>;

    /// Fetch a single event by id
    async fn get_event(&self, id: &str) -> StorageResult<Option<DataPoint>>;

    /// Number of raw events currently stored
    async fn count_events(&self) -> StorageResult<usize>;

    /// Recompute aggregates for every bucket touched by the window
    ///
    /// Existing aggregate rows for the same `(bucket, source, category)`
    /// are replaced, never accumulated. Returns the number of aggregate
    /// rows written.
    async fn aggregate_window(&self, window: &AggregationWindow) -> StorageResult<usize>;

    /// All aggregate rows, ordered by bucket, source, category
    async fn query_aggregates(&self) -> StorageResult<Vec<AggregateRow>>;

    /// Delete events strictly older than `before`
    ///
    /// Returns the number of events deleted; zero is a valid outcome.
    async fn cleanup_old_events(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    /// Lightweight round-trip to verify the backend is reachable
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Human-readable statistics (e.g. "SQLite: 1200 events, 3 aggregates")
    async fn get_stats(&self) -> StorageResult<String>;

    /// Close the backend and release resources
    ///
    /// Only the owner of the store calls this; pipelines never do.
    async fn close(&self) -> StorageResult<()>;
}
