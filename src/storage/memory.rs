//! In-memory event store (no persistence)
//!
//! Same upsert, aggregation and retention semantics as the SQLite store,
//! kept in maps behind a lock. It's useful for:
//! - Testing without database dependencies
//! - Throwaway runs where history does not matter
//!
//! ## Limitations
//!
//! - **No persistence**: All data lost on restart
//! - **Single process**: Not shared with sibling processes

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::DataPoint;

use super::backend::{EventStore, HealthStatus};
use super::error::{StorageError, StorageResult};
use super::schema::{AggregateRow, AggregationWindow, EventRow};

type AggregateKey = (DateTime<Utc>, String, String);

/// In-memory event store
#[derive(Default)]
pub struct MemoryStore {
    events: RwLock<HashMap<String, EventRow>>,
    aggregates: RwLock<BTreeMap<AggregateKey, AggregateRow>>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn upsert_event(&self, row: &EventRow) -> StorageResult<()> {
        self.ensure_open()?;

        self.events.write().await.insert(row.id.clone(), row.clone());
        Ok(())
    }

    async fn get_event(&self, id: &str) -> StorageResult<Option<DataPoint>> {
        self.ensure_open()?;

        self.events
            .read()
            .await
            .get(id)
            .cloned()
            .map(EventRow::into_data_point)
            .transpose()
    }

    async fn count_events(&self) -> StorageResult<usize> {
        self.ensure_open()?;

        Ok(self.events.read().await.len())
    }

    async fn aggregate_window(&self, window: &AggregationWindow) -> StorageResult<usize> {
        self.ensure_open()?;

        // (sum, count) per key
        let mut groups: BTreeMap<AggregateKey, (f64, u64)> = BTreeMap::new();

        for row in self.events.read().await.values() {
            if !window.contains(row.timestamp) {
                continue;
            }

            let event = row.clone().into_data_point()?;
            let Some(value) = event.number(&window.attribute) else {
                continue;
            };

            let key = (
                window.bucket_start(event.timestamp),
                event.source,
                event.category,
            );
            let entry = groups.entry(key).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }

        let written = groups.len();
        let mut aggregates = self.aggregates.write().await;

        for ((bucket, source, category), (sum, count)) in groups {
            let row = AggregateRow {
                bucket,
                source: source.clone(),
                category: category.clone(),
                average: sum / count as f64,
                sample_count: count,
            };
            aggregates.insert((bucket, source, category), row);
        }

        debug!("aggregation wrote {} rows", written);
        Ok(written)
    }

    async fn query_aggregates(&self) -> StorageResult<Vec<AggregateRow>> {
        self.ensure_open()?;

        Ok(self.aggregates.read().await.values().cloned().collect())
    }

    async fn cleanup_old_events(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        self.ensure_open()?;

        let mut events = self.events.write().await;
        let count_before = events.len();
        events.retain(|_, row| row.timestamp >= before);

        Ok(count_before - events.len())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let healthy = !self.is_closed();

        Ok(HealthStatus {
            healthy,
            message: if healthy {
                "In-memory store operational".to_string()
            } else {
                "In-memory store closed".to_string()
            },
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                (
                    "total_events".to_string(),
                    self.events.read().await.len().to_string(),
                ),
            ]),
        })
    }

    async fn get_stats(&self) -> StorageResult<String> {
        Ok(format!(
            "In-Memory: {} events, {} aggregates",
            self.events.read().await.len(),
            self.aggregates.read().await.len()
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory store");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
