//! SQLite storage backend implementation
//!
//! This module provides a SQLite-based implementation of the `EventStore` trait.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Better concurrency for reads during writes
//! - **Connection pooling**: Efficient resource usage
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! ## Aggregation
//!
//! Attributes are stored as JSON text, so aggregation extracts the numeric
//! attribute with `json_extract` and only keeps rows where `json_type`
//! reports `integer` or `real`. Strings and booleans never contribute.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use crate::DataPoint;

use super::backend::{EventStore, HealthStatus};
use super::error::{StorageError, StorageResult};
use super::schema::{AggregateRow, AggregationWindow, EventRow};

/// SQLite event store
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteStore {
    /// Open (or create) the database and run migrations
    ///
    /// ## Arguments
    ///
    /// * `db_path` - Path to the SQLite database file (e.g., "./telemetry.db")
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite store at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("SQLite store ready");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    /// JSON path of a top-level attribute
    fn attribute_path(attribute: &str) -> String {
        format!("$.\"{}\"", attribute.replace('"', "\\\""))
    }
}

#[async_trait]
impl EventStore for SqliteStore {
    #[instrument(skip(self, row), fields(id = %row.id))]
    async fn upsert_event(&self, row: &EventRow) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO events (id, timestamp, source, category, attributes)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                timestamp = excluded.timestamp,
                source = excluded.source,
                category = excluded.category,
                attributes = excluded.attributes
            "#,
        )
        .bind(&row.id)
        .bind(Self::timestamp_to_millis(&row.timestamp))
        .bind(&row.source)
        .bind(&row.category)
        .bind(&row.attributes)
        .execute(&self.pool)
        .await?;

        debug!("upserted event {}", row.id);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_event(&self, id: &str) -> StorageResult<Option<DataPoint>> {
        let row = sqlx::query(
            "SELECT id, timestamp, source, category, attributes FROM events WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            EventRow {
                id: row.get("id"),
                timestamp: Self::millis_to_timestamp(row.get("timestamp")),
                source: row.get("source"),
                category: row.get("category"),
                attributes: row.get("attributes"),
            }
            .into_data_point()
        })
        .transpose()
    }

    async fn count_events(&self) -> StorageResult<usize> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0 as usize)
    }

    #[instrument(skip(self, window), fields(start = %window.start, end = %window.end))]
    async fn aggregate_window(&self, window: &AggregationWindow) -> StorageResult<usize> {
        let bucket = window.bucket_millis();
        let path = Self::attribute_path(&window.attribute);

        let result = sqlx::query(
            r#"
            INSERT INTO aggregates (bucket, source, category, average, sample_count)
            SELECT (timestamp / ?) * ? AS bucket_start,
                   source,
                   category,
                   AVG(CAST(json_extract(attributes, ?) AS REAL)),
                   COUNT(*)
            FROM events
            WHERE timestamp >= ? AND timestamp <= ?
              AND json_type(attributes, ?) IN ('integer', 'real')
            GROUP BY bucket_start, source, category
            ON CONFLICT (bucket, source, category) DO UPDATE SET
                average = excluded.average,
                sample_count = excluded.sample_count
            "#,
        )
        .bind(bucket)
        .bind(bucket)
        .bind(&path)
        .bind(Self::timestamp_to_millis(&window.scan_start()))
        .bind(Self::timestamp_to_millis(&window.end))
        .bind(&path)
        .execute(&self.pool)
        .await?;

        let written = result.rows_affected() as usize;
        debug!("aggregation wrote {} rows", written);
        Ok(written)
    }

    async fn query_aggregates(&self) -> StorageResult<Vec<AggregateRow>> {
        let rows = sqlx::query(
            r#"
            SELECT bucket, source, category, average, sample_count
            FROM aggregates
            ORDER BY bucket ASC, source ASC, category ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| AggregateRow {
                bucket: Self::millis_to_timestamp(row.get("bucket")),
                source: row.get("source"),
                category: row.get("category"),
                average: row.get("average"),
                sample_count: row.get::<i64, _>("sample_count") as u64,
            })
            .collect())
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_old_events(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let result = sqlx::query("DELETE FROM events WHERE timestamp < ?")
            .bind(Self::timestamp_to_millis(&before))
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() as usize;
        debug!("deleted {} old events", deleted);

        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        // Simple ping query to verify connection
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite store operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_stats(&self) -> StorageResult<String> {
        let events = self.count_events().await?;

        let aggregates: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM aggregates")
            .fetch_one(&self.pool)
            .await?;

        let file_size = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(format!(
            "SQLite: {} events, {} aggregates, {:.2} MB on disk",
            events,
            aggregates.0,
            file_size as f64 / 1_000_000.0
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite store");
        self.pool.close().await;
        Ok(())
    }
}
