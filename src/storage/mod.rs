//! Storage backends for event persistence
//!
//! This module provides a trait-based abstraction for the time-series
//! event store and its derived aggregates.
//!
//! ## Design
//!
//! - **Trait-based**: `EventStore` trait allows swapping implementations
//! - **Async**: All operations are async for compatibility with Tokio tasks
//! - **Idempotent**: every write is an upsert keyed by a natural key
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database
//! - **In-Memory**: No persistence, for testing or throwaway runs
//!
//! ## Usage
//!
//! ```no_run
//! use telemetry_pipeline::storage::{EventStore, sqlite::SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = SqliteStore::new("./telemetry.db").await?;
//!     let health = store.health_check().await?;
//!     println!("{}", health.message);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{EventStore, HealthStatus};
pub use error::{StorageError, StorageResult};
pub use schema::{AggregateRow, AggregationWindow, EventRow};
