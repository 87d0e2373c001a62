//! Table row definitions
//!
//! ## Events
//!
//! One row per event id. The attribute map has no fixed schema, so it is
//! stored as a canonical JSON blob next to the typed key columns:
//!
//! ```text
//! id (PK) | timestamp | source | category | attributes (JSON)
//! ```
//!
//! ## Aggregates
//!
//! Derived rows keyed by `(bucket, source, category)`. They carry no
//! computation timestamp, so recomputing a bucket from the same events
//! yields a byte-identical row.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Attributes, DataPoint};

use super::error::StorageResult;

/// A single event row as stored in the events table
#[derive(Debug, Clone, PartialEq)]
pub struct EventRow {
    pub id: String,

    pub timestamp: DateTime<Utc>,

    pub source: String,

    pub category: String,

    /// Canonical JSON encoding of the attribute map
    pub attributes: String,
}

impl EventRow {
    /// Convert an event into its storage form
    pub fn from_data_point(event: &DataPoint) -> StorageResult<Self> {
        Ok(Self {
            id: event.id.clone(),
            timestamp: event.timestamp,
            source: event.source.clone(),
            category: event.category.clone(),
            attributes: serde_json::to_string(&event.attributes)?,
        })
    }

    /// Convert a stored row back into an event
    pub fn into_data_point(self) -> StorageResult<DataPoint> {
        let attributes: Attributes = serde_json::from_str(&self.attributes)?;

        Ok(DataPoint {
            id: self.id,
            timestamp: self.timestamp,
            source: self.source,
            category: self.category,
            attributes,
        })
    }
}

/// Rolling statistic for one time bucket of one source/category pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    /// Start of the time bucket
    pub bucket: DateTime<Utc>,

    pub source: String,

    pub category: String,

    /// Mean of the aggregated attribute
    pub average: f64,

    pub sample_count: u64,
}

/// The slice of raw events one aggregation run looks at
#[derive(Debug, Clone)]
pub struct AggregationWindow {
    /// Start of the window (inclusive)
    pub start: DateTime<Utc>,

    /// End of the window (inclusive)
    pub end: DateTime<Utc>,

    /// Width of the buckets the window is cut into
    pub bucket: Duration,

    /// Numeric attribute being averaged
    pub attribute: String,
}

impl AggregationWindow {
    /// Trailing window of `length` ending at `end`
    pub fn trailing(
        end: DateTime<Utc>,
        length: Duration,
        bucket: Duration,
        attribute: impl Into<String>,
    ) -> Self {
        let length = chrono::Duration::from_std(length).unwrap_or(chrono::Duration::zero());
        let start = floor_to_bucket(end - length, bucket_width_millis(bucket));

        Self {
            start,
            end,
            bucket,
            attribute: attribute.into(),
        }
    }

    /// Bucket width in milliseconds (never zero)
    pub fn bucket_millis(&self) -> i64 {
        bucket_width_millis(self.bucket)
    }

    /// Start of the bucket a timestamp falls into
    pub fn bucket_start(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        floor_to_bucket(timestamp, self.bucket_millis())
    }

    /// Lower bound of the scanned events
    ///
    /// Always a bucket boundary, so the oldest touched bucket is recomputed
    /// from all of its samples rather than overwritten with a partial tail.
    pub fn scan_start(&self) -> DateTime<Utc> {
        self.bucket_start(self.start)
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.scan_start() && timestamp <= self.end
    }
}

fn bucket_width_millis(bucket: Duration) -> i64 {
    i64::try_from(bucket.as_millis()).unwrap_or(i64::MAX).max(1)
}

fn floor_to_bucket(timestamp: DateTime<Utc>, width: i64) -> DateTime<Utc> {
    let millis = timestamp.timestamp_millis().div_euclid(width) * width;
    DateTime::from_timestamp_millis(millis).unwrap_or(timestamp)
}
