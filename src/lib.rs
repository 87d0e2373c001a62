pub mod bus;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod storage;
pub mod util;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use error::{PipelineError, PipelineResult};

/// Open attribute map of an event.
///
/// Ordered so the encoded form is canonical for identical content.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A loosely-typed scalar attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl AttributeValue {
    /// Numeric view of the value, `None` for every other kind
    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Number(value)
    }
}

impl From<f32> for AttributeValue {
    fn from(value: f32) -> Self {
        AttributeValue::Number(value as f64)
    }
}

impl From<u64> for AttributeValue {
    fn from(value: u64) -> Self {
        AttributeValue::Number(value as f64)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Bool(value) => write!(f, "{value}"),
            AttributeValue::Number(value) => write!(f, "{value}"),
            AttributeValue::Text(value) => write!(f, "{value}"),
        }
    }
}

/// The unit of ingestion and publication
///
/// `id` is the idempotency key: storing the same id twice overwrites the
/// earlier record instead of creating a second one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub id: String,

    /// When the observation was made (not when it arrived)
    pub timestamp: DateTime<Utc>,

    pub source: String,

    pub category: String,

    #[serde(default)]
    pub attributes: Attributes,
}

impl DataPoint {
    /// Create an event stamped with the current time and a time-derived id
    pub fn new(source: impl Into<String>, category: impl Into<String>) -> Self {
        let source = source.into();
        let timestamp = Utc::now();
        let nanos = timestamp
            .timestamp_nanos_opt()
            .unwrap_or_else(|| timestamp.timestamp_micros() * 1000);

        Self {
            id: format!("{source}-{nanos}"),
            timestamp,
            source,
            category: category.into(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Numeric attribute lookup; absent or non-numeric values yield `None`
    pub fn number(&self, key: &str) -> Option<f64> {
        self.attributes.get(key).and_then(AttributeValue::as_number)
    }

    /// Decode a wire payload
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let event: DataPoint = serde_json::from_slice(payload).map_err(DecodeError::Malformed)?;

        if event.id.trim().is_empty() {
            return Err(DecodeError::MissingId);
        }

        Ok(event)
    }

    /// Encode into the wire payload
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Why an inbound payload was rejected
#[derive(Debug)]
pub enum DecodeError {
    /// Not a well-formed event record
    Malformed(serde_json::Error),

    /// The record has no idempotency key
    MissingId,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Malformed(err) => write!(f, "malformed event payload: {err}"),
            DecodeError::MissingId => write!(f, "event payload has an empty id"),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DecodeError::Malformed(err) => Some(err),
            DecodeError::MissingId => None,
        }
    }
}
