//! Bus trait definitions

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::error::BusResult;

/// A message delivered to a subscription
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// Concrete subject the message was published on
    pub subject: String,

    pub payload: Bytes,
}

/// A live connection to the message bus
///
/// Implementations must be `Send + Sync`: the pipeline shares one
/// connection between the dispatch tasks and the self-monitoring loop.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a payload on a concrete subject
    async fn publish(&self, subject: &str, payload: Bytes) -> BusResult<()>;

    /// Register interest in a (possibly wildcard) subject pattern
    async fn subscribe(&self, pattern: &str) -> BusResult<Box<dyn Subscription>>;

    /// Close the connection
    ///
    /// Closing an already closed connection is a no-op.
    async fn close(&self) -> BusResult<()>;

    fn is_closed(&self) -> bool;
}

/// A registered subject pattern
#[async_trait]
pub trait Subscription: Send {
    fn pattern(&self) -> &str;

    /// Wait for the next message; `None` once the subscription is closed
    async fn next_message(&mut self) -> Option<BusMessage>;

    /// Release the subscription
    ///
    /// Calling this on an already released handle returns `Ok`.
    async fn unsubscribe(&mut self) -> BusResult<()>;
}

/// Establishes bus connections
///
/// This is the unit the bootstrapper retries.
#[async_trait]
pub trait BusConnector: Send + Sync {
    /// Human-readable target for logging (e.g. the broker URL)
    fn target(&self) -> String;

    async fn connect(&self) -> BusResult<Arc<dyn MessageBus>>;
}
