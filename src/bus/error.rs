//! Error types for bus operations

use std::fmt;

/// Result type alias for bus operations
pub type BusResult<T> = Result<T, BusError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Could not reach the broker
    ConnectionFailed(String),

    /// The connection has been closed
    Closed,

    /// The broker refused a subscription
    SubscribeFailed(String),

    /// The broker refused a publish
    PublishFailed(String),

    /// Releasing a subscription failed
    UnsubscribeFailed(String),
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::ConnectionFailed(msg) => write!(f, "failed to connect to bus: {}", msg),
            BusError::Closed => write!(f, "bus connection is closed"),
            BusError::SubscribeFailed(msg) => write!(f, "subscribe failed: {}", msg),
            BusError::PublishFailed(msg) => write!(f, "publish failed: {}", msg),
            BusError::UnsubscribeFailed(msg) => write!(f, "unsubscribe failed: {}", msg),
        }
    }
}

impl std::error::Error for BusError {}

#[cfg(feature = "nats")]
impl From<async_nats::ConnectError> for BusError {
    fn from(err: async_nats::ConnectError) -> Self {
        BusError::ConnectionFailed(err.to_string())
    }
}

#[cfg(feature = "nats")]
impl From<async_nats::SubscribeError> for BusError {
    fn from(err: async_nats::SubscribeError) -> Self {
        BusError::SubscribeFailed(err.to_string())
    }
}

#[cfg(feature = "nats")]
impl From<async_nats::PublishError> for BusError {
    fn from(err: async_nats::PublishError) -> Self {
        BusError::PublishFailed(err.to_string())
    }
}
