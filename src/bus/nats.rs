//! NATS message bus backend
//!
//! Subjects and wildcards map one-to-one onto NATS subjects, so overlapping
//! subscriptions on a connection each receive their own copy of a message.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, info, instrument};

use super::backend::{BusConnector, BusMessage, MessageBus, Subscription};
use super::error::{BusError, BusResult};

/// Connects to a NATS server
#[derive(Debug, Clone)]
pub struct NatsConnector {
    url: String,
    client_name: String,
}

impl NatsConnector {
    pub fn new(url: impl Into<String>, client_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client_name: client_name.into(),
        }
    }
}

#[async_trait]
impl BusConnector for NatsConnector {
    fn target(&self) -> String {
        self.url.clone()
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn connect(&self) -> BusResult<Arc<dyn MessageBus>> {
        let client = async_nats::ConnectOptions::new()
            .name(&self.client_name)
            .connect(&self.url)
            .await?;

        info!("connected to NATS at {}", self.url);

        Ok(Arc::new(NatsBus {
            client,
            closed: AtomicBool::new(false),
        }))
    }
}

/// A live NATS connection
pub struct NatsBus {
    client: async_nats::Client,
    closed: AtomicBool,
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> BusResult<()> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        self.client.publish(subject.to_string(), payload).await?;
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> BusResult<Box<dyn Subscription>> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let subscriber = self.client.subscribe(pattern.to_string()).await?;
        debug!("subscribed to {pattern}");

        Ok(Box::new(NatsSubscription {
            pattern: pattern.to_string(),
            subscriber,
            released: false,
        }))
    }

    async fn close(&self) -> BusResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // drain flushes pending publishes, then closes the connection
        self.client
            .drain()
            .await
            .map_err(|e| BusError::ConnectionFailed(e.to_string()))?;

        info!("closed NATS connection");
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct NatsSubscription {
    pattern: String,
    subscriber: async_nats::Subscriber,
    released: bool,
}

#[async_trait]
impl Subscription for NatsSubscription {
    fn pattern(&self) -> &str {
        &self.pattern
    }

    async fn next_message(&mut self) -> Option<BusMessage> {
        if self.released {
            return None;
        }

        self.subscriber.next().await.map(|message| BusMessage {
            subject: message.subject.to_string(),
            payload: message.payload,
        })
    }

    async fn unsubscribe(&mut self) -> BusResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        self.subscriber
            .unsubscribe()
            .await
            .map_err(|e| BusError::UnsubscribeFailed(e.to_string()))?;

        debug!("unsubscribed from {}", self.pattern);
        Ok(())
    }
}
