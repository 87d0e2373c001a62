//! In-process message bus
//!
//! A broker living inside the process, with the same delivery semantics as
//! the NATS backend: wildcard patterns, fan-out to every matching
//! subscription, at-most-once delivery. It's useful for:
//! - Testing the pipeline without a broker
//! - Single-process deployments where producers run in the same binary

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::backend::{BusConnector, BusMessage, MessageBus, Subscription};
use super::error::{BusError, BusResult};
use super::subject::subject_matches;

struct SubscriptionEntry {
    pattern: String,
    connection_id: u64,
    sender: mpsc::UnboundedSender<BusMessage>,
}

#[derive(Default)]
struct BrokerState {
    next_id: u64,
    subscriptions: HashMap<u64, SubscriptionEntry>,
    connections: HashSet<u64>,
}

impl BrokerState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Shared broker; every connection created from it sees the same subjects
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    available: Arc<AtomicBool>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate the broker going down (new connections are refused)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of live subscriptions across all connections
    pub fn subscription_count(&self) -> usize {
        self.lock().subscriptions.len()
    }

    /// Number of connections that have not been closed
    pub fn open_connections(&self) -> usize {
        self.lock().connections.len()
    }

    /// Open a connection directly, bypassing availability
    pub fn connection(&self) -> MemoryBus {
        let id = {
            let mut state = self.lock();
            let id = state.allocate_id();
            state.connections.insert(id);
            id
        };

        debug!("opened in-memory bus connection #{id}");

        MemoryBus {
            id,
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        lock_state(&self.state)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_state(state: &Mutex<BrokerState>) -> MutexGuard<'_, BrokerState> {
    // a panicking test thread must not wedge every other connection
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl BusConnector for MemoryBroker {
    fn target(&self) -> String {
        "in-memory".to_string()
    }

    async fn connect(&self) -> BusResult<Arc<dyn MessageBus>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(BusError::ConnectionFailed(
                "in-memory broker unavailable".to_string(),
            ));
        }

        Ok(Arc::new(self.connection()))
    }
}

/// One connection to a [`MemoryBroker`]
pub struct MemoryBus {
    id: u64,
    state: Arc<Mutex<BrokerState>>,
    closed: AtomicBool,
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> BusResult<()> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let state = lock_state(&self.state);
        let mut delivered = 0;

        for entry in state.subscriptions.values() {
            if subject_matches(&entry.pattern, subject) {
                let message = BusMessage {
                    subject: subject.to_string(),
                    payload: payload.clone(),
                };
                // receiver gone means the subscription is being torn down
                if entry.sender.send(message).is_ok() {
                    delivered += 1;
                }
            }
        }

        trace!("published on {subject} to {delivered} subscriptions");
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> BusResult<Box<dyn Subscription>> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }

        let (sender, receiver) = mpsc::unbounded_channel();

        let id = {
            let mut state = lock_state(&self.state);
            let id = state.allocate_id();
            state.subscriptions.insert(
                id,
                SubscriptionEntry {
                    pattern: pattern.to_string(),
                    connection_id: self.id,
                    sender,
                },
            );
            id
        };

        debug!("subscribed to {pattern} (subscription #{id})");

        Ok(Box::new(MemorySubscription {
            id,
            pattern: pattern.to_string(),
            receiver,
            state: Arc::clone(&self.state),
            released: false,
        }))
    }

    async fn close(&self) -> BusResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut state = lock_state(&self.state);
        state
            .subscriptions
            .retain(|_, entry| entry.connection_id != self.id);
        state.connections.remove(&self.id);

        debug!("closed in-memory bus connection #{}", self.id);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MemorySubscription {
    id: u64,
    pattern: String,
    receiver: mpsc::UnboundedReceiver<BusMessage>,
    state: Arc<Mutex<BrokerState>>,
    released: bool,
}

#[async_trait]
impl Subscription for MemorySubscription {
    fn pattern(&self) -> &str {
        &self.pattern
    }

    async fn next_message(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }

    async fn unsubscribe(&mut self) -> BusResult<()> {
        if self.released {
            return Ok(());
        }

        lock_state(&self.state).subscriptions.remove(&self.id);
        self.receiver.close();
        self.released = true;

        debug!("unsubscribed from {} (subscription #{})", self.pattern, self.id);
        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        if !self.released {
            lock_state(&self.state).subscriptions.remove(&self.id);
        }
    }
}
