//! Publish/subscribe message bus
//!
//! The pipeline only needs four operations from its transport: publish,
//! subscribe to a wildcard pattern, unsubscribe, and close. Those are
//! captured by [`MessageBus`] and [`Subscription`] so the NATS client and
//! the in-process broker are interchangeable.
//!
//! ## Delivery semantics
//!
//! - **At-most-once**: a message published while nobody listens is gone
//! - **Fan-out**: every subscription whose pattern matches receives a copy,
//!   including overlapping wildcard subscriptions on the same connection
//! - **No cross-subject ordering**
//!
//! ## Backends
//!
//! - **NATS** (feature `nats`, default): [`nats::NatsConnector`]
//! - **In-process**: [`memory::MemoryBroker`]

pub mod backend;
pub mod error;
pub mod memory;
#[cfg(feature = "nats")]
pub mod nats;
pub mod subject;

pub use backend::{BusConnector, BusMessage, MessageBus, Subscription};
pub use error::{BusError, BusResult};
