//! Bounded-retry acquisition of the store and bus connections
//!
//! Each dependency gets a fixed number of attempts with a fixed pause in
//! between. Exhausting them yields `DependencyUnavailable`, which is fatal
//! to startup; restarting the process is left to the supervisor.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use crate::bus::{BusConnector, MessageBus};
use crate::error::{PipelineError, PipelineResult};
use crate::storage::EventStore;

pub use crate::error::Dependency;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,

    /// Pause between two attempts
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }
}

async fn retry<T, F, Fut>(
    dependency: Dependency,
    policy: &RetryPolicy,
    mut attempt: F,
) -> PipelineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for n in 1..=attempts {
        match attempt().await {
            Ok(value) => {
                info!("{dependency} ready after {n} attempt(s)");
                return Ok(value);
            }
            Err(e) => {
                warn!("{dependency} not ready (attempt {n}/{attempts}): {e}");
                last_error = e;
            }
        }

        if n < attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    error!("giving up on {dependency} after {attempts} attempts");

    Err(PipelineError::DependencyUnavailable {
        dependency,
        attempts,
        last_error,
    })
}

/// Probe the store until its health check passes
#[instrument(skip_all)]
pub async fn connect_store(store: &dyn EventStore, policy: &RetryPolicy) -> PipelineResult<()> {
    retry(Dependency::Store, policy, move || async move {
        match store.health_check().await {
            Ok(status) if status.healthy => Ok(()),
            Ok(status) => Err(status.message),
            Err(e) => Err(e.to_string()),
        }
    })
    .await
}

/// Open a bus connection, retrying on failure
#[instrument(skip_all, fields(target = %connector.target()))]
pub async fn connect_bus(
    connector: &dyn BusConnector,
    policy: &RetryPolicy,
) -> PipelineResult<Arc<dyn MessageBus>> {
    retry(Dependency::Bus, policy, move || async move {
        connector.connect().await.map_err(|e| e.to_string())
    })
    .await
}
