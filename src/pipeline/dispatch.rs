//! Subscription dispatch
//!
//! Every subscription gets its own task that pulls messages and hands them
//! to the handler registered for the pattern. A handler invocation always
//! runs to completion: the stop token is only looked at between messages.
//!
//! ```text
//! bus ──> <ns>.data.>         ──> IngestHandler        ──> persist
//!    └──> <ns>.data.system.>  ──> SystemMetricsHandler ──> alert, persist
//! ```
//!
//! A message on a system subject matches both patterns and is therefore
//! handled twice. The store upsert makes the second write a no-op.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::bus::subject::{ingest_pattern, system_pattern};
use crate::bus::{BusError, BusMessage, Subscription};
use crate::{DataPoint, PipelineError, PipelineResult};

use super::shared::PipelineCore;

/// Reacts to decoded events arriving on one subject pattern
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pattern this handler is registered under
    fn pattern(&self, namespace: &str) -> String;

    /// Process one event; failures are contained here
    async fn handle(&self, core: &PipelineCore, event: DataPoint);
}

/// Persists every event published under the namespace
pub struct IngestHandler;

#[async_trait]
impl MessageHandler for IngestHandler {
    fn name(&self) -> &'static str {
        "ingest"
    }

    fn pattern(&self, namespace: &str) -> String {
        ingest_pattern(namespace)
    }

    async fn handle(&self, core: &PipelineCore, event: DataPoint) {
        core.persist(&event).await;
    }
}

/// Checks system metrics against the thresholds, then persists them
pub struct SystemMetricsHandler;

#[async_trait]
impl MessageHandler for SystemMetricsHandler {
    fn name(&self) -> &'static str {
        "system-metrics"
    }

    fn pattern(&self, namespace: &str) -> String {
        system_pattern(namespace)
    }

    async fn handle(&self, core: &PipelineCore, event: DataPoint) {
        core.raise_alerts(&event);
        core.persist(&event).await;
    }
}

/// The handler set both roles register
pub fn default_handlers() -> Vec<Arc<dyn MessageHandler>> {
    vec![Arc::new(IngestHandler), Arc::new(SystemMetricsHandler)]
}

/// A running dispatch task and the means to stop it
pub(crate) struct SubscriptionHandle {
    pattern: String,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub(crate) fn pattern(&self) -> &str {
        &self.pattern
    }

    pub(crate) fn cancel(&self) {
        self.stop.cancel();
    }

    /// Wait for the task to finish its current message and unsubscribe
    pub(crate) async fn join(self) {
        if let Err(e) = self.task.await
            && e.is_panic()
        {
            error!("dispatch task for {} panicked", self.pattern);
        }
    }

    pub(crate) fn abort(self) {
        self.stop.cancel();
        self.task.abort();
    }
}

/// Subscribe every handler and spawn its dispatch task
///
/// The first failing subscription aborts the whole call. Subscriptions
/// registered before it stay with the core, so a later cleanup releases
/// them.
#[instrument(skip_all)]
pub async fn start_subscriptions(
    core: &Arc<PipelineCore>,
    handlers: &[Arc<dyn MessageHandler>],
    token: &CancellationToken,
) -> PipelineResult<()> {
    for handler in handlers {
        let pattern = handler.pattern(&core.config().namespace);

        let Some(bus) = core.bus() else {
            return Err(PipelineError::SubscribeFailed {
                pattern,
                source: BusError::Closed,
            });
        };

        let subscription =
            bus.subscribe(&pattern)
                .await
                .map_err(|source| PipelineError::SubscribeFailed {
                    pattern: pattern.clone(),
                    source,
                })?;

        let stop = token.child_token();
        let task = tokio::spawn(run_dispatch(
            Arc::clone(core),
            subscription,
            Arc::clone(handler),
            stop.clone(),
        ));

        info!("dispatching {pattern} to the {} handler", handler.name());

        core.register_subscription(SubscriptionHandle {
            pattern,
            stop,
            task,
        });
    }

    Ok(())
}

async fn run_dispatch(
    core: Arc<PipelineCore>,
    mut subscription: Box<dyn Subscription>,
    handler: Arc<dyn MessageHandler>,
    stop: CancellationToken,
) {
    debug!("dispatch for {} started", subscription.pattern());

    loop {
        let message = tokio::select! {
            _ = stop.cancelled() => break,
            message = subscription.next_message() => message,
        };

        let Some(message) = message else {
            debug!("subscription {} closed by the bus", subscription.pattern());
            break;
        };

        dispatch_message(&core, handler.as_ref(), message).await;
    }

    if let Err(e) = subscription.unsubscribe().await {
        warn!("failed to release {}: {e}", subscription.pattern());
    }

    debug!("dispatch for {} stopped", subscription.pattern());
}

/// Decode one message and hand it to the handler
///
/// Undecodable payloads are logged and dropped. They are never
/// redelivered.
pub(crate) async fn dispatch_message(
    core: &PipelineCore,
    handler: &dyn MessageHandler,
    message: BusMessage,
) {
    core.stats().record_received();

    let event = match DataPoint::decode(&message.payload) {
        Ok(event) => event,
        Err(e) => {
            core.stats().record_decode_failure();
            warn!(
                "dropping message on {}: {}",
                message.subject,
                PipelineError::from(e)
            );
            return;
        }
    };

    handler.handle(core, event).await;
}
