//! The ingestion pipeline
//!
//! A [`Pipeline`] connects to its store and message bus, subscribes to the
//! ingestion patterns, and keeps the batch jobs running until it is told to
//! stop. It comes in two roles:
//!
//! - **Consumer**: subscriptions and batch jobs only
//! - **Manager**: the same, plus a loop publishing samples of its own host
//!
//! ## Lifecycle
//!
//! ```text
//! Created ──start──> Bootstrapping ──> Running ──cancel──> Draining ──> Stopped
//!                          │
//!                          └── dependency unavailable / subscribe failed ──> Stopped
//! ```
//!
//! Shutdown stops timers first, then lets every in-flight message finish,
//! unsubscribes, and closes the bus last. The store belongs to the host and
//! is left open.

pub mod alerting;
pub mod bootstrap;
pub mod dispatch;
pub mod monitor;
pub mod persistence;
pub mod scheduler;
pub mod shared;
pub mod stats;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::bus::BusConnector;
use crate::config::PipelineConfig;
use crate::storage::EventStore;
use crate::{DataPoint, PipelineResult};

pub use alerting::{AlertMetric, ThresholdBreach};
pub use bootstrap::RetryPolicy;
pub use dispatch::{IngestHandler, MessageHandler, SystemMetricsHandler};
pub use monitor::{MetricsSampler, SelfMonitor, SystemSampler};
pub use scheduler::BatchScheduler;
pub use shared::PipelineCore;
pub use stats::StatsSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Consumer,
    Manager,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Consumer => write!(f, "consumer"),
            Role::Manager => write!(f, "manager"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Created,
    Bootstrapping,
    Running,
    Draining,
    Stopped,
}

/// Stop requests, shared between `start` and `stop`
#[derive(Default)]
struct ShutdownSlot {
    /// Cancels the running activities of the current `start` call
    token: Option<CancellationToken>,

    /// Set by a `stop` that found nothing running; consumed by the next `start`
    stop_requested: bool,
}

pub struct Pipeline {
    role: Role,
    core: Arc<PipelineCore>,
    monitor: Option<Arc<SelfMonitor>>,
    state: watch::Sender<LifecycleState>,

    shutdown: Mutex<ShutdownSlot>,

    /// Held by `start` for its whole run
    running: tokio::sync::Mutex<()>,
}

impl Pipeline {
    /// Subscriptions and batch jobs only
    pub fn consumer(
        config: PipelineConfig,
        store: Arc<dyn EventStore>,
        connector: Arc<dyn BusConnector>,
    ) -> Self {
        Self::assemble(Role::Consumer, config, store, connector, None)
    }

    /// A consumer that additionally publishes samples of its own host
    pub fn manager(
        config: PipelineConfig,
        store: Arc<dyn EventStore>,
        connector: Arc<dyn BusConnector>,
        sampler: Box<dyn MetricsSampler>,
    ) -> Self {
        let monitor = SelfMonitor::new(config.monitor.clone(), sampler);
        Self::assemble(
            Role::Manager,
            config,
            store,
            connector,
            Some(Arc::new(monitor)),
        )
    }

    fn assemble(
        role: Role,
        config: PipelineConfig,
        store: Arc<dyn EventStore>,
        connector: Arc<dyn BusConnector>,
        monitor: Option<Arc<SelfMonitor>>,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Created);

        Self {
            role,
            core: Arc::new(PipelineCore::new(config, store, connector)),
            monitor,
            state,
            shutdown: Mutex::new(ShutdownSlot::default()),
            running: tokio::sync::Mutex::new(()),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions
    pub fn state_changes(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn core(&self) -> &Arc<PipelineCore> {
        &self.core
    }

    /// Threshold breaches raised by the system-metrics handler
    pub fn alerts(&self) -> broadcast::Receiver<ThresholdBreach> {
        self.core.alerts()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats().snapshot()
    }

    /// Persist an event directly, bypassing the bus
    pub async fn save(&self, event: &DataPoint) -> PipelineResult<()> {
        self.core.save(event).await
    }

    /// Forward-only transition; a stopped pipeline never re-enters draining
    fn advance(&self, next: LifecycleState) {
        self.state.send_if_modified(|current| {
            if next > *current {
                debug!("lifecycle {current:?} -> {next:?}");
                *current = next;
                true
            } else {
                false
            }
        });
    }

    fn shutdown_slot(&self) -> MutexGuard<'_, ShutdownSlot> {
        self.shutdown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn shutdown_token(&self) -> Option<CancellationToken> {
        self.shutdown_slot().token.clone()
    }

    /// Install a fresh token for this run, unless a stop is already pending
    fn arm(&self, ctx: &CancellationToken) -> Option<CancellationToken> {
        let mut slot = self.shutdown_slot();
        if std::mem::take(&mut slot.stop_requested) {
            return None;
        }

        let token = ctx.child_token();
        slot.token = Some(token.clone());
        Some(token)
    }

    /// Run the pipeline until `ctx` is cancelled or [`Self::stop`] is called
    ///
    /// Returns an error only when startup fails, in which case everything
    /// acquired so far has already been released.
    #[instrument(skip_all, fields(role = %self.role))]
    pub async fn start(&self, ctx: CancellationToken) -> PipelineResult<()> {
        let _running = self.running.lock().await;

        let Some(token) = self.arm(&ctx) else {
            info!("stop requested before start, not starting");
            self.advance(LifecycleState::Stopped);
            return Ok(());
        };

        self.state.send_replace(LifecycleState::Bootstrapping);
        info!("starting pipeline");

        if let Err(e) = self.core.bootstrap().await {
            error!("bootstrap failed: {e}");
            self.cleanup().await;
            return Err(e);
        }

        if let Err(e) =
            dispatch::start_subscriptions(&self.core, &dispatch::default_handlers(), &token).await
        {
            error!("subscription setup failed: {e}");
            self.cleanup().await;
            return Err(e);
        }

        let mut activities = JoinSet::new();
        activities.spawn(
            BatchScheduler::new(self.core.config().batch.clone())
                .run(Arc::clone(&self.core), token.clone()),
        );
        if let Some(monitor) = &self.monitor {
            activities.spawn(Arc::clone(monitor).run(Arc::clone(&self.core), token.clone()));
        }

        self.advance(LifecycleState::Running);
        info!(
            "pipeline running, subscribed to {:?}",
            self.core.active_patterns()
        );

        token.cancelled().await;

        self.advance(LifecycleState::Draining);
        info!("draining pipeline");

        while let Some(result) = activities.join_next().await {
            if let Err(e) = result {
                error!("background activity failed: {e}");
            }
        }

        self.cleanup().await;
        info!("pipeline stopped");
        Ok(())
    }

    /// Stop a running pipeline and release its connections
    ///
    /// Waits for an active [`Self::start`] to finish draining, so timers
    /// stop before subscriptions are released and the bus is closed. When
    /// nothing is running, the request is kept and the next `start` returns
    /// without connecting.
    pub async fn stop(&self) {
        {
            let mut slot = self.shutdown_slot();
            let live = slot.token.clone().filter(|token| !token.is_cancelled());
            match live {
                Some(token) => token.cancel(),
                None => slot.stop_requested = true,
            }
        }

        let _running = self.running.lock().await;
        self.cleanup().await;
    }

    /// Release subscriptions and the bus connection
    ///
    /// Idempotent, and safe to call in any state. The store is left open.
    pub async fn cleanup(&self) {
        if let Some(token) = self.shutdown_token() {
            token.cancel();
        }

        self.core.release().await;
        self.advance(LifecycleState::Stopped);
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if matches!(
            self.state(),
            LifecycleState::Created | LifecycleState::Stopped
        ) {
            return;
        }

        warn!("pipeline dropped while {:?}, aborting its tasks", self.state());

        if let Some(token) = self.shutdown_token() {
            token.cancel();
        }
        self.core.abort();
    }
}
