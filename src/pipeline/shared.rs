//! Connection state shared by every pipeline activity
//!
//! [`PipelineCore`] owns the store and bus handles once bootstrap has
//! acquired them, the registry of live subscriptions, and the alert
//! channel. Dispatch tasks, the batch scheduler and the self-monitor all
//! hold an `Arc` to it.
//!
//! ## Store ownership
//!
//! The store handle is supplied by the host. Bootstrap only probes it, and
//! cleanup never closes it: the host closes the store once the pipeline
//! has stopped.

use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use crate::bus::{BusConnector, MessageBus};
use crate::config::PipelineConfig;
use crate::storage::EventStore;
use crate::{DataPoint, PipelineResult};

use super::alerting::{ThresholdBreach, check_thresholds};
use super::bootstrap::{connect_bus, connect_store};
use super::dispatch::SubscriptionHandle;
use super::persistence;
use super::stats::PipelineStats;

const ALERT_CHANNEL_CAPACITY: usize = 256;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct PipelineCore {
    config: PipelineConfig,

    /// Store supplied by the host, probed during bootstrap
    store_handle: Arc<dyn EventStore>,

    /// Live store handle; `None` until bootstrap succeeds
    store: RwLock<Option<Arc<dyn EventStore>>>,

    connector: Arc<dyn BusConnector>,

    /// Live bus connection; `None` before bootstrap and after cleanup
    bus: Mutex<Option<Arc<dyn MessageBus>>>,

    subscriptions: Mutex<Vec<SubscriptionHandle>>,

    /// Serializes concurrent releases so the bus closes after every unsubscribe
    releasing: tokio::sync::Mutex<()>,

    alert_tx: broadcast::Sender<ThresholdBreach>,

    stats: PipelineStats,
}

impl PipelineCore {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn EventStore>,
        connector: Arc<dyn BusConnector>,
    ) -> Self {
        let (alert_tx, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);

        Self {
            config,
            store_handle: store,
            store: RwLock::new(None),
            connector,
            bus: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
            releasing: tokio::sync::Mutex::new(()),
            alert_tx,
            stats: PipelineStats::default(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Acquire the store, then the bus
    ///
    /// The bus is never attempted when the store could not be reached.
    #[instrument(skip_all)]
    pub async fn bootstrap(&self) -> PipelineResult<()> {
        connect_store(self.store_handle.as_ref(), &self.config.store_retry).await?;
        *self.store.write().unwrap_or_else(|p| p.into_inner()) =
            Some(Arc::clone(&self.store_handle));

        let bus = connect_bus(self.connector.as_ref(), &self.config.bus_retry).await?;
        *lock(&self.bus) = Some(bus);

        info!("store and message bus connected");
        Ok(())
    }

    pub fn store(&self) -> Option<Arc<dyn EventStore>> {
        self.store
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn bus(&self) -> Option<Arc<dyn MessageBus>> {
        lock(&self.bus).clone()
    }

    /// Persist an event, reporting failures to the caller
    pub async fn save(&self, event: &DataPoint) -> PipelineResult<()> {
        let store = self.store();
        persistence::save(store.as_deref(), event).await
    }

    /// Persist an event, logging and dropping failures
    pub async fn persist(&self, event: &DataPoint) {
        match self.save(event).await {
            Ok(()) => self.stats.record_persisted(),
            Err(e) => {
                self.stats.record_persist_failure();
                error!("dropping event {}: {e}", event.id);
            }
        }
    }

    /// Evaluate an event and broadcast every breach
    pub fn raise_alerts(&self, event: &DataPoint) -> usize {
        let breaches = check_thresholds(event, &self.config.thresholds);
        let raised = breaches.len();

        for breach in breaches {
            self.stats.record_alert();
            // no receivers is fine, the breach has been logged
            let _ = self.alert_tx.send(breach);
        }

        raised
    }

    pub fn alerts(&self) -> broadcast::Receiver<ThresholdBreach> {
        self.alert_tx.subscribe()
    }

    pub(crate) fn register_subscription(&self, handle: SubscriptionHandle) {
        lock(&self.subscriptions).push(handle);
    }

    /// Patterns with a live dispatch task
    pub fn active_patterns(&self) -> Vec<String> {
        lock(&self.subscriptions)
            .iter()
            .map(|handle| handle.pattern().to_string())
            .collect()
    }

    /// Release subscriptions, then close the bus
    ///
    /// Every dispatch task finishes the message it is working on before it
    /// unsubscribes. Safe to call repeatedly and with nothing acquired.
    #[instrument(skip_all)]
    pub async fn release(&self) {
        let _releasing = self.releasing.lock().await;
        let handles = std::mem::take(&mut *lock(&self.subscriptions));

        for handle in &handles {
            handle.cancel();
        }
        for handle in handles {
            handle.join().await;
        }

        let bus = lock(&self.bus).take();
        if let Some(bus) = bus {
            match bus.close().await {
                Ok(()) => debug!("message bus connection closed"),
                Err(e) => warn!("failed to close message bus connection: {e}"),
            }
        }
    }

    /// Synchronous teardown for contexts that cannot await
    pub(crate) fn abort(&self) {
        let handles = std::mem::take(&mut *lock(&self.subscriptions));
        for handle in handles {
            handle.abort();
        }

        let bus = lock(&self.bus).take();
        if let Some(bus) = bus
            && let Ok(runtime) = tokio::runtime::Handle::try_current()
        {
            runtime.spawn(async move {
                if let Err(e) = bus.close().await {
                    warn!("failed to close message bus connection: {e}");
                }
            });
        }
    }
}
