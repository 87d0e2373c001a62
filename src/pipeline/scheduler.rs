//! Periodic aggregation and retention
//!
//! Every tick runs aggregation over the trailing window first, then deletes
//! raw events past the retention horizon, so a bucket is always summarized
//! before its events can disappear. The first tick fires one full period
//! after start.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::config::BatchSettings;
use crate::storage::{AggregationWindow, EventStore};
use crate::{PipelineError, PipelineResult};

use super::shared::PipelineCore;

const MIN_PERIOD: Duration = Duration::from_millis(1);

pub struct BatchScheduler {
    settings: BatchSettings,
}

impl BatchScheduler {
    pub fn new(settings: BatchSettings) -> Self {
        Self { settings }
    }

    /// Trailing window ending at `now`
    pub fn window(&self, now: DateTime<Utc>) -> AggregationWindow {
        AggregationWindow::trailing(
            now,
            self.settings.window,
            self.settings.bucket,
            self.settings.attribute.clone(),
        )
    }

    /// Events strictly older than this are deleted by [`Self::cleanup`]
    pub fn retention_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.settings.retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Recompute the aggregates of the trailing window
    pub async fn aggregate(
        &self,
        store: Option<&dyn EventStore>,
        now: DateTime<Utc>,
    ) -> PipelineResult<usize> {
        let store = store.ok_or(PipelineError::StoreUnavailable)?;

        store
            .aggregate_window(&self.window(now))
            .await
            .map_err(PipelineError::MaintenanceFailed)
    }

    /// Delete raw events past the retention horizon
    pub async fn cleanup(
        &self,
        store: Option<&dyn EventStore>,
        now: DateTime<Utc>,
    ) -> PipelineResult<usize> {
        let store = store.ok_or(PipelineError::StoreUnavailable)?;

        store
            .cleanup_old_events(self.retention_cutoff(now))
            .await
            .map_err(PipelineError::MaintenanceFailed)
    }

    /// One aggregation pass followed by one retention pass
    ///
    /// A failed aggregation does not prevent the retention pass.
    #[instrument(skip_all)]
    pub async fn run_tick(&self, core: &PipelineCore) {
        let store = core.store();
        let now = Utc::now();

        match self.aggregate(store.as_deref(), now).await {
            Ok(rows) => info!("aggregation wrote {rows} bucket(s)"),
            Err(e) => {
                core.stats().record_batch_failure();
                error!("aggregation failed: {e}");
            }
        }

        match self.cleanup(store.as_deref(), now).await {
            Ok(deleted) => info!("retention removed {deleted} event(s)"),
            Err(e) => {
                core.stats().record_batch_failure();
                error!("retention cleanup failed: {e}");
            }
        }

        core.stats().record_batch_run();
    }

    /// Tick until the token is cancelled
    ///
    /// A tick in progress always completes.
    pub async fn run(self, core: Arc<PipelineCore>, token: CancellationToken) {
        let period = self.settings.interval.max(MIN_PERIOD);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!("batch scheduler started ({period:?} period)");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.run_tick(&core).await,
            }
        }

        debug!("batch scheduler stopped");
    }
}
