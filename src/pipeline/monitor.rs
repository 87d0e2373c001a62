//! Self-monitoring of the host running the manager
//!
//! The manager samples its own host on a fixed period and publishes the
//! sample on `<namespace>.data.<source>.<category>`. With the default
//! source `system` that subject falls under the system pattern, so the
//! pipeline persists its own samples and checks them against the alert
//! thresholds like any other system metric.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use sysinfo::{Disks, Networks, System};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::bus::BusError;
use crate::bus::subject::publish_subject;
use crate::config::MonitorSettings;
use crate::{Attributes, AttributeValue, DataPoint, PipelineError, PipelineResult};

use super::shared::PipelineCore;

/// Produces one set of host metrics per call
pub trait MetricsSampler: Send {
    fn sample(&mut self) -> Attributes;
}

/// Samples the local machine through `sysinfo`
///
/// CPU usage is measured between two consecutive samples, so the very
/// first sample reports the usage since the sampler was created.
pub struct SystemSampler {
    system: System,
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();

        Self { system }
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    part as f64 / total as f64 * 100.0
}

impl MetricsSampler for SystemSampler {
    fn sample(&mut self) -> Attributes {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let mut attributes = Attributes::new();

        attributes.insert(
            "cpu_usage".to_string(),
            AttributeValue::from(self.system.global_cpu_usage()),
        );
        attributes.insert(
            "memory_usage".to_string(),
            AttributeValue::from(percent(
                self.system.used_memory(),
                self.system.total_memory(),
            )),
        );

        let disks = Disks::new_with_refreshed_list();
        let (total, available) = disks.iter().fold((0, 0), |(total, available), disk| {
            (total + disk.total_space(), available + disk.available_space())
        });
        attributes.insert(
            "disk_usage".to_string(),
            AttributeValue::from(percent(total.saturating_sub(available), total)),
        );

        let networks = Networks::new_with_refreshed_list();
        let (received, transmitted) =
            networks
                .iter()
                .fold((0, 0), |(received, transmitted), (_, data)| {
                    (
                        received + data.total_received(),
                        transmitted + data.total_transmitted(),
                    )
                });
        attributes.insert(
            "network_rx_bytes".to_string(),
            AttributeValue::from(received),
        );
        attributes.insert(
            "network_tx_bytes".to_string(),
            AttributeValue::from(transmitted),
        );

        if let Some(host_name) = System::host_name() {
            attributes.insert("host".to_string(), AttributeValue::from(host_name));
        }

        attributes
    }
}

pub struct SelfMonitor {
    settings: MonitorSettings,
    sampler: Mutex<Box<dyn MetricsSampler>>,
}

impl SelfMonitor {
    pub fn new(settings: MonitorSettings, sampler: Box<dyn MetricsSampler>) -> Self {
        Self {
            settings,
            sampler: Mutex::new(sampler),
        }
    }

    /// Take one sample and wrap it into an event
    pub fn sample_event(&self) -> DataPoint {
        let attributes = self
            .sampler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .sample();

        let mut event = DataPoint::new(&self.settings.source, &self.settings.category);
        event.attributes = attributes;
        event
    }

    /// Sample once and publish the result
    #[instrument(skip_all)]
    pub async fn publish_once(&self, core: &PipelineCore) -> PipelineResult<DataPoint> {
        let bus = core
            .bus()
            .ok_or(PipelineError::PublishFailed(BusError::Closed))?;

        let event = self.sample_event();
        let subject = publish_subject(
            &core.config().namespace,
            &self.settings.source,
            &self.settings.category,
        );
        let payload = event
            .encode()
            .map_err(|e| PipelineError::PublishFailed(BusError::PublishFailed(e.to_string())))?;

        bus.publish(&subject, Bytes::from(payload))
            .await
            .map_err(PipelineError::PublishFailed)?;

        trace!("published self-monitoring sample {} on {subject}", event.id);
        Ok(event)
    }

    /// Publish a sample every period until the token is cancelled
    ///
    /// A failed publish is logged and the loop carries on with the next
    /// period.
    pub async fn run(self: Arc<Self>, core: Arc<PipelineCore>, token: CancellationToken) {
        let period = self.settings.interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!("self-monitor started ({period:?} period)");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    match self.publish_once(&core).await {
                        Ok(_) => core.stats().record_published(),
                        Err(e) => {
                            core.stats().record_publish_failure();
                            warn!("self-monitoring sample dropped: {e}");
                        }
                    }
                }
            }
        }

        debug!("self-monitor stopped");
    }
}
