//! Threshold evaluation for system metrics
//!
//! Evaluation is stateless: every event is checked on its own, and a
//! value alerts only when it is strictly above the limit.

use std::fmt;

use serde::Serialize;
use tracing::error;

use crate::DataPoint;
use crate::config::Thresholds;

/// A watched resource metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertMetric {
    Cpu,
    Memory,
}

impl AlertMetric {
    /// Attribute key the metric is read from
    pub fn attribute(&self) -> &'static str {
        match self {
            AlertMetric::Cpu => "cpu_usage",
            AlertMetric::Memory => "memory_usage",
        }
    }

    fn limit(&self, thresholds: &Thresholds) -> f64 {
        match self {
            AlertMetric::Cpu => thresholds.cpu,
            AlertMetric::Memory => thresholds.memory,
        }
    }
}

impl fmt::Display for AlertMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertMetric::Cpu => write!(f, "CPU usage"),
            AlertMetric::Memory => write!(f, "memory usage"),
        }
    }
}

/// One metric of one event over its limit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdBreach {
    pub event_id: String,
    pub source: String,
    pub metric: AlertMetric,
    pub value: f64,
    pub limit: f64,
}

impl fmt::Display for ThresholdBreach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "high {} on {}: {:.2}% (limit {:.2}%, event {})",
            self.metric, self.source, self.value, self.limit, self.event_id
        )
    }
}

/// Evaluate an event against the thresholds
///
/// Each breach is logged at error level. Absent or non-numeric attributes
/// are skipped silently.
pub fn check_thresholds(event: &DataPoint, thresholds: &Thresholds) -> Vec<ThresholdBreach> {
    [AlertMetric::Cpu, AlertMetric::Memory]
        .into_iter()
        .filter_map(|metric| {
            let value = event.number(metric.attribute())?;
            let limit = metric.limit(thresholds);

            (value > limit).then(|| ThresholdBreach {
                event_id: event.id.clone(),
                source: event.source.clone(),
                metric,
                value,
                limit,
            })
        })
        .inspect(|breach| error!("{breach}"))
        .collect()
}
