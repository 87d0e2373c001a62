use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Running counters of a pipeline instance
#[derive(Debug, Default)]
pub struct PipelineStats {
    received: AtomicU64,
    decode_failures: AtomicU64,
    persisted: AtomicU64,
    persist_failures: AtomicU64,
    alerts_raised: AtomicU64,
    published: AtomicU64,
    publish_failures: AtomicU64,
    batch_runs: AtomicU64,
    batch_failures: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub decode_failures: u64,
    pub persisted: u64,
    pub persist_failures: u64,
    pub alerts_raised: u64,
    pub published: u64,
    pub publish_failures: u64,
    pub batch_runs: u64,
    pub batch_failures: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl PipelineStats {
    pub(crate) fn record_received(&self) {
        bump(&self.received);
    }

    pub(crate) fn record_decode_failure(&self) {
        bump(&self.decode_failures);
    }

    pub(crate) fn record_persisted(&self) {
        bump(&self.persisted);
    }

    pub(crate) fn record_persist_failure(&self) {
        bump(&self.persist_failures);
    }

    pub(crate) fn record_alert(&self) {
        bump(&self.alerts_raised);
    }

    pub(crate) fn record_published(&self) {
        bump(&self.published);
    }

    pub(crate) fn record_publish_failure(&self) {
        bump(&self.publish_failures);
    }

    pub(crate) fn record_batch_run(&self) {
        bump(&self.batch_runs);
    }

    pub(crate) fn record_batch_failure(&self) {
        bump(&self.batch_failures);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
            alerts_raised: self.alerts_raised.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            batch_runs: self.batch_runs.load(Ordering::Relaxed),
            batch_failures: self.batch_failures.load(Ordering::Relaxed),
        }
    }
}
