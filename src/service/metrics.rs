//! Counters for the command channel.

use std::sync::atomic::{AtomicU64, Ordering};

use super::RejectReason;

/// Command channel counters, shared with whoever wants to read them.
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    received: AtomicU64,
    accepted: AtomicU64,
    rejected_auth: AtomicU64,
    rejected_replay: AtomicU64,
    rejected_malformed: AtomicU64,
    busy: AtomicU64,
    completed: AtomicU64,
    timed_out: AtomicU64,
    late_discarded: AtomicU64,
    abandoned: AtomicU64,
    published: AtomicU64,
    publish_failed: AtomicU64,
}

/// Point-in-time copy of [`ServiceMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub accepted: u64,
    pub rejected_auth: u64,
    pub rejected_replay: u64,
    pub rejected_malformed: u64,
    pub busy: u64,
    pub completed: u64,
    pub timed_out: u64,
    pub late_discarded: u64,
    pub abandoned: u64,
    pub published: u64,
    pub publish_failed: u64,
}

impl MetricsSnapshot {
    pub fn rejected(&self) -> u64 {
        self.rejected_auth + self.rejected_replay + self.rejected_malformed
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        bump(&self.received);
    }

    pub fn record_accepted(&self) {
        bump(&self.accepted);
    }

    pub fn record_rejection(&self, reason: RejectReason) {
        match reason {
            RejectReason::Auth => bump(&self.rejected_auth),
            RejectReason::Replay => bump(&self.rejected_replay),
            RejectReason::Malformed => bump(&self.rejected_malformed),
        }
    }

    pub fn record_busy(&self) {
        bump(&self.busy);
    }

    pub fn record_completed(&self) {
        bump(&self.completed);
    }

    pub fn record_timed_out(&self) {
        bump(&self.timed_out);
    }

    pub fn record_late(&self) {
        bump(&self.late_discarded);
    }

    pub fn record_abandoned(&self) {
        bump(&self.abandoned);
    }

    pub fn record_publish(&self, success: bool) {
        if success {
            bump(&self.published);
        } else {
            bump(&self.publish_failed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            received: load(&self.received),
            accepted: load(&self.accepted),
            rejected_auth: load(&self.rejected_auth),
            rejected_replay: load(&self.rejected_replay),
            rejected_malformed: load(&self.rejected_malformed),
            busy: load(&self.busy),
            completed: load(&self.completed),
            timed_out: load(&self.timed_out),
            late_discarded: load(&self.late_discarded),
            abandoned: load(&self.abandoned),
            published: load(&self.published),
            publish_failed: load(&self.publish_failed),
        }
    }
}
