//! In-process runtime counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// System-wide counters
#[derive(Debug, Default)]
pub struct SystemMetrics {
    pub actors_created: AtomicU64,
    pub actors_stopped: AtomicU64,
    pub messages_processed: AtomicU64,
    pub total_processing_time_ns: AtomicU64,
    pub processing_failures: AtomicU64,
    pub init_failures: AtomicU64,
    pub actor_restarts: AtomicU64,
    pub high_priority_messages: AtomicU64,
    pub normal_priority_messages: AtomicU64,
    pub dropped_messages: AtomicU64,
}

impl SystemMetrics {
    pub fn record_message_handled(&self, duration: Duration) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        self.total_processing_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_enqueued(&self, high_priority: bool) {
        if high_priority {
            self.high_priority_messages.fetch_add(1, Ordering::Relaxed);
        } else {
            self.normal_priority_messages.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_processing_failure(&self) {
        self.processing_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_init_failure(&self) {
        self.init_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restart(&self) {
        self.actor_restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn avg_processing_time_ns(&self) -> f64 {
        let count = self.messages_processed.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total = self.total_processing_time_ns.load(Ordering::Relaxed);
        total as f64 / count as f64
    }

    /// Snapshot of all counters
    pub fn stats(&self) -> SystemStats {
        SystemStats {
            actors_created: self.actors_created.load(Ordering::Relaxed),
            actors_stopped: self.actors_stopped.load(Ordering::Relaxed),
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            avg_processing_time_ns: self.avg_processing_time_ns(),
            processing_failures: self.processing_failures.load(Ordering::Relaxed),
            init_failures: self.init_failures.load(Ordering::Relaxed),
            actor_restarts: self.actor_restarts.load(Ordering::Relaxed),
            high_priority_messages: self.high_priority_messages.load(Ordering::Relaxed),
            normal_priority_messages: self.normal_priority_messages.load(Ordering::Relaxed),
            dropped_messages: self.dropped_messages.load(Ordering::Relaxed),
        }
    }
}

/// Counter snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct SystemStats {
    pub actors_created: u64,
    pub actors_stopped: u64,
    pub messages_processed: u64,
    pub avg_processing_time_ns: f64,
    pub processing_failures: u64,
    pub init_failures: u64,
    pub actor_restarts: u64,
    pub high_priority_messages: u64,
    pub normal_priority_messages: u64,
    pub dropped_messages: u64,
}
