//! Read-node metrics
//!
//! Plain atomic counters, shared via `Arc` between the replication session,
//! the fan-out engine and the interest server. Scrape with [`snapshot`].
//!
//! [`snapshot`]: ReadServerMetrics::snapshot

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the events the read node must surface
#[derive(Debug, Default)]
pub struct ReadServerMetrics {
    /// Upstream session state transitions
    pub session_transitions: AtomicU64,
    /// Notifications applied to the store (propagations produced)
    pub notifications_applied: AtomicU64,
    /// Notifications dropped (stale version or malformed frame)
    pub notifications_dropped: AtomicU64,
    /// Subscribers evicted for falling behind
    pub subscribers_evicted: AtomicU64,
    /// Synthetic deletes emitted by post-reconnect reconciliation
    pub reconcile_deletes: AtomicU64,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub session_transitions: u64,
    pub notifications_applied: u64,
    pub notifications_dropped: u64,
    pub subscribers_evicted: u64,
    pub reconcile_deletes: u64,
}

impl ReadServerMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a session state transition
    pub fn on_session_transition(&self) {
        self.session_transitions.fetch_add(1, Ordering::Relaxed);
    }

    /// Count applied propagations
    pub fn on_applied(&self, count: u64) {
        self.notifications_applied.fetch_add(count, Ordering::Relaxed);
    }

    /// Count a dropped notification
    pub fn on_dropped(&self) {
        self.notifications_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an evicted subscriber
    pub fn on_subscriber_evicted(&self) {
        self.subscribers_evicted.fetch_add(1, Ordering::Relaxed);
    }

    /// Count reconciliation deletes
    pub fn on_reconcile_deletes(&self, count: u64) {
        self.reconcile_deletes.fetch_add(count, Ordering::Relaxed);
    }

    /// Copy all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            session_transitions: self.session_transitions.load(Ordering::Relaxed),
            notifications_applied: self.notifications_applied.load(Ordering::Relaxed),
            notifications_dropped: self.notifications_dropped.load(Ordering::Relaxed),
            subscribers_evicted: self.subscribers_evicted.load(Ordering::Relaxed),
            reconcile_deletes: self.reconcile_deletes.load(Ordering::Relaxed),
        }
    }
}
