//! Fan-out engine implementation

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::registry::{
    ChangeNotification, InstanceId, InstanceRecord, Interest, RegistryStore,
};
use crate::stats::ReadServerMetrics;

use super::subscription::Subscription;

/// Fan-out engine configuration
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Per-subscriber delivery queue capacity
    ///
    /// A subscriber whose queue would overflow is evicted.
    pub queue_capacity: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
        }
    }
}

impl FanoutConfig {
    /// Set the per-subscriber queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

struct SubscriberEntry {
    interest: Interest,
    tx: mpsc::Sender<ChangeNotification>,
}

struct Inner {
    store: RegistryStore,
    subscribers: HashMap<u64, SubscriberEntry>,
}

/// Registry store plus active-subscriber table behind one lock
///
/// See the [module docs](self) for the consistency and backpressure model.
/// No await happens while the lock is held: propagation is computed and
/// delivered with non-blocking sends, then the lock is released.
pub struct FanoutEngine {
    inner: RwLock<Inner>,
    config: FanoutConfig,
    next_subscription_id: AtomicU64,
    metrics: Arc<ReadServerMetrics>,
}

impl FanoutEngine {
    /// Create an engine with default configuration
    pub fn new(metrics: Arc<ReadServerMetrics>) -> Self {
        Self::with_config(FanoutConfig::default(), metrics)
    }

    /// Create an engine with custom configuration
    pub fn with_config(config: FanoutConfig, metrics: Arc<ReadServerMetrics>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                store: RegistryStore::new(),
                subscribers: HashMap::new(),
            }),
            config,
            next_subscription_id: AtomicU64::new(1),
            metrics,
        }
    }

    /// Apply a change notification and fan out its propagations
    ///
    /// Returns the number of propagations produced (zero for stale or
    /// replayed notifications). Errors are registry invariant violations
    /// and fatal to the caller.
    pub async fn apply(&self, notification: ChangeNotification) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let propagations = inner.store.apply(notification)?;
        if propagations.is_empty() {
            return Ok(0);
        }
        self.metrics.on_applied(propagations.len() as u64);
        let count = propagations.len();
        for propagation in propagations {
            Self::deliver(&mut inner, propagation, &self.metrics);
        }
        Ok(count)
    }

    /// Remove every stored record absent from `live_ids`, fanning out the
    /// synthetic Deletes
    ///
    /// Called by the replication session at the end of a reconnect
    /// bootstrap. Returns the number of deletes emitted.
    pub async fn reconcile(&self, live_ids: &HashSet<InstanceId>) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let deletes = inner.store.reconcile(live_ids)?;
        if deletes.is_empty() {
            return Ok(0);
        }
        let count = deletes.len();
        self.metrics.on_reconcile_deletes(count as u64);
        tracing::info!(deletes = count, "Reconciliation removed vanished instances");
        for delete in deletes {
            Self::deliver(&mut inner, delete, &self.metrics);
        }
        Ok(count)
    }

    /// Open a subscription for the given interest
    ///
    /// The subscriber is registered and its snapshot taken under the same
    /// write guard, so every later mutation either is in the snapshot or
    /// arrives on the live channel, never both and never neither.
    pub async fn subscribe(&self, interest: Interest) -> Subscription {
        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.queue_capacity);

        let mut inner = self.inner.write().await;
        let snapshot = inner.store.snapshot(&interest);
        inner.subscribers.insert(
            id,
            SubscriberEntry {
                interest: interest.clone(),
                tx,
            },
        );

        tracing::info!(
            subscription = id,
            interest = %interest,
            snapshot_len = snapshot.len(),
            subscribers = inner.subscribers.len(),
            "Subscriber added"
        );

        Subscription::new(id, interest, snapshot, rx)
    }

    /// Close a subscription
    ///
    /// Idempotent; delivery to this subscriber stops immediately and no
    /// other subscriber is affected.
    pub async fn unsubscribe(&self, id: u64) {
        let mut inner = self.inner.write().await;
        if inner.subscribers.remove(&id).is_some() {
            tracing::debug!(
                subscription = id,
                subscribers = inner.subscribers.len(),
                "Subscriber removed"
            );
        }
    }

    /// Snapshot of records matching the interest, without subscribing
    pub async fn snapshot(&self, interest: &Interest) -> Vec<InstanceRecord> {
        self.inner.read().await.store.snapshot(interest)
    }

    /// Number of active subscriptions
    pub async fn subscriber_count(&self) -> usize {
        self.inner.read().await.subscribers.len()
    }

    /// Number of stored records
    pub async fn record_count(&self) -> usize {
        self.inner.read().await.store.len()
    }

    /// All stored instance ids
    pub async fn instance_ids(&self) -> HashSet<InstanceId> {
        self.inner.read().await.store.instance_ids()
    }

    fn deliver(inner: &mut Inner, propagation: ChangeNotification, metrics: &ReadServerMetrics) {
        let record = match propagation.record() {
            Some(record) => record,
            None => return,
        };

        let mut evicted: Vec<u64> = Vec::new();
        for (&id, entry) in inner.subscribers.iter() {
            if !entry.interest.matches(record) {
                continue;
            }
            match entry.tx.try_send(propagation.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    metrics.on_subscriber_evicted();
                    tracing::warn!(
                        subscription = id,
                        interest = %entry.interest,
                        "Evicting slow subscriber: delivery queue full"
                    );
                    evicted.push(id);
                }
                Err(TrySendError::Closed(_)) => {
                    // Receiver already dropped; reap quietly.
                    evicted.push(id);
                }
            }
        }
        for id in evicted {
            inner.subscribers.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HealthStatus;

    fn engine() -> FanoutEngine {
        FanoutEngine::new(Arc::new(ReadServerMetrics::new()))
    }

    fn record(id: &str, app: &str, version: u64) -> InstanceRecord {
        InstanceRecord::new(id, app).version(version).status(HealthStatus::Up)
    }

    #[tokio::test]
    async fn test_snapshot_then_live_lifecycle() {
        // Full lifecycle: Add, subscribe(All), Modify, Delete.
        let engine = engine();
        engine
            .apply(ChangeNotification::Add(record("a", "foo", 1)))
            .await
            .unwrap();

        let mut sub = engine.subscribe(Interest::All).await;
        assert_eq!(sub.snapshot().len(), 1);
        assert_eq!(sub.snapshot()[0].id.as_str(), "a");

        engine
            .apply(ChangeNotification::Add(
                record("a", "foo", 2).status(HealthStatus::Down),
            ))
            .await
            .unwrap();
        match sub.recv().await.unwrap() {
            ChangeNotification::Modify { old, new } => {
                assert_eq!(old.version, 1);
                assert_eq!(new.version, 2);
                assert_eq!(new.status, HealthStatus::Down);
            }
            other => panic!("expected modify, got {:?}", other),
        }

        engine
            .apply(ChangeNotification::Delete(record("a", "foo", 2)))
            .await
            .unwrap();
        assert!(matches!(
            sub.recv().await.unwrap(),
            ChangeNotification::Delete(_)
        ));
        assert_eq!(engine.record_count().await, 0);
    }

    #[tokio::test]
    async fn test_filtered_delivery() {
        // An app filter sees only its own application.
        let engine = engine();
        let mut sub = engine.subscribe(Interest::Application("foo".into())).await;

        engine
            .apply(ChangeNotification::Add(record("b", "bar", 1)))
            .await
            .unwrap();
        assert!(sub.try_recv().is_none());

        engine
            .apply(ChangeNotification::Add(record("c", "foo", 1)))
            .await
            .unwrap();
        match sub.recv().await.unwrap() {
            ChangeNotification::Add(rec) => assert_eq!(rec.id.as_str(), "c"),
            other => panic!("expected add, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stale_apply_propagates_nothing() {
        let engine = engine();
        engine
            .apply(ChangeNotification::Add(record("a", "foo", 5)))
            .await
            .unwrap();

        let mut sub = engine.subscribe(Interest::All).await;
        let count = engine
            .apply(ChangeNotification::Add(record("a", "foo", 5)))
            .await
            .unwrap();

        assert_eq!(count, 0);
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_per_id_order_preserved() {
        let engine = engine();
        let mut sub = engine.subscribe(Interest::All).await;

        for version in 1..=5u64 {
            engine
                .apply(ChangeNotification::Add(record("a", "foo", version)))
                .await
                .unwrap();
        }

        let mut last = 0;
        for _ in 0..5 {
            let version = sub.recv().await.unwrap().record().unwrap().version;
            assert!(version > last, "order regressed: {} after {}", version, last);
            last = version;
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_evicted_others_unaffected() {
        let metrics = Arc::new(ReadServerMetrics::new());
        let engine =
            FanoutEngine::with_config(FanoutConfig::default().queue_capacity(2), metrics.clone());

        let mut slow = engine.subscribe(Interest::All).await;
        let mut ok = engine.subscribe(Interest::All).await;
        assert_eq!(engine.subscriber_count().await, 2);

        // Drain `ok` after each apply; never drain `slow`. The third apply
        // overflows slow's queue of 2 and evicts it.
        for i in 0..3 {
            engine
                .apply(ChangeNotification::Add(record(&format!("i-{}", i), "foo", 1)))
                .await
                .unwrap();
            assert!(ok.recv().await.is_some());
        }

        assert_eq!(engine.subscriber_count().await, 1);
        assert_eq!(metrics.snapshot().subscribers_evicted, 1);

        // The evicted subscriber drains what was buffered, then sees the
        // channel closed.
        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_some());
        assert!(slow.recv().await.is_none());

        // Survivor keeps receiving.
        engine
            .apply(ChangeNotification::Add(record("i-9", "foo", 1)))
            .await
            .unwrap();
        assert!(ok.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent_and_stops_delivery() {
        let engine = engine();
        let mut sub = engine.subscribe(Interest::All).await;
        let id = sub.id();

        engine.unsubscribe(id).await;
        engine.unsubscribe(id).await;
        assert_eq!(engine.subscriber_count().await, 0);

        engine
            .apply(ChangeNotification::Add(record("a", "foo", 1)))
            .await
            .unwrap();
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_reconcile_fans_out_synthetic_deletes() {
        let engine = engine();
        engine
            .apply(ChangeNotification::Add(record("x", "foo", 1)))
            .await
            .unwrap();
        engine
            .apply(ChangeNotification::Add(record("y", "foo", 1)))
            .await
            .unwrap();

        let mut sub = engine.subscribe(Interest::All).await;
        let live: HashSet<InstanceId> = [InstanceId::new("y")].into_iter().collect();
        let deleted = engine.reconcile(&live).await.unwrap();

        assert_eq!(deleted, 1);
        match sub.recv().await.unwrap() {
            ChangeNotification::Delete(rec) => assert_eq!(rec.id.as_str(), "x"),
            other => panic!("expected delete, got {:?}", other),
        }
        assert!(sub.try_recv().is_none());
        assert_eq!(engine.record_count().await, 1);
    }

    #[tokio::test]
    async fn test_subscribe_snapshot_has_no_gap_with_live() {
        let engine = engine();
        engine
            .apply(ChangeNotification::Add(record("a", "foo", 1)))
            .await
            .unwrap();

        let mut sub = engine.subscribe(Interest::All).await;
        engine
            .apply(ChangeNotification::Add(record("b", "foo", 1)))
            .await
            .unwrap();

        // "a" only in the snapshot, "b" only on the live channel.
        assert_eq!(sub.snapshot().len(), 1);
        assert_eq!(sub.snapshot()[0].id.as_str(), "a");
        match sub.recv().await.unwrap() {
            ChangeNotification::Add(rec) => assert_eq!(rec.id.as_str(), "b"),
            other => panic!("expected add, got {:?}", other),
        }
    }
}
