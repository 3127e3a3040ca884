//! Self-registration feed
//!
//! Periodically (re)publishes this node's own instance record so other
//! nodes can discover it through the identical replication mechanism. The
//! record goes through the same [`FanoutEngine::apply`] ingestion path as
//! upstream notifications, with a freshly incremented version each cycle,
//! and is forwarded to the upstream write cluster best-effort.
//!
//! The node's identity fields (addresses, placement) come from whatever
//! resolved them at wiring time; this module treats the base record as an
//! opaque input.
//!
//! [`FanoutEngine::apply`]: crate::fanout::FanoutEngine::apply

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::interval;

use crate::error::Result;
use crate::fanout::FanoutEngine;
use crate::registry::{ChangeNotification, HealthStatus, InstanceRecord};

/// Client for the upstream write cluster's registration endpoint
///
/// Registration is best-effort: failures are logged, never fatal, and the
/// next cycle retries.
#[async_trait]
pub trait RegistrationClient: Send + Sync {
    /// Publish or refresh a registration
    async fn register(&self, record: &InstanceRecord) -> Result<()>;

    /// Withdraw a registration
    async fn unregister(&self, record: &InstanceRecord) -> Result<()>;
}

/// Periodic publisher of this node's own instance record
pub struct SelfRegistrationFeed {
    engine: Arc<FanoutEngine>,
    upstream: Option<Arc<dyn RegistrationClient>>,
    base: InstanceRecord,
    period: Duration,
    version: AtomicU64,
}

impl SelfRegistrationFeed {
    /// Create a feed publishing `base` every `period`
    pub fn new(engine: Arc<FanoutEngine>, base: InstanceRecord, period: Duration) -> Self {
        Self {
            engine,
            upstream: None,
            base,
            period,
            version: AtomicU64::new(0),
        }
    }

    /// Also forward registrations to the upstream write cluster
    pub fn with_upstream(mut self, client: Arc<dyn RegistrationClient>) -> Self {
        self.upstream = Some(client);
        self
    }

    /// Publish one registration cycle
    ///
    /// The first cycle propagates as an Add, later ones as Modifies; the
    /// version bump guarantees the store never drops the refresh as stale.
    pub async fn publish_once(&self) -> Result<()> {
        let record = self.fresh_record(HealthStatus::Up);
        self.engine
            .apply(ChangeNotification::Add(record.clone()))
            .await?;
        if let Some(ref upstream) = self.upstream {
            if let Err(e) = upstream.register(&record).await {
                tracing::warn!(instance = %record.id, error = %e, "Upstream self-registration failed");
            }
        }
        tracing::debug!(instance = %record.id, version = record.version, "Self-registration published");
        Ok(())
    }

    /// Run registration cycles until shutdown, then withdraw
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let mut ticker = interval(self.period);
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    self.deregister().await?;
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.publish_once().await?;
                }
            }
        }
    }

    /// Emit the terminal Delete, locally and (best-effort) upstream
    async fn deregister(&self) -> Result<()> {
        let record = self.fresh_record(HealthStatus::Down);
        self.engine
            .apply(ChangeNotification::Delete(record.clone()))
            .await?;
        if let Some(ref upstream) = self.upstream {
            if let Err(e) = upstream.unregister(&record).await {
                tracing::warn!(instance = %record.id, error = %e, "Upstream self-unregistration failed");
            }
        }
        tracing::info!(instance = %record.id, "Self-registration withdrawn");
        Ok(())
    }

    fn fresh_record(&self, status: HealthStatus) -> InstanceRecord {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let mut record = self.base.clone();
        record.version = version;
        record.status = status;
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{InstanceId, Interest};
    use crate::stats::ReadServerMetrics;
    use std::sync::Mutex;

    fn base_record() -> InstanceRecord {
        InstanceRecord::new("read-node-1", "discovery-read")
            .address("10.0.0.9:12103".parse().unwrap())
    }

    fn feed() -> (SelfRegistrationFeed, Arc<FanoutEngine>) {
        let engine = Arc::new(FanoutEngine::new(Arc::new(ReadServerMetrics::new())));
        let feed = SelfRegistrationFeed::new(
            engine.clone(),
            base_record(),
            Duration::from_millis(10),
        );
        (feed, engine)
    }

    #[derive(Default)]
    struct RecordingClient {
        registers: Mutex<Vec<u64>>,
        unregisters: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl RegistrationClient for RecordingClient {
        async fn register(&self, record: &InstanceRecord) -> Result<()> {
            self.registers.lock().unwrap().push(record.version);
            Ok(())
        }

        async fn unregister(&self, record: &InstanceRecord) -> Result<()> {
            self.unregisters.lock().unwrap().push(record.version);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_publish_increments_version() {
        let (feed, engine) = feed();
        feed.publish_once().await.unwrap();
        feed.publish_once().await.unwrap();

        let record = engine
            .snapshot(&Interest::All)
            .await
            .into_iter()
            .find(|r| r.id == InstanceId::new("read-node-1"))
            .unwrap();
        assert_eq!(record.version, 2);
        assert!(record.status.is_up());
    }

    #[tokio::test]
    async fn test_refresh_propagates_as_modify() {
        let (feed, engine) = feed();
        feed.publish_once().await.unwrap();

        let mut sub = engine.subscribe(Interest::All).await;
        feed.publish_once().await.unwrap();

        match sub.recv().await.unwrap() {
            ChangeNotification::Modify { old, new } => {
                assert_eq!(old.version, 1);
                assert_eq!(new.version, 2);
            }
            other => panic!("expected modify, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shutdown_emits_terminal_delete() {
        let (feed, engine) = feed();
        let mut sub = engine.subscribe(Interest::All).await;

        // First tick publishes immediately, then shutdown withdraws.
        feed.run_until(tokio::time::sleep(Duration::from_millis(5)))
            .await
            .unwrap();

        assert!(matches!(
            sub.recv().await.unwrap(),
            ChangeNotification::Add(_)
        ));
        let mut saw_delete = false;
        while let Some(notification) = sub.try_recv() {
            if matches!(notification, ChangeNotification::Delete(_)) {
                saw_delete = true;
            }
        }
        assert!(saw_delete, "terminal delete not observed");
        assert_eq!(engine.record_count().await, 0);
    }

    #[tokio::test]
    async fn test_upstream_forwarding_is_best_effort() {
        let engine = Arc::new(FanoutEngine::new(Arc::new(ReadServerMetrics::new())));
        let client = Arc::new(RecordingClient::default());
        let feed = SelfRegistrationFeed::new(engine, base_record(), Duration::from_millis(10))
            .with_upstream(client.clone());

        feed.publish_once().await.unwrap();
        feed.deregister().await.unwrap();

        assert_eq!(*client.registers.lock().unwrap(), vec![1]);
        assert_eq!(*client.unregisters.lock().unwrap(), vec![2]);
    }
}
