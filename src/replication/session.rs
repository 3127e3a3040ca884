//! Replication session state machine

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

use crate::error::{Error, Result};
use crate::fanout::FanoutEngine;
use crate::registry::{ChangeNotification, InstanceId, Interest};
use crate::stats::ReadServerMetrics;

use super::backoff::Backoff;

/// Replication session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No upstream connection
    Disconnected,
    /// Connection attempt in progress
    Connecting,
    /// Connected, buffering the initial snapshot until the sentinel
    Bootstrapping,
    /// Live, applying notifications as they arrive
    Streaming,
    /// Shutdown requested
    Closing,
    /// Shut down
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Bootstrapping => "bootstrapping",
            SessionState::Streaming => "streaming",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// One event from the upstream subscription
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// A change notification (including the snapshot sentinel)
    Notification(ChangeNotification),
    /// Upstream keep-alive
    Heartbeat,
}

/// One established upstream subscription stream
#[async_trait]
pub trait UpstreamChannel: Send {
    /// Next event from upstream
    ///
    /// Errors mean the channel is dead and the session must reconnect.
    async fn next_event(&mut self) -> Result<UpstreamEvent>;
}

/// Factory for upstream subscription channels
///
/// A trait seam so the session state machine is testable with scripted
/// channels and no real network.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Connect and subscribe with the given interest
    async fn connect(&self, interest: &Interest) -> Result<Box<dyn UpstreamChannel>>;
}

/// Replication session configuration
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// First reconnect delay
    pub initial_backoff: Duration,
    /// Reconnect delay cap
    pub max_backoff: Duration,
    /// Backoff growth factor
    pub backoff_factor: u32,
    /// Streaming this long resets the backoff schedule
    pub backoff_reset_after: Duration,
    /// Reconnect if upstream is silent (no data, no heartbeat) this long
    pub idle_timeout: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_factor: 2,
            backoff_reset_after: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

impl ReplicationConfig {
    /// Set the initial reconnect delay
    pub fn initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = delay;
        self
    }

    /// Set the reconnect delay cap
    pub fn max_backoff(mut self, delay: Duration) -> Self {
        self.max_backoff = delay;
        self
    }

    /// Set the sustained-streaming period that resets the backoff
    pub fn backoff_reset_after(mut self, period: Duration) -> Self {
        self.backoff_reset_after = period;
        self
    }

    /// Set the upstream idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

/// The upstream replication session
///
/// Owns the reconnect loop. Connection failures are retried indefinitely
/// with backoff and never surface past the session; the only errors
/// escaping [`run_until`] are fatal registry invariant violations.
///
/// [`run_until`]: ReplicationSession::run_until
pub struct ReplicationSession {
    connector: Arc<dyn UpstreamConnector>,
    engine: Arc<FanoutEngine>,
    config: ReplicationConfig,
    metrics: Arc<ReadServerMetrics>,
    state_tx: watch::Sender<SessionState>,
}

impl ReplicationSession {
    /// Create a session
    pub fn new(
        connector: Arc<dyn UpstreamConnector>,
        engine: Arc<FanoutEngine>,
        config: ReplicationConfig,
        metrics: Arc<ReadServerMetrics>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        Self {
            connector,
            engine,
            config,
            metrics,
            state_tx,
        }
    }

    /// Watch session state transitions
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Run the session until shutdown or a fatal error
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Replication session shutdown requested");
                self.transition(SessionState::Closing);
                Ok(())
            }
            result = self.run_loop() => result,
        };
        self.transition(SessionState::Closed);
        result
    }

    /// Run the session forever (fatal errors only)
    pub async fn run(&self) -> Result<()> {
        self.run_loop().await
    }

    async fn run_loop(&self) -> Result<()> {
        let mut backoff = Backoff::new(
            self.config.initial_backoff,
            self.config.max_backoff,
            self.config.backoff_factor,
        );
        loop {
            self.transition(SessionState::Connecting);
            match self.connector.connect(&Interest::All).await {
                Ok(channel) => match self.stream(channel, &mut backoff).await {
                    Err(e) if e.is_fatal() => {
                        tracing::error!(error = %e, "Replication session fatal error");
                        return Err(e);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Upstream session lost");
                    }
                    Ok(()) => unreachable!("stream loop exits only with an error"),
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Upstream connect failed");
                }
            }
            self.transition(SessionState::Disconnected);

            let delay = backoff.next_delay();
            tracing::debug!(delay_ms = delay.as_millis() as u64, "Reconnecting after backoff");
            sleep(delay).await;
        }
    }

    /// Drive one established channel until it dies
    async fn stream(
        &self,
        mut channel: Box<dyn UpstreamChannel>,
        backoff: &mut Backoff,
    ) -> Result<()> {
        self.transition(SessionState::Bootstrapping);

        let mut buffered: Vec<ChangeNotification> = Vec::new();
        let mut snapshot_ids: HashSet<InstanceId> = HashSet::new();
        let mut streaming_since: Option<Instant> = None;
        let mut backoff_was_reset = false;

        loop {
            let event = match timeout(self.config.idle_timeout, channel.next_event()).await {
                Err(_) => return Err(Error::Timeout("upstream idle timeout")),
                Ok(Err(e)) => return Err(e),
                Ok(Ok(event)) => event,
            };

            if let Some(since) = streaming_since {
                if !backoff_was_reset && since.elapsed() >= self.config.backoff_reset_after {
                    backoff.reset();
                    backoff_was_reset = true;
                }
            }

            match event {
                UpstreamEvent::Heartbeat => {}
                UpstreamEvent::Notification(ChangeNotification::BufferSentinel) => {
                    if streaming_since.is_none() {
                        self.finish_bootstrap(&snapshot_ids, std::mem::take(&mut buffered))
                            .await?;
                        streaming_since = Some(Instant::now());
                    }
                    // Sentinels while streaming carry no information.
                }
                UpstreamEvent::Notification(notification) => {
                    if streaming_since.is_none() {
                        if let Some(id) = notification.instance_id() {
                            snapshot_ids.insert(id.clone());
                        }
                        buffered.push(notification);
                    } else {
                        self.engine.apply(notification).await?;
                    }
                }
            }
        }
    }

    /// Reconcile against the snapshot id set, then drain the buffer
    ///
    /// Order matters: instances that vanished upstream while we were
    /// disconnected get their synthetic Delete before any buffered
    /// notification is applied, so subscribers never observe a revived
    /// stale record.
    async fn finish_bootstrap(
        &self,
        snapshot_ids: &HashSet<InstanceId>,
        buffered: Vec<ChangeNotification>,
    ) -> Result<()> {
        let deleted = self.engine.reconcile(snapshot_ids).await?;
        let count = buffered.len();
        for notification in buffered {
            self.engine.apply(notification).await?;
        }
        tracing::info!(
            snapshot = count,
            reconciled = deleted,
            "Bootstrap complete, streaming live"
        );
        self.transition(SessionState::Streaming);
        Ok(())
    }

    fn transition(&self, to: SessionState) {
        let from = *self.state_tx.borrow();
        if from == to {
            return;
        }
        self.state_tx.send_replace(to);
        self.metrics.on_session_transition();
        tracing::info!(from = %from, to = %to, "Replication session state change");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{HealthStatus, InstanceRecord};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn record(id: &str, app: &str, version: u64) -> InstanceRecord {
        InstanceRecord::new(id, app).version(version).status(HealthStatus::Up)
    }

    fn add(id: &str, version: u64) -> UpstreamEvent {
        UpstreamEvent::Notification(ChangeNotification::Add(record(id, "foo", version)))
    }

    fn sentinel() -> UpstreamEvent {
        UpstreamEvent::Notification(ChangeNotification::BufferSentinel)
    }

    /// What a scripted channel does once its events run out
    enum OnEmpty {
        /// Report the connection closed
        Close,
        /// Hang forever (channel stays healthy and silent)
        Hold,
        /// Hang until the test fires the notify, then report closed
        CloseOn(Arc<tokio::sync::Notify>),
    }

    /// Replays a scripted event list
    struct ScriptedChannel {
        events: VecDeque<UpstreamEvent>,
        on_empty: OnEmpty,
    }

    #[async_trait]
    impl UpstreamChannel for ScriptedChannel {
        async fn next_event(&mut self) -> Result<UpstreamEvent> {
            match self.events.pop_front() {
                Some(event) => Ok(event),
                None => match &self.on_empty {
                    OnEmpty::Close => Err(Error::ConnectionClosed),
                    OnEmpty::Hold => {
                        std::future::pending::<()>().await;
                        unreachable!()
                    }
                    OnEmpty::CloseOn(gate) => {
                        gate.notified().await;
                        Err(Error::ConnectionClosed)
                    }
                },
            }
        }
    }

    /// Hands out one scripted channel per connect call.
    struct ScriptedConnector {
        scripts: Mutex<VecDeque<(Vec<UpstreamEvent>, OnEmpty)>>,
        connects: AtomicUsize,
    }

    impl ScriptedConnector {
        fn new(scripts: Vec<(Vec<UpstreamEvent>, OnEmpty)>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into_iter().collect()),
                connects: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl UpstreamConnector for ScriptedConnector {
        async fn connect(&self, interest: &Interest) -> Result<Box<dyn UpstreamChannel>> {
            assert_eq!(*interest, Interest::All, "read nodes subscribe upstream with All");
            self.connects.fetch_add(1, Ordering::SeqCst);
            let script = self.scripts.lock().unwrap().pop_front();
            match script {
                Some((events, on_empty)) => Ok(Box::new(ScriptedChannel {
                    events: events.into_iter().collect(),
                    on_empty,
                })),
                None => {
                    // No more scripts: keep the session parked in Connecting.
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    fn fast_config() -> ReplicationConfig {
        ReplicationConfig::default()
            .initial_backoff(Duration::from_millis(1))
            .max_backoff(Duration::from_millis(5))
            .idle_timeout(Duration::from_secs(5))
    }

    fn session(
        connector: Arc<ScriptedConnector>,
        config: ReplicationConfig,
    ) -> (Arc<ReplicationSession>, Arc<FanoutEngine>) {
        let metrics = Arc::new(ReadServerMetrics::new());
        let engine = Arc::new(FanoutEngine::new(metrics.clone()));
        let session = Arc::new(ReplicationSession::new(
            connector,
            engine.clone(),
            config,
            metrics,
        ));
        (session, engine)
    }

    /// Poll until the session is streaming on its `nth` connection.
    ///
    /// Watch receivers coalesce fast transitions, so waiting on the connect
    /// counter plus the current state is the race-free way to observe "the
    /// Nth bootstrap completed".
    async fn wait_for_streaming(
        connector: &ScriptedConnector,
        state: &watch::Receiver<SessionState>,
        nth: usize,
    ) {
        timeout(Duration::from_secs(5), async {
            loop {
                if connector.connects.load(Ordering::SeqCst) >= nth
                    && *state.borrow() == SessionState::Streaming
                {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("never streaming on connection {}", nth));
    }

    #[tokio::test]
    async fn test_bootstrap_buffers_until_sentinel() {
        let connector = Arc::new(ScriptedConnector::new(vec![(
            vec![add("a", 1), add("b", 1), sentinel()],
            OnEmpty::Hold,
        )]));
        let (session, engine) = session(connector.clone(), fast_config());

        let state = session.state();
        let runner = {
            let session = session.clone();
            tokio::spawn(async move { session.run().await })
        };

        wait_for_streaming(&connector, &state, 1).await;
        assert_eq!(engine.record_count().await, 2);
        runner.abort();
    }

    #[tokio::test]
    async fn test_reconnect_reconciles_vanished_instance() {
        // X delivered, disconnect, new snapshot without X.
        let gate = Arc::new(tokio::sync::Notify::new());
        let connector = Arc::new(ScriptedConnector::new(vec![
            (vec![add("x", 1), sentinel()], OnEmpty::CloseOn(gate.clone())),
            (vec![add("y", 1), sentinel()], OnEmpty::Hold),
        ]));
        let (session, engine) = session(connector.clone(), fast_config());

        let state = session.state();
        let runner = {
            let session = session.clone();
            tokio::spawn(async move { session.run().await })
        };

        wait_for_streaming(&connector, &state, 1).await;
        let mut sub = engine.subscribe(Interest::All).await;
        assert_eq!(sub.snapshot().len(), 1);

        // Drop the first channel; the session re-bootstraps against a
        // snapshot that no longer contains X.
        gate.notify_one();

        match timeout(Duration::from_secs(5), sub.recv()).await.unwrap().unwrap() {
            ChangeNotification::Delete(rec) => assert_eq!(rec.id.as_str(), "x"),
            other => panic!("expected synthetic delete first, got {:?}", other),
        }
        match sub.recv().await.unwrap() {
            ChangeNotification::Add(rec) => assert_eq!(rec.id.as_str(), "y"),
            other => panic!("expected add, got {:?}", other),
        }
        assert_eq!(engine.record_count().await, 1);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        runner.abort();
    }

    #[tokio::test]
    async fn test_rebootstrap_is_replay_safe() {
        // The same snapshot delivered twice must not re-propagate records.
        let gate = Arc::new(tokio::sync::Notify::new());
        let connector = Arc::new(ScriptedConnector::new(vec![
            (vec![add("a", 1), sentinel()], OnEmpty::CloseOn(gate.clone())),
            (vec![add("a", 1), sentinel()], OnEmpty::Hold),
        ]));
        let (session, engine) = session(connector.clone(), fast_config());

        let state = session.state();
        let runner = {
            let session = session.clone();
            tokio::spawn(async move { session.run().await })
        };

        wait_for_streaming(&connector, &state, 1).await;
        let mut sub = engine.subscribe(Interest::All).await;
        gate.notify_one();
        wait_for_streaming(&connector, &state, 2).await;

        assert!(sub.try_recv().is_none(), "identical snapshot must be silent");
        assert_eq!(engine.record_count().await, 1);
        runner.abort();
    }

    #[tokio::test]
    async fn test_idle_timeout_forces_reconnect() {
        let connector = Arc::new(ScriptedConnector::new(vec![
            // Sentinel then silence: the idle timeout must kick in.
            (vec![sentinel()], OnEmpty::Hold),
            (vec![sentinel()], OnEmpty::Hold),
        ]));
        let config = fast_config().idle_timeout(Duration::from_millis(20));
        let (session, _engine) = session(connector.clone(), config);

        let state = session.state();
        let runner = {
            let session = session.clone();
            tokio::spawn(async move { session.run().await })
        };

        wait_for_streaming(&connector, &state, 2).await;
        runner.abort();
    }

    #[tokio::test]
    async fn test_heartbeats_keep_session_alive() {
        let connector = Arc::new(ScriptedConnector::new(vec![(
            vec![
                sentinel(),
                UpstreamEvent::Heartbeat,
                UpstreamEvent::Heartbeat,
                add("a", 1),
            ],
            OnEmpty::Hold,
        )]));
        let (session, engine) = session(connector.clone(), fast_config());

        let runner = {
            let session = session.clone();
            tokio::spawn(async move { session.run().await })
        };

        timeout(Duration::from_secs(5), async {
            while engine.record_count().await != 1 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        runner.abort();
    }

    #[tokio::test]
    async fn test_shutdown_reaches_closed() {
        let connector = Arc::new(ScriptedConnector::new(vec![]));
        let (session, _engine) = session(connector, fast_config());

        let state = session.state();
        session.run_until(async {}).await.unwrap();
        assert_eq!(*state.borrow(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_connect_failures_retry_with_backoff() {
        // The first two channels die before bootstrapping completes; the
        // session must keep retrying rather than give up.
        let connector = Arc::new(ScriptedConnector::new(vec![
            (vec![], OnEmpty::Close),
            (vec![], OnEmpty::Close),
            (vec![sentinel()], OnEmpty::Hold),
        ]));
        let (session, _engine) = session(connector.clone(), fast_config());

        let state = session.state();
        let runner = {
            let session = session.clone();
            tokio::spawn(async move { session.run().await })
        };

        wait_for_streaming(&connector, &state, 3).await;
        runner.abort();
    }
}
