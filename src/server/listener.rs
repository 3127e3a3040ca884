//! Interest server listener
//!
//! Handles the TCP accept loop and spawns one task per subscriber
//! connection. Each connection gets the snapshot-then-live framing: the
//! records matching its interest, a `BufferSentinel`, then every matching
//! notification in store order until disconnect or eviction.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::{interval, timeout};

use crate::error::{Error, Result};
use crate::fanout::{FanoutEngine, Subscription};
use crate::registry::ChangeNotification;
use crate::wire::{read_frame, write_frame, Frame};

use super::config::ServerConfig;

/// Downstream interest server
pub struct InterestServer {
    config: ServerConfig,
    engine: Arc<FanoutEngine>,
    next_session_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl InterestServer {
    /// Create a server serving subscriptions from the given engine
    pub fn new(config: ServerConfig, engine: Arc<FanoutEngine>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            engine,
            next_session_id: AtomicU64::new(1),
            connection_semaphore,
        }
    }

    /// Get a reference to the fan-out engine
    pub fn engine(&self) -> &Arc<FanoutEngine> {
        &self.engine
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Run the server
    ///
    /// This method blocks until the server is shut down.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Interest server listening");
        self.serve_with(listener).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: std::future::Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Interest server listening");

        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.serve_with(listener) => result,
        }
    }

    /// Accept subscribers from an already-bound listener
    ///
    /// Useful when the caller needs the ephemeral port before serving.
    pub async fn serve_with(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    async fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = if let Some(ref sem) = self.connection_semaphore {
            match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            }
        } else {
            None
        };

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            session_id = session_id,
            peer = %peer_addr,
            "New subscriber connection"
        );

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        let config = self.config.clone();
        let engine = Arc::clone(&self.engine);

        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = Self::serve_subscriber(session_id, socket, config, engine).await {
                tracing::debug!(
                    session_id = session_id,
                    error = %e,
                    "Subscriber session error"
                );
            }
            tracing::debug!(session_id = session_id, "Subscriber connection closed");
        });
    }

    /// One subscriber session: handshake, snapshot, live stream
    async fn serve_subscriber(
        session_id: u64,
        socket: TcpStream,
        config: ServerConfig,
        engine: Arc<FanoutEngine>,
    ) -> Result<()> {
        let (mut reader, writer) = socket.into_split();

        let frame = timeout(config.handshake_timeout, read_frame(&mut reader))
            .await
            .map_err(|_| Error::Timeout("subscribe handshake"))??;
        let interest = match frame {
            Frame::Subscribe(interest) => interest,
            _ => return Err(Error::Protocol("expected subscribe frame")),
        };

        tracing::info!(session_id = session_id, interest = %interest, "Subscriber handshake");

        let subscription = engine.subscribe(interest).await;
        let subscription_id = subscription.id();
        let result =
            Self::stream_to_subscriber(session_id, subscription, reader, writer, &config).await;

        // Idempotent: eviction may already have removed the entry.
        engine.unsubscribe(subscription_id).await;
        result
    }

    async fn stream_to_subscriber(
        session_id: u64,
        mut subscription: Subscription,
        reader: OwnedReadHalf,
        mut writer: OwnedWriteHalf,
        config: &ServerConfig,
    ) -> Result<()> {
        // Snapshot first, then the sentinel that marks live streaming.
        for record in subscription.take_snapshot() {
            send_frame(
                &mut writer,
                &Frame::Notification(ChangeNotification::Add(record)),
                config.idle_timeout,
            )
            .await?;
        }
        send_frame(
            &mut writer,
            &Frame::Notification(ChangeNotification::BufferSentinel),
            config.idle_timeout,
        )
        .await?;

        // The read half only carries subscriber heartbeats; a dedicated
        // task watches it so a mid-frame read is never cancelled by the
        // select below.
        let mut read_task = tokio::spawn(watch_subscriber(reader));

        let mut ticker = interval(config.heartbeat_interval);
        ticker.tick().await; // first tick completes immediately

        let result = loop {
            tokio::select! {
                notification = subscription.recv() => match notification {
                    Some(notification) => {
                        send_frame(&mut writer, &Frame::Notification(notification), config.idle_timeout).await?;
                    }
                    None => {
                        // Evicted for falling behind (or unsubscribed);
                        // closing the connection tells the client to
                        // resubscribe for a fresh snapshot.
                        tracing::warn!(session_id = session_id, "Subscriber channel closed, dropping connection");
                        break Ok(());
                    }
                },
                _ = ticker.tick() => {
                    send_frame(&mut writer, &Frame::Heartbeat, config.idle_timeout).await?;
                }
                joined = &mut read_task => {
                    break joined.unwrap_or(Err(Error::ConnectionClosed));
                }
            }
        };
        read_task.abort();
        result
    }
}

/// Write one frame, bounded by the idle timeout
///
/// A subscriber that stops reading stalls the socket; the deadline
/// reclaims the connection (and its permit) instead of blocking forever.
async fn send_frame(
    writer: &mut OwnedWriteHalf,
    frame: &Frame,
    limit: Duration,
) -> Result<()> {
    match timeout(limit, write_frame(writer, frame)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout("subscriber write")),
    }
}

/// Drain the subscriber's read half until it disconnects
async fn watch_subscriber(mut reader: OwnedReadHalf) -> Result<()> {
    loop {
        match read_frame(&mut reader).await {
            Ok(Frame::Heartbeat) => {}
            Ok(_) => return Err(Error::Protocol("unexpected frame from subscriber")),
            Err(Error::Frame(e)) => {
                tracing::debug!(error = %e, "Ignoring malformed subscriber frame");
            }
            Err(Error::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}
