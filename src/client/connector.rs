//! TCP interest and registration clients

use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};

use crate::error::{Error, Result};
use crate::registry::{Interest, InstanceRecord};
use crate::replication::{UpstreamChannel, UpstreamConnector, UpstreamEvent};
use crate::selfreg::RegistrationClient;
use crate::stats::ReadServerMetrics;
use crate::wire::{read_frame, write_frame, Frame};

use super::config::ClientConfig;

/// Upstream interest subscription client over TCP
pub struct TcpInterestClient {
    config: ClientConfig,
    metrics: Arc<ReadServerMetrics>,
}

impl TcpInterestClient {
    /// Create a client
    pub fn new(config: ClientConfig, metrics: Arc<ReadServerMetrics>) -> Self {
        Self { config, metrics }
    }
}

#[async_trait]
impl UpstreamConnector for TcpInterestClient {
    async fn connect(&self, interest: &Interest) -> Result<Box<dyn UpstreamChannel>> {
        let stream = timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.upstream_addr),
        )
        .await
        .map_err(|_| Error::Timeout("upstream connect"))??;

        if self.config.tcp_nodelay {
            stream.set_nodelay(true)?;
        }

        let (reader, mut writer) = stream.into_split();
        write_frame(&mut writer, &Frame::Subscribe(interest.clone())).await?;

        tracing::info!(
            upstream = %self.config.upstream_addr,
            interest = %interest,
            "Subscribed upstream"
        );

        let heartbeat = spawn_heartbeat(writer, self.config.heartbeat_interval);
        Ok(Box::new(TcpInterestChannel {
            reader,
            heartbeat,
            metrics: self.metrics.clone(),
        }))
    }
}

fn spawn_heartbeat(
    mut writer: OwnedWriteHalf,
    period: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.tick().await; // the subscribe frame already proved liveness
        loop {
            ticker.tick().await;
            if write_frame(&mut writer, &Frame::Heartbeat).await.is_err() {
                return;
            }
        }
    })
}

/// One established upstream subscription stream over TCP
pub struct TcpInterestChannel {
    reader: OwnedReadHalf,
    heartbeat: JoinHandle<()>,
    metrics: Arc<ReadServerMetrics>,
}

impl Drop for TcpInterestChannel {
    fn drop(&mut self) {
        self.heartbeat.abort();
    }
}

#[async_trait]
impl UpstreamChannel for TcpInterestChannel {
    async fn next_event(&mut self) -> Result<UpstreamEvent> {
        loop {
            match read_frame(&mut self.reader).await {
                Ok(Frame::Notification(notification)) => {
                    return Ok(UpstreamEvent::Notification(notification))
                }
                Ok(Frame::Heartbeat) => return Ok(UpstreamEvent::Heartbeat),
                Ok(_) => return Err(Error::Protocol("unexpected frame on interest stream")),
                Err(Error::Frame(e)) => {
                    // Length-prefixed framing keeps the stream in sync, so a
                    // malformed payload costs only that notification.
                    self.metrics.on_dropped();
                    tracing::warn!(error = %e, "Dropping malformed upstream frame");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Best-effort registration client over TCP
///
/// Opens a short-lived connection per call; the self-registration feed
/// retries every cycle anyway, so there is nothing to keep alive.
pub struct TcpRegistrationClient {
    config: ClientConfig,
}

impl TcpRegistrationClient {
    /// Create a client for the given write-cluster registration endpoint
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    async fn send(&self, frame: &Frame) -> Result<()> {
        let mut stream = timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.upstream_addr),
        )
        .await
        .map_err(|_| Error::Timeout("registration connect"))??;
        write_frame(&mut stream, frame).await
    }
}

#[async_trait]
impl RegistrationClient for TcpRegistrationClient {
    async fn register(&self, record: &InstanceRecord) -> Result<()> {
        self.send(&Frame::Register(record.clone())).await
    }

    async fn unregister(&self, record: &InstanceRecord) -> Result<()> {
        self.send(&Frame::Unregister(record.clone())).await
    }
}
