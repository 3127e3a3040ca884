//! Upstream client configuration

use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for upstream connections
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upstream interest endpoint to subscribe to
    pub upstream_addr: SocketAddr,

    /// Connect (including subscribe write) timeout
    pub connect_timeout: Duration,

    /// How often to send keep-alive heartbeats
    pub heartbeat_interval: Duration,

    /// Enable TCP_NODELAY
    pub tcp_nodelay: bool,
}

impl ClientConfig {
    /// Create a config for the given upstream address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            upstream_addr: addr,
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(10),
            tcp_nodelay: true,
        }
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the heartbeat interval
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}
