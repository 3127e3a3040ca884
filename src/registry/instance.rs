//! Instance identity and record types

use std::collections::HashMap;
use std::net::SocketAddr;

/// Unique identifier of a registered service instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(String);

impl InstanceId {
    /// Create a new instance id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Health status of a service instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Instance is serving traffic
    Up,
    /// Instance is known but not serving
    Down,
    /// Instance is starting up
    Starting,
    /// Instance was taken out of rotation deliberately
    OutOfService,
    /// Status not reported
    Unknown,
}

impl HealthStatus {
    /// Whether the instance should be considered routable
    pub fn is_up(&self) -> bool {
        matches!(self, HealthStatus::Up)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Up => "UP",
            HealthStatus::Down => "DOWN",
            HealthStatus::Starting => "STARTING",
            HealthStatus::OutOfService => "OUT_OF_SERVICE",
            HealthStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// The registered state of one service instance
///
/// Cheap enough to clone for fan-out; the version is assigned at the source
/// of truth and only ever increases for a given id within the store.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRecord {
    /// Unique instance identity
    pub id: InstanceId,
    /// Application this instance belongs to
    pub app: String,
    /// Virtual IP address (cluster-level alias), if any
    pub vip: Option<String>,
    /// Network addresses the instance is reachable at
    pub addresses: Vec<SocketAddr>,
    /// Current health status
    pub status: HealthStatus,
    /// Monotonically increasing version assigned at the source of truth
    pub version: u64,
    /// Free-form metadata
    pub metadata: HashMap<String, String>,
}

impl InstanceRecord {
    /// Create a record with the given identity and application name
    pub fn new(id: impl Into<InstanceId>, app: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            app: app.into(),
            vip: None,
            addresses: Vec::new(),
            status: HealthStatus::Unknown,
            version: 0,
            metadata: HashMap::new(),
        }
    }

    /// Set the virtual IP address
    pub fn vip(mut self, vip: impl Into<String>) -> Self {
        self.vip = Some(vip.into());
        self
    }

    /// Add a network address
    pub fn address(mut self, addr: SocketAddr) -> Self {
        self.addresses.push(addr);
        self
    }

    /// Set the health status
    pub fn status(mut self, status: HealthStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the version
    pub fn version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Add a metadata entry
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl From<String> for InstanceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
