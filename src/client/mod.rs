//! Upstream TCP clients
//!
//! The interest client is the [`UpstreamConnector`] the replication session
//! uses against a real upstream cluster: connect, send a `Subscribe` frame,
//! then stream notification frames back, keeping the connection alive with
//! heartbeats. The registration client carries the self-registration feed's
//! best-effort writes.
//!
//! [`UpstreamConnector`]: crate::replication::UpstreamConnector

pub mod config;
pub mod connector;

pub use config::ClientConfig;
pub use connector::{TcpInterestClient, TcpRegistrationClient};
