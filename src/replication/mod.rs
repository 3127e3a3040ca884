//! Upstream replication session
//!
//! One logical subscription to the upstream write cluster, always with
//! `Interest::All` (downstream filtering is local, see the fan-out engine).
//! The session is an explicit state machine driven by a task loop:
//!
//! ```text
//! Disconnected → Connecting → Bootstrapping → Streaming
//!      ▲             │             │              │
//!      └─────────────┴─────────────┴──────────────┘
//!        transport/protocol error or idle timeout,
//!        then geometric backoff and reconnect
//! ```
//!
//! There is no incremental resume: a dropped connection may have lost
//! updates, so every reconnect re-bootstraps from a full snapshot and
//! reconciles the local store against it (synthetic Deletes for instances
//! that vanished while disconnected).

pub mod backoff;
pub mod session;

pub use backoff::Backoff;
pub use session::{
    ReplicationConfig, ReplicationSession, SessionState, UpstreamChannel, UpstreamConnector,
    UpstreamEvent,
};
