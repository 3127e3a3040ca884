//! Service-discovery read node library
//!
//! A read node pulls the full service registry from an upstream write
//! cluster over a streaming subscription, keeps a merged local view of it,
//! and re-serves filtered, incrementally-updated subscriptions to many
//! downstream clients over persistent TCP connections.
//!
//! # Architecture
//!
//! ```text
//!   upstream write cluster
//!           │
//!           ▼
//!   [ReplicationSession]  ──── reconnect/backoff, bootstrap, reconcile
//!           │
//!           ▼ apply()
//!   ┌─────────────────────────┐
//!   │      FanoutEngine       │
//!   │  RegistryStore + Index  │◄── [SelfRegistrationFeed]
//!   │  subscriber table       │
//!   └───────────┬─────────────┘
//!               │ try_send (bounded, evict on overflow)
//!     ┌─────────┼─────────┐
//!     ▼         ▼         ▼
//! [Subscriber] [Subscriber] [Subscriber]
//!     ▲         ▲         ▲
//!     └──── [InterestServer] snapshot-then-live over TCP
//! ```
//!
//! Every store mutation flows through [`FanoutEngine::apply`], which is the
//! single mutation path: the upstream replication session and the local
//! self-registration feed are serialized against each other by its lock,
//! and every propagated notification reaches each matching subscriber in
//! apply order.
//!
//! The node speaks the same subscription wire contract as client (to the
//! upstream cluster) and as server (to downstream clients): a `Subscribe`
//! frame carrying an [`Interest`], answered by a snapshot of matching
//! records followed by a `BufferSentinel` and then live notifications.
//!
//! [`FanoutEngine::apply`]: fanout::FanoutEngine::apply
//! [`Interest`]: registry::Interest

pub mod client;
pub mod error;
pub mod fanout;
pub mod registry;
pub mod replication;
pub mod selfreg;
pub mod server;
pub mod stats;
pub mod wire;

pub use client::{ClientConfig, TcpInterestClient, TcpRegistrationClient};
pub use error::{Error, Result};
pub use fanout::{FanoutConfig, FanoutEngine, Subscription};
pub use registry::{ChangeNotification, HealthStatus, InstanceId, InstanceRecord, Interest};
pub use replication::{ReplicationConfig, ReplicationSession, SessionState};
pub use selfreg::SelfRegistrationFeed;
pub use server::{InterestServer, ServerConfig};
pub use stats::ReadServerMetrics;
