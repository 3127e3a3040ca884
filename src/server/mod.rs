//! Downstream interest server
//!
//! Serves the same subscription contract the node consumes upstream: a
//! client connects, sends a `Subscribe` frame with its interest, and
//! receives the matching snapshot, a `BufferSentinel`, and then live
//! notifications until it disconnects or is evicted for falling behind.

pub mod config;
pub mod listener;

pub use config::ServerConfig;
pub use listener::InterestServer;
