//! Subscription fan-out engine
//!
//! The engine owns the registry store and the table of active subscribers
//! behind one lock, making it the single mutation path: the upstream
//! replication session and the local self-registration feed both call
//! [`FanoutEngine::apply`], and subscribing registers the subscriber and
//! takes its snapshot under the same write guard, so the snapshot is
//! followed by live updates with no gap and no duplicate.
//!
//! # Backpressure
//!
//! Each subscriber gets a bounded queue and delivery uses `try_send`, so
//! the engine never awaits a slow consumer while holding the lock. A full
//! queue evicts that subscriber (its channel is dropped, which closes the
//! downstream connection and forces a resubscribe); everyone else keeps
//! receiving uninterrupted.

pub mod engine;
pub mod subscription;

pub use engine::{FanoutConfig, FanoutEngine};
pub use subscription::Subscription;
