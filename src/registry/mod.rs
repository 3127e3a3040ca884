//! Instance registry: records, interests, store and index
//!
//! The registry is the authoritative in-memory table of known service
//! instances, keyed by instance id. All mutation flows through
//! [`RegistryStore::apply`] as [`ChangeNotification`]s; the store returns
//! the propagation set actually produced so callers can fan it out.
//!
//! # Ordering and versioning
//!
//! Each record carries a version assigned at the source of truth. The store
//! never lets a stored version regress: a Modify whose version is not
//! strictly greater than the stored one is dropped, which makes replayed
//! and out-of-order deliveries harmless. Ordering is only meaningful per
//! instance id; consumers must not assume any order across different ids.

pub mod error;
pub mod index;
pub mod instance;
pub mod interest;
pub mod notification;
pub mod store;

pub use error::RegistryError;
pub use index::InterestIndex;
pub use instance::{HealthStatus, InstanceId, InstanceRecord};
pub use interest::Interest;
pub use notification::ChangeNotification;
pub use store::RegistryStore;
