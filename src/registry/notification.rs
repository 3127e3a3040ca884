//! Change notifications
//!
//! Notifications are the only way registry state changes, both on the
//! upstream replication path and on the downstream fan-out path. The
//! `BufferSentinel` variant marks the end of an initial snapshot on the
//! wire; it never mutates the store.

use super::instance::{InstanceId, InstanceRecord};

/// A single registry change
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeNotification {
    /// A record appeared
    Add(InstanceRecord),
    /// A record changed; `old` is the previously visible state
    Modify {
        /// Record state before the change
        old: InstanceRecord,
        /// Record state after the change
        new: InstanceRecord,
    },
    /// A record disappeared
    Delete(InstanceRecord),
    /// End-of-initial-snapshot marker
    BufferSentinel,
}

impl ChangeNotification {
    /// The record this notification is about, if any
    ///
    /// For Modify this is the new state.
    pub fn record(&self) -> Option<&InstanceRecord> {
        match self {
            ChangeNotification::Add(rec) => Some(rec),
            ChangeNotification::Modify { new, .. } => Some(new),
            ChangeNotification::Delete(rec) => Some(rec),
            ChangeNotification::BufferSentinel => None,
        }
    }

    /// The instance id this notification is about, if any
    pub fn instance_id(&self) -> Option<&InstanceId> {
        self.record().map(|rec| &rec.id)
    }

    /// Whether this notification carries record data (not a sentinel)
    pub fn is_data(&self) -> bool {
        !matches!(self, ChangeNotification::BufferSentinel)
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeNotification::Add(_) => "add",
            ChangeNotification::Modify { .. } => "modify",
            ChangeNotification::Delete(_) => "delete",
            ChangeNotification::BufferSentinel => "sentinel",
        }
    }
}
