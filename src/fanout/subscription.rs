//! Subscription handle

use tokio::sync::mpsc;

use crate::registry::{ChangeNotification, InstanceRecord, Interest};

/// One downstream consumer's view of the registry
///
/// Owns the initial snapshot and the live channel. The engine owns the
/// sending side; if this subscriber falls behind, the sender is dropped
/// and [`recv`] returns `None`, which the consumer must treat as
/// "resubscribe and accept a fresh snapshot", never as a permanent error.
///
/// [`recv`]: Subscription::recv
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    interest: Interest,
    snapshot: Vec<InstanceRecord>,
    rx: mpsc::Receiver<ChangeNotification>,
}

impl Subscription {
    pub(super) fn new(
        id: u64,
        interest: Interest,
        snapshot: Vec<InstanceRecord>,
        rx: mpsc::Receiver<ChangeNotification>,
    ) -> Self {
        Self {
            id,
            interest,
            snapshot,
            rx,
        }
    }

    /// Subscription id, used for [`unsubscribe`]
    ///
    /// [`unsubscribe`]: super::FanoutEngine::unsubscribe
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The interest this subscription filters on
    pub fn interest(&self) -> &Interest {
        &self.interest
    }

    /// Records matching the interest at subscription time, ordered by id
    pub fn snapshot(&self) -> &[InstanceRecord] {
        &self.snapshot
    }

    /// Take ownership of the snapshot
    pub fn take_snapshot(&mut self) -> Vec<InstanceRecord> {
        std::mem::take(&mut self.snapshot)
    }

    /// Receive the next live notification
    ///
    /// Returns `None` once the subscription is unsubscribed or evicted.
    pub async fn recv(&mut self) -> Option<ChangeNotification> {
        self.rx.recv().await
    }

    /// Non-blocking receive, for draining in tests
    pub fn try_recv(&mut self) -> Option<ChangeNotification> {
        self.rx.try_recv().ok()
    }
}
