//! Instance record store
//!
//! The authoritative table of known instances plus its interest index.
//! The store is synchronous and single-owner; the fan-out engine wraps it
//! in a lock and is the only caller of its mutating methods in a running
//! node, which keeps index updates atomic with store mutations from every
//! reader's point of view.

use std::collections::{HashMap, HashSet};

use super::error::RegistryError;
use super::index::InterestIndex;
use super::instance::{InstanceId, InstanceRecord};
use super::interest::Interest;
use super::notification::ChangeNotification;

/// In-memory instance record store with interest index
#[derive(Debug, Default)]
pub struct RegistryStore {
    records: HashMap<InstanceId, InstanceRecord>,
    index: InterestIndex,
}

impl RegistryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a change notification
    ///
    /// Returns the propagation set actually produced. Stale or replayed
    /// notifications produce nothing:
    /// - Add for a known id is treated as Modify,
    /// - Modify for an unknown id is dropped,
    /// - Modify whose version is not greater than the stored one is dropped,
    /// - Delete for an unknown id is a no-op,
    /// - `BufferSentinel` never mutates the store.
    pub fn apply(
        &mut self,
        notification: ChangeNotification,
    ) -> Result<Vec<ChangeNotification>, RegistryError> {
        match notification {
            ChangeNotification::Add(record) => self.apply_upsert(record),
            ChangeNotification::Modify { new, .. } => {
                if self.records.contains_key(&new.id) {
                    self.apply_upsert(new)
                } else {
                    tracing::debug!(instance = %new.id, version = new.version, "Dropping modify for unknown instance");
                    Ok(Vec::new())
                }
            }
            ChangeNotification::Delete(record) => self.apply_delete(&record.id),
            ChangeNotification::BufferSentinel => Ok(Vec::new()),
        }
    }

    fn apply_upsert(
        &mut self,
        record: InstanceRecord,
    ) -> Result<Vec<ChangeNotification>, RegistryError> {
        match self.records.get(&record.id) {
            Some(stored) => {
                if record.version <= stored.version {
                    tracing::debug!(
                        instance = %record.id,
                        stored_version = stored.version,
                        version = record.version,
                        "Dropping stale update"
                    );
                    return Ok(Vec::new());
                }
                let old = stored.clone();
                self.index.update(&old, &record);
                self.records.insert(record.id.clone(), record.clone());
                Ok(vec![ChangeNotification::Modify { old, new: record }])
            }
            None => {
                self.index.insert(&record);
                self.records.insert(record.id.clone(), record.clone());
                Ok(vec![ChangeNotification::Add(record)])
            }
        }
    }

    fn apply_delete(
        &mut self,
        id: &InstanceId,
    ) -> Result<Vec<ChangeNotification>, RegistryError> {
        match self.records.remove(id) {
            Some(stored) => {
                self.index.remove(&stored);
                // A record the index still claims to hold after removal
                // means store and index have diverged.
                if let Some(ids) = self.index.ids_for(&Interest::Application(stored.app.clone())) {
                    if ids.contains(id) {
                        return Err(RegistryError::InvariantViolation(format!(
                            "app index retains deleted instance {}",
                            id
                        )));
                    }
                }
                if let Some(ref vip) = stored.vip {
                    if let Some(ids) = self.index.ids_for(&Interest::VirtualIp(vip.clone())) {
                        if ids.contains(id) {
                            return Err(RegistryError::InvariantViolation(format!(
                                "vip index retains deleted instance {}",
                                id
                            )));
                        }
                    }
                }
                Ok(vec![ChangeNotification::Delete(stored)])
            }
            None => Ok(Vec::new()),
        }
    }

    /// Snapshot of all records matching the interest, ordered by id
    ///
    /// Internally consistent: reflects the store at one instant, since the
    /// store is only reachable behind the engine's lock.
    pub fn snapshot(&self, interest: &Interest) -> Vec<InstanceRecord> {
        let mut records: Vec<InstanceRecord> = match self.index.ids_for(interest) {
            None => self.records.values().cloned().collect(),
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.records.get(id))
                .filter(|rec| interest.matches(rec))
                .cloned()
                .collect(),
        };
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Remove every record whose id is absent from `live_ids`
    ///
    /// Used after a reconnect bootstrap: instances that vanished upstream
    /// while we were disconnected get a synthetic Delete, emitted exactly
    /// once. Returns the Deletes in id order.
    pub fn reconcile(
        &mut self,
        live_ids: &HashSet<InstanceId>,
    ) -> Result<Vec<ChangeNotification>, RegistryError> {
        let mut vanished: Vec<InstanceId> = self
            .records
            .keys()
            .filter(|id| !live_ids.contains(*id))
            .cloned()
            .collect();
        vanished.sort();

        let mut deletes = Vec::with_capacity(vanished.len());
        for id in vanished {
            deletes.extend(self.apply_delete(&id)?);
        }
        Ok(deletes)
    }

    /// Get a record by id
    pub fn get(&self, id: &InstanceId) -> Option<&InstanceRecord> {
        self.records.get(id)
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All stored instance ids
    pub fn instance_ids(&self) -> HashSet<InstanceId> {
        self.records.keys().cloned().collect()
    }
}
