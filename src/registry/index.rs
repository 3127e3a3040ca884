//! Interest index
//!
//! Secondary indices over the store (by application name, by virtual IP)
//! so a snapshot for a filtered interest touches only the matching set
//! instead of scanning the full table. `All` and `None` need no index.

use std::collections::{HashMap, HashSet};

use super::instance::{InstanceId, InstanceRecord};
use super::interest::Interest;

/// Multi-map from filter keys to instance ids
#[derive(Debug, Default)]
pub struct InterestIndex {
    by_app: HashMap<String, HashSet<InstanceId>>,
    by_vip: HashMap<String, HashSet<InstanceId>>,
}

impl InterestIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a record
    pub fn insert(&mut self, record: &InstanceRecord) {
        self.by_app
            .entry(record.app.clone())
            .or_default()
            .insert(record.id.clone());
        if let Some(ref vip) = record.vip {
            self.by_vip
                .entry(vip.clone())
                .or_default()
                .insert(record.id.clone());
        }
    }

    /// Remove a record from the index
    pub fn remove(&mut self, record: &InstanceRecord) {
        if let Some(ids) = self.by_app.get_mut(&record.app) {
            ids.remove(&record.id);
            if ids.is_empty() {
                self.by_app.remove(&record.app);
            }
        }
        if let Some(ref vip) = record.vip {
            if let Some(ids) = self.by_vip.get_mut(vip) {
                ids.remove(&record.id);
                if ids.is_empty() {
                    self.by_vip.remove(vip);
                }
            }
        }
    }

    /// Re-index a record after a modification
    ///
    /// App and vip keys may both have changed between the two states.
    pub fn update(&mut self, old: &InstanceRecord, new: &InstanceRecord) {
        self.remove(old);
        self.insert(new);
    }

    /// Ids matching a filtered interest
    ///
    /// Returns `None` for `All` (the caller scans the full table) and an
    /// empty set for `None` or an unknown key.
    pub fn ids_for(&self, interest: &Interest) -> Option<HashSet<InstanceId>> {
        match interest {
            Interest::All => None,
            Interest::None => Some(HashSet::new()),
            Interest::Application(app) | Interest::SameApplication(app) => {
                Some(self.by_app.get(app).cloned().unwrap_or_default())
            }
            Interest::VirtualIp(vip) => Some(self.by_vip.get(vip).cloned().unwrap_or_default()),
        }
    }

    /// Whether the index holds no entries
    pub fn is_empty(&self) -> bool {
        self.by_app.is_empty() && self.by_vip.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, app: &str, vip: Option<&str>) -> InstanceRecord {
        let rec = InstanceRecord::new(id, app);
        match vip {
            Some(v) => rec.vip(v),
            None => rec,
        }
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut index = InterestIndex::new();
        index.insert(&record("i-1", "foo", Some("foo.vip")));
        index.insert(&record("i-2", "foo", None));
        index.insert(&record("i-3", "bar", None));

        let foo = index
            .ids_for(&Interest::Application("foo".into()))
            .unwrap();
        assert_eq!(foo.len(), 2);
        assert!(foo.contains(&InstanceId::new("i-1")));

        let vip = index.ids_for(&Interest::VirtualIp("foo.vip".into())).unwrap();
        assert_eq!(vip.len(), 1);

        assert!(index.ids_for(&Interest::All).is_none());
        assert!(index.ids_for(&Interest::None).unwrap().is_empty());
    }

    #[test]
    fn test_remove_cleans_empty_keys() {
        let mut index = InterestIndex::new();
        let rec = record("i-1", "foo", Some("foo.vip"));
        index.insert(&rec);
        index.remove(&rec);

        assert!(index.is_empty());
        assert!(index
            .ids_for(&Interest::Application("foo".into()))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_update_moves_keys() {
        let mut index = InterestIndex::new();
        let old = record("i-1", "foo", Some("foo.vip"));
        let new = record("i-1", "foo", Some("other.vip"));
        index.insert(&old);
        index.update(&old, &new);

        assert!(index.ids_for(&Interest::VirtualIp("foo.vip".into())).unwrap().is_empty());
        assert_eq!(
            index
                .ids_for(&Interest::VirtualIp("other.vip".into()))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_same_application_uses_app_key() {
        let mut index = InterestIndex::new();
        index.insert(&record("i-1", "foo", None));

        let ids = index
            .ids_for(&Interest::SameApplication("foo".into()))
            .unwrap();
        assert_eq!(ids.len(), 1);
    }
}
