//! ProfileTable - profile entries keyed by (profile id, address)

use indexmap::IndexMap;
use tracing::debug;

use super::ProfileId;
use crate::ci::address;
use crate::observer::{ObserverId, ObserverList};

/// One profile at one address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileEntry {
    pub profile: ProfileId,
    /// Channel (0x00-0x0F), group (0x7E) or function block (0x7F)
    pub address: u8,
    pub enabled: bool,
    /// Number of channels (or groups) the profile spans when enabled
    pub channels: u16,
}

impl ProfileEntry {
    pub fn new(profile: ProfileId, address: u8, enabled: bool) -> Self {
        Self {
            profile,
            address,
            enabled,
            channels: 1,
        }
    }

    fn key(&self) -> (ProfileId, u8) {
        (self.profile, self.address)
    }
}

/// Change notifications published by a [`ProfileTable`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileEvent {
    Added(ProfileEntry),
    Removed(ProfileEntry),
    EnabledChanged(ProfileEntry),
    /// Entry moved to a new address and/or changed state in one step
    Updated {
        previous: ProfileEntry,
        current: ProfileEntry,
    },
}

/// Observable profile table, insertion ordered
#[derive(Debug, Default)]
pub struct ProfileTable {
    entries: IndexMap<(ProfileId, u8), ProfileEntry>,
    observers: ObserverList<ProfileEvent>,
}

impl ProfileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to change notifications
    pub fn subscribe<F>(&mut self, listener: F) -> ObserverId
    where
        F: Fn(&ProfileEvent) + Send + Sync + 'static,
    {
        self.observers.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: ObserverId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Insert a new entry. Returns false (and changes nothing) if the
    /// `(profile, address)` key is already present.
    pub fn add(&mut self, entry: ProfileEntry) -> bool {
        let key = entry.key();
        if self.entries.contains_key(&key) {
            return false;
        }
        debug!(
            "Profile {} added at {}",
            entry.profile,
            address::describe(entry.address)
        );
        self.entries.insert(key, entry.clone());
        self.observers.notify(&ProfileEvent::Added(entry));
        true
    }

    /// Remove every address of `profile`
    pub fn remove(&mut self, profile: &ProfileId) -> Vec<ProfileEntry> {
        let keys: Vec<_> = self
            .entries
            .keys()
            .filter(|(id, _)| id == profile)
            .copied()
            .collect();
        keys.into_iter()
            .filter_map(|key| self.remove_key(key))
            .collect()
    }

    /// Remove one `(profile, address)` entry
    pub fn remove_target(&mut self, address: u8, profile: &ProfileId) -> Option<ProfileEntry> {
        self.remove_key((*profile, address))
    }

    fn remove_key(&mut self, key: (ProfileId, u8)) -> Option<ProfileEntry> {
        let removed = self.entries.shift_remove(&key)?;
        debug!(
            "Profile {} removed from {}",
            removed.profile,
            address::describe(removed.address)
        );
        self.observers.notify(&ProfileEvent::Removed(removed.clone()));
        Some(removed)
    }

    /// Change the enabled flag of an existing entry.
    ///
    /// Returns false if the entry does not exist. No event fires when the
    /// state is unchanged.
    pub fn set_enabled(&mut self, address: u8, profile: &ProfileId, enabled: bool) -> bool {
        let Some(entry) = self.entries.get_mut(&(*profile, address)) else {
            return false;
        };
        if entry.enabled != enabled {
            entry.enabled = enabled;
            let snapshot = entry.clone();
            debug!(
                "Profile {} {} at {}",
                snapshot.profile,
                if enabled { "enabled" } else { "disabled" },
                address::describe(address)
            );
            self.observers
                .notify(&ProfileEvent::EnabledChanged(snapshot));
        }
        true
    }

    /// Insert the entry if missing, then set its state and channel count.
    ///
    /// Used by the roles when a report or request names a profile the table
    /// has not seen yet.
    pub fn upsert(&mut self, address: u8, profile: ProfileId, enabled: bool, channels: u16) {
        match self.entries.get_mut(&(profile, address)) {
            Some(entry) => {
                entry.channels = channels;
                self.set_enabled(address, &profile, enabled);
            }
            None => {
                self.add(ProfileEntry {
                    profile,
                    address,
                    enabled,
                    channels,
                });
            }
        }
    }

    /// Move an entry to `new_address` and set its state in one step.
    ///
    /// Returns false if the source entry does not exist or the destination
    /// key is already taken by another entry.
    pub fn update(&mut self, entry: &ProfileEntry, enabled: bool, new_address: u8) -> bool {
        let old_key = entry.key();
        let new_key = (entry.profile, new_address);
        if old_key != new_key && self.entries.contains_key(&new_key) {
            return false;
        }
        let Some(previous) = self.entries.shift_remove(&old_key) else {
            return false;
        };
        let current = ProfileEntry {
            address: new_address,
            enabled,
            ..previous.clone()
        };
        self.entries.insert(new_key, current.clone());
        self.observers
            .notify(&ProfileEvent::Updated { previous, current });
        true
    }

    pub fn get(&self, address: u8, profile: &ProfileId) -> Option<&ProfileEntry> {
        self.entries.get(&(*profile, address))
    }

    pub fn contains(&self, address: u8, profile: &ProfileId) -> bool {
        self.entries.contains_key(&(*profile, address))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProfileEntry> {
        self.entries.values()
    }

    /// Profile ids at `address` with the given state, as sent in a
    /// Profile Inquiry reply
    pub fn ids_at(&self, address: u8, enabled: bool) -> Vec<ProfileId> {
        self.entries
            .values()
            .filter(|e| e.address == address && e.enabled == enabled)
            .map(|e| e.profile)
            .collect()
    }

    /// Remove every entry at `address` (without touching other addresses)
    pub fn clear_address(&mut self, address: u8) {
        let keys: Vec<_> = self
            .entries
            .keys()
            .filter(|(_, a)| *a == address)
            .copied()
            .collect();
        for key in keys {
            self.remove_key(key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn recorded(table: &mut ProfileTable) -> Arc<Mutex<Vec<ProfileEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        table.subscribe(move |e| sink.lock().push(e.clone()));
        events
    }

    #[test]
    fn test_add_rejects_duplicate_key() {
        let mut table = ProfileTable::new();
        let events = recorded(&mut table);
        let id = ProfileId::standard(1, 2, 3, 4);

        assert!(table.add(ProfileEntry::new(id, 0x7F, false)));
        assert!(!table.add(ProfileEntry::new(id, 0x7F, true)));
        assert!(table.add(ProfileEntry::new(id, 0x00, true)));

        assert_eq!(table.len(), 2);
        assert_eq!(events.lock().len(), 2);
        assert!(!table.get(0x7F, &id).unwrap().enabled);
    }

    #[test]
    fn test_remove_all_addresses() {
        let mut table = ProfileTable::new();
        let id = ProfileId::standard(1, 2, 3, 4);
        let other = ProfileId::standard(9, 9, 9, 9);
        table.add(ProfileEntry::new(id, 0x00, true));
        table.add(ProfileEntry::new(id, 0x01, true));
        table.add(ProfileEntry::new(other, 0x00, true));
        let events = recorded(&mut table);

        let removed = table.remove(&id);
        assert_eq!(removed.len(), 2);
        assert_eq!(table.len(), 1);
        assert!(events
            .lock()
            .iter()
            .all(|e| matches!(e, ProfileEvent::Removed(entry) if entry.profile == id)));

        assert!(table.remove_target(0x00, &other).is_some());
        assert!(table.remove_target(0x00, &other).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_set_enabled_fires_only_on_change() {
        let mut table = ProfileTable::new();
        let id = ProfileId::standard(1, 2, 3, 4);
        table.add(ProfileEntry::new(id, 0x7F, false));
        let events = recorded(&mut table);

        assert!(table.set_enabled(0x7F, &id, true));
        assert!(table.set_enabled(0x7F, &id, true));
        assert!(!table.set_enabled(0x00, &id, true));

        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ProfileEvent::EnabledChanged(e) if e.enabled));
    }

    #[test]
    fn test_update_moves_entry() {
        let mut table = ProfileTable::new();
        let id = ProfileId::standard(1, 2, 3, 4);
        let entry = ProfileEntry::new(id, 0x00, false);
        table.add(entry.clone());
        table.add(ProfileEntry::new(id, 0x05, false));
        let events = recorded(&mut table);

        // Destination taken
        assert!(!table.update(&entry, true, 0x05));
        assert!(table.update(&entry, true, 0x03));
        assert!(table.get(0x00, &id).is_none());
        assert!(table.get(0x03, &id).unwrap().enabled);

        let events = events.lock();
        assert_eq!(events.len(), 1);
        match &events[0] {
            ProfileEvent::Updated { previous, current } => {
                assert_eq!(previous.address, 0x00);
                assert_eq!(current.address, 0x03);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_ids_at_and_upsert() {
        let mut table = ProfileTable::new();
        let a = ProfileId::standard(1, 0, 0, 0);
        let b = ProfileId::standard(2, 0, 0, 0);
        table.upsert(0x7F, a, true, 1);
        table.upsert(0x7F, b, false, 1);
        table.upsert(0x7F, b, true, 1);

        assert_eq!(table.ids_at(0x7F, true), vec![a, b]);
        assert!(table.ids_at(0x7F, false).is_empty());

        table.clear_address(0x7F);
        assert!(table.is_empty());
    }

    #[test]
    fn test_unsubscribe_stops_events() {
        let mut table = ProfileTable::new();
        let count = Arc::new(Mutex::new(0));
        let sink = count.clone();
        let id = table.subscribe(move |_| *sink.lock() += 1);
        table.add(ProfileEntry::new(ProfileId::standard(1, 1, 1, 1), 0, true));
        assert!(table.unsubscribe(id));
        table.add(ProfileEntry::new(ProfileId::standard(2, 2, 2, 2), 0, true));
        assert_eq!(*count.lock(), 1);
    }
}
