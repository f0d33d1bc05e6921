//! Device registry
//!
//! Holds every device seen by the current watcher run in one map keyed by
//! identity. Each entry is tagged Known (has a display name) or Unknown
//! (no name yet), so an identity can never sit in both partitions.

use crate::domain::models::{DeviceIdentity, DeviceUpdate};
use std::collections::BTreeMap;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    Known,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RegistryEntry {
    partition: Partition,
    device: DeviceIdentity,
}

/// What a mutation did to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryChange {
    Inserted(Partition),
    Merged(Partition),
    /// Entry was in Unknown and became Known
    Promoted,
    Removed(Partition),
    Ignored,
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        debug!("Clearing device registry ({} entries)", self.entries.len());
        self.entries.clear();
    }

    /// Inserts a newly added device; duplicates are ignored
    pub fn on_added(&mut self, device: DeviceIdentity) -> RegistryChange {
        if self.entries.contains_key(&device.id) {
            trace!("Duplicate add for {}", device.id);
            return RegistryChange::Ignored;
        }

        let partition = if device.has_name() {
            Partition::Known
        } else {
            Partition::Unknown
        };
        self.entries
            .insert(device.id.clone(), RegistryEntry { partition, device });
        RegistryChange::Inserted(partition)
    }

    /// Merges an update; an Unknown device that gains a name moves to Known
    pub fn on_updated(&mut self, update: &DeviceUpdate) -> RegistryChange {
        let Some(entry) = self.entries.get_mut(&update.id) else {
            trace!("Dropping update for unseen device {}", update.id);
            return RegistryChange::Ignored;
        };

        merge(&mut entry.device, update);

        match entry.partition {
            Partition::Known => RegistryChange::Merged(Partition::Known),
            Partition::Unknown if entry.device.has_name() => {
                entry.partition = Partition::Known;
                debug!("Device {} is now known as {:?}", update.id, entry.device.name);
                RegistryChange::Promoted
            }
            Partition::Unknown => RegistryChange::Merged(Partition::Unknown),
        }
    }

    pub fn on_removed(&mut self, id: &str) -> RegistryChange {
        match self.entries.remove(id) {
            Some(entry) => RegistryChange::Removed(entry.partition),
            None => RegistryChange::Ignored,
        }
    }

    pub fn find(&self, id: &str) -> Option<(&DeviceIdentity, Partition)> {
        self.entries
            .get(id)
            .map(|entry| (&entry.device, entry.partition))
    }

    pub fn known(&self) -> Vec<DeviceIdentity> {
        self.partition(Partition::Known)
    }

    pub fn unknown(&self) -> Vec<DeviceIdentity> {
        self.partition(Partition::Unknown)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn partition(&self, partition: Partition) -> Vec<DeviceIdentity> {
        self.entries
            .values()
            .filter(|entry| entry.partition == partition)
            .map(|entry| entry.device.clone())
            .collect()
    }
}

fn merge(device: &mut DeviceIdentity, update: &DeviceUpdate) {
    // An empty name never overwrites an existing one
    if let Some(name) = update.name.as_ref().filter(|n| !n.is_empty()) {
        device.name = name.clone();
    }
    if let Some(connectable) = update.is_connectable {
        device.status.is_connectable = Some(connectable);
    }
    if let Some(connected) = update.is_connected {
        device.status.is_connected = connected;
    }
    if let Some(paired) = update.is_paired {
        device.status.is_paired = paired;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_exclusive(registry: &DeviceRegistry) {
        let known = registry.known();
        let unknown = registry.unknown();
        for device in &known {
            assert!(
                !unknown.iter().any(|u| u.id == device.id),
                "{} in both partitions",
                device.id
            );
        }
        assert_eq!(known.len() + unknown.len(), registry.len());
    }

    #[test]
    fn named_devices_are_known_unnamed_are_unknown() {
        let mut registry = DeviceRegistry::new();
        assert_eq!(
            registry.on_added(DeviceIdentity::new("a", "Keypad")),
            RegistryChange::Inserted(Partition::Known)
        );
        assert_eq!(
            registry.on_added(DeviceIdentity::new("b", "")),
            RegistryChange::Inserted(Partition::Unknown)
        );

        assert_eq!(registry.find("a").map(|(_, p)| p), Some(Partition::Known));
        assert_eq!(registry.find("b").map(|(_, p)| p), Some(Partition::Unknown));
        assert!(registry.find("c").is_none());
    }

    #[test]
    fn duplicate_add_is_noop() {
        let mut registry = DeviceRegistry::new();
        registry.on_added(DeviceIdentity::new("a", ""));
        registry.on_added(DeviceIdentity::new("b", "Pad"));

        assert_eq!(
            registry.on_added(DeviceIdentity::new("a", "Renamed")),
            RegistryChange::Ignored
        );
        assert_eq!(
            registry.on_added(DeviceIdentity::new("b", "Other")),
            RegistryChange::Ignored
        );

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.find("a").unwrap().0.name, "");
        assert_eq!(registry.find("b").unwrap().0.name, "Pad");
    }

    #[test]
    fn update_with_name_promotes_unknown_device() {
        let mut registry = DeviceRegistry::new();
        registry.on_added(DeviceIdentity::new("x", ""));

        let update = DeviceUpdate::new("x").with_name("Foo");
        assert_eq!(registry.on_updated(&update), RegistryChange::Promoted);

        let (device, partition) = registry.find("x").unwrap();
        assert_eq!(partition, Partition::Known);
        assert_eq!(device.name, "Foo");
        assert!(registry.unknown().is_empty());

        // Applying the same update again leaves the same end state
        assert_eq!(
            registry.on_updated(&update),
            RegistryChange::Merged(Partition::Known)
        );
        assert_eq!(registry.known().len(), 1);
        assert!(registry.unknown().is_empty());
        assert_eq!(registry.find("x").unwrap().0.name, "Foo");
    }

    #[test]
    fn known_device_name_is_never_emptied() {
        let mut registry = DeviceRegistry::new();
        registry.on_added(DeviceIdentity::new("x", "Foo"));

        let mut update = DeviceUpdate::new("x").with_name("");
        update.is_paired = Some(true);
        registry.on_updated(&update);

        let (device, partition) = registry.find("x").unwrap();
        assert_eq!(partition, Partition::Known);
        assert_eq!(device.name, "Foo");
        assert!(device.status.is_paired);
    }

    #[test]
    fn update_without_name_keeps_device_unknown() {
        let mut registry = DeviceRegistry::new();
        registry.on_added(DeviceIdentity::new("x", ""));

        let mut update = DeviceUpdate::new("x");
        update.is_connectable = Some(true);
        assert_eq!(
            registry.on_updated(&update),
            RegistryChange::Merged(Partition::Unknown)
        );
        assert_eq!(
            registry.find("x").unwrap().0.status.is_connectable,
            Some(true)
        );
    }

    #[test]
    fn update_for_unseen_device_is_dropped() {
        let mut registry = DeviceRegistry::new();
        registry.on_added(DeviceIdentity::new("a", "Pad"));

        let update = DeviceUpdate::new("ghost").with_name("Ghost");
        assert_eq!(registry.on_updated(&update), RegistryChange::Ignored);
        assert_eq!(registry.len(), 1);
        assert!(registry.find("ghost").is_none());
    }

    #[test]
    fn remove_works_for_either_partition() {
        let mut registry = DeviceRegistry::new();
        registry.on_added(DeviceIdentity::new("a", "Pad"));
        registry.on_added(DeviceIdentity::new("b", ""));

        assert_eq!(
            registry.on_removed("b"),
            RegistryChange::Removed(Partition::Unknown)
        );
        assert_eq!(
            registry.on_removed("a"),
            RegistryChange::Removed(Partition::Known)
        );
        assert_eq!(registry.on_removed("a"), RegistryChange::Ignored);
        assert!(registry.is_empty());
    }

    #[test]
    fn partitions_stay_exclusive_across_event_sequences() {
        let mut registry = DeviceRegistry::new();
        let ids = ["a", "b", "c", "d"];

        for round in 0..4 {
            for (i, id) in ids.iter().enumerate() {
                let name = if (i + round) % 2 == 0 { "" } else { "Named" };
                registry.on_added(DeviceIdentity::new(*id, name));
                assert_exclusive(&registry);

                registry.on_updated(&DeviceUpdate::new(*id).with_name(format!("N{}", round)));
                assert_exclusive(&registry);

                if (i + round) % 3 == 0 {
                    registry.on_removed(id);
                    assert_exclusive(&registry);
                }
            }
        }
    }

    #[test]
    fn clear_empties_both_partitions() {
        let mut registry = DeviceRegistry::new();
        registry.on_added(DeviceIdentity::new("a", "Pad"));
        registry.on_added(DeviceIdentity::new("b", ""));
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.known().is_empty());
        assert!(registry.unknown().is_empty());
    }
}
