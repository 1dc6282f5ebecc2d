//! In-memory cache of discovered services and characteristics.

use std::collections::HashMap;

use uuid::Uuid;

use crate::event::DiscoveredCharacteristic;
use crate::{Characteristic, Service};

#[derive(Debug, Clone, Default)]
pub(crate) struct ServiceEntry {
    pub chars: HashMap<Uuid, CharacteristicEntry>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct CharacteristicEntry {
    pub is_notifying: bool,
    pub value: Option<Vec<u8>>,
}

/// Services and characteristics of one peripheral, populated lazily by discovery
/// callbacks. Only the operation engine mutates it.
#[derive(Debug, Default)]
pub(crate) struct GattTree {
    services: HashMap<Uuid, ServiceEntry>,
}

impl GattTree {
    pub fn find_service(&self, service_id: Uuid) -> Option<Service> {
        self.services
            .get(&service_id)
            .map(|entry| Service::new(service_id, entry.chars.keys().copied().collect()))
    }

    pub fn find_characteristic(&self, service_id: Uuid, char_id: Uuid) -> Option<Characteristic> {
        let entry = self.services.get(&service_id)?.chars.get(&char_id)?;
        Some(Characteristic::new(
            service_id,
            char_id,
            entry.is_notifying,
            entry.value.clone(),
        ))
    }

    pub fn services(&self) -> Vec<Service> {
        let mut ids: Vec<_> = self.services.keys().copied().collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| self.find_service(id))
            .collect()
    }

    /// Adds services reported by a discovery callback, keeping characteristics
    /// already known for services that were cached before.
    pub fn insert_services(&mut self, services: &[Uuid]) {
        for service_id in services {
            self.services.entry(*service_id).or_default();
        }
    }

    /// Adds characteristics reported by a discovery callback. Returns `false` if the
    /// owning service is unknown, in which case nothing is cached.
    pub fn insert_characteristics(
        &mut self,
        service_id: Uuid,
        chars: &[DiscoveredCharacteristic],
    ) -> bool {
        let Some(service) = self.services.get_mut(&service_id) else {
            return false;
        };
        for discovered in chars {
            let entry = service.chars.entry(discovered.uuid).or_default();
            entry.is_notifying = discovered.is_notifying;
        }
        true
    }

    pub fn set_value(&mut self, service_id: Uuid, char_id: Uuid, value: Option<Vec<u8>>) {
        if let Some(entry) = self.char_mut(service_id, char_id) {
            entry.value = value;
        }
    }

    pub fn set_notifying(&mut self, service_id: Uuid, char_id: Uuid, is_notifying: bool) {
        if let Some(entry) = self.char_mut(service_id, char_id) {
            entry.is_notifying = is_notifying;
        }
    }

    pub fn is_notifying(&self, service_id: Uuid, char_id: Uuid) -> bool {
        self.services
            .get(&service_id)
            .and_then(|s| s.chars.get(&char_id))
            .is_some_and(|c| c.is_notifying)
    }

    pub fn remove_services(&mut self, services: &[Uuid]) {
        for service_id in services {
            self.services.remove(service_id);
        }
    }

    pub fn clear(&mut self) {
        self.services.clear();
    }

    fn char_mut(&mut self, service_id: Uuid, char_id: Uuid) -> Option<&mut CharacteristicEntry> {
        self.services.get_mut(&service_id)?.chars.get_mut(&char_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const S1: Uuid = Uuid::from_u128(0x1800);
    const C1: Uuid = Uuid::from_u128(0x2a00);

    #[test]
    fn characteristics_need_their_service() {
        let mut tree = GattTree::default();
        assert!(!tree.insert_characteristics(S1, &[DiscoveredCharacteristic::new(C1)]));
        assert!(tree.find_characteristic(S1, C1).is_none());

        tree.insert_services(&[S1]);
        assert_eq!(tree.find_service(S1).unwrap().characteristics(), &[] as &[Uuid]);
        assert!(tree.insert_characteristics(S1, &[DiscoveredCharacteristic::new(C1)]));
        assert_eq!(tree.find_service(S1).unwrap().characteristics(), &[C1]);
    }

    #[test]
    fn rediscovering_a_service_keeps_its_characteristics() {
        let mut tree = GattTree::default();
        tree.insert_services(&[S1]);
        tree.insert_characteristics(S1, &[DiscoveredCharacteristic::new(C1)]);
        tree.set_value(S1, C1, Some(vec![1, 2]));
        tree.set_notifying(S1, C1, true);
        tree.insert_services(&[S1]);

        let ch = tree.find_characteristic(S1, C1).unwrap();
        assert_eq!(ch.value(), Some(&[1u8, 2][..]));
        assert!(ch.is_notifying());
        assert!(tree.is_notifying(S1, C1));
    }

    #[test]
    fn invalidation_and_clear() {
        let mut tree = GattTree::default();
        tree.insert_services(&[S1, C1]);
        tree.remove_services(&[S1]);
        assert!(tree.find_service(S1).is_none());
        assert_eq!(tree.services().len(), 1);
        tree.clear();
        assert!(tree.services().is_empty());
    }
}
