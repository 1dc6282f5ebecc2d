use uuid::Uuid;

/// A snapshot of a discovered GATT service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Service {
    service_id: Uuid,
    chars: Vec<Uuid>,
}

impl Service {
    pub(crate) fn new(service_id: Uuid, mut chars: Vec<Uuid>) -> Self {
        chars.sort();
        Self { service_id, chars }
    }

    /// The [Uuid] identifying the type of this GATT service.
    pub fn uuid(&self) -> Uuid {
        self.service_id
    }

    /// Characteristics discovered so far. Empty until characteristic discovery
    /// has run for this service.
    pub fn characteristics(&self) -> &[Uuid] {
        &self.chars
    }

    pub fn has_characteristic(&self, char_id: Uuid) -> bool {
        self.chars.binary_search(&char_id).is_ok()
    }
}
