use log::debug;
use uuid::Uuid;

use crate::characteristic::check_event;
use crate::error::{Error, ErrorKind};
use crate::registry::OperationKey;
use crate::util::OptionExt;
use crate::{Characteristic, Peripheral, Result, Service};

// NOTE: discovery calls are serialized by `discovery_lock` and the cache is checked
// again after gaining it, so concurrent lookups of the same service issue one call.
// `resolve_characteristic` must not hold the lock while calling `resolve_service`.

impl Peripheral {
    /// Looks up a service, discovering it on the peripheral if it is not cached.
    pub async fn resolve_service(&self, service_id: Uuid) -> Result<Service> {
        self.check_connected()?;
        if let Some(service) = self.cached_service(service_id) {
            return Ok(service);
        }
        let _disc_lock = self.discovery_lock().lock().await;
        if let Some(service) = self.cached_service(service_id) {
            return Ok(service);
        }
        let event = self
            .request(OperationKey::DiscoverServices, |handle| {
                handle.discover_services(&[service_id])
            })
            .await?;
        check_event(&event)?;
        self.cached_service(service_id).ok_or_check_conn(self, || {
            Error::new(
                ErrorKind::ServiceNotFound,
                None,
                format!("service {service_id} not found"),
            )
        })
    }

    /// Looks up a characteristic of a service, discovering the service first and then
    /// the characteristic if either is not cached.
    pub async fn resolve_characteristic(
        &self,
        service_id: Uuid,
        char_id: Uuid,
    ) -> Result<Characteristic> {
        self.check_connected()?;
        if let Some(ch) = self.cached_characteristic(service_id, char_id) {
            return Ok(ch);
        }
        self.resolve_service(service_id).await?;
        let _disc_lock = self.discovery_lock().lock().await;
        if let Some(ch) = self.cached_characteristic(service_id, char_id) {
            return Ok(ch);
        }
        let event = self
            .request(OperationKey::DiscoverCharacteristics(service_id), |handle| {
                handle.discover_characteristics(service_id, &[char_id])
            })
            .await?;
        check_event(&event)?;
        self.cached_characteristic(service_id, char_id)
            .ok_or_check_conn(self, || {
                Error::new(
                    ErrorKind::CharacteristicNotFound,
                    None,
                    format!("characteristic {char_id} not found in service {service_id}"),
                )
            })
    }

    /// Discovers the given services, or all services if `services` is empty, and
    /// returns those the peripheral has. Services already cached are not rediscovered.
    pub async fn discover_services(&self, services: &[Uuid]) -> Result<Vec<Service>> {
        self.check_connected()?;
        let _disc_lock = self.discovery_lock().lock().await;
        let missing: Vec<Uuid> = services
            .iter()
            .copied()
            .filter(|id| self.cached_service(*id).is_none())
            .collect();
        if services.is_empty() || !missing.is_empty() {
            debug!("{}: discovering {} service(s)", self.id(), missing.len());
            let event = self
                .request(OperationKey::DiscoverServices, |handle| {
                    handle.discover_services(&missing)
                })
                .await?;
            check_event(&event)?;
        }
        if services.is_empty() {
            return Ok(self.services());
        }
        Ok(services
            .iter()
            .filter_map(|id| self.cached_service(*id))
            .collect())
    }

    /// Services discovered so far.
    pub fn services(&self) -> Vec<Service> {
        self.gatt().services()
    }

    /// The cached service, without asking the peripheral.
    pub fn cached_service(&self, service_id: Uuid) -> Option<Service> {
        self.gatt().find_service(service_id)
    }

    /// The cached characteristic, without asking the peripheral.
    pub fn cached_characteristic(
        &self,
        service_id: Uuid,
        char_id: Uuid,
    ) -> Option<Characteristic> {
        self.gatt().find_characteristic(service_id, char_id)
    }
}
