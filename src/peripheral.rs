use std::collections::HashMap;
use std::sync::Arc;

use async_lock::{Mutex, MutexGuard};
use futures_core::Stream;
use log::{debug, info, trace, warn};
use uuid::Uuid;

use crate::async_util::{Notifier, NotifierReceiver};
use crate::characteristic::check_event;
use crate::error::{Error, ErrorKind, PlatformError};
use crate::event::EventBus;
use crate::gatt_tree::GattTree;
use crate::registry::{OperationKey, PendingRegistry};
use crate::{ConnectionState, PeripheralConfig, PeripheralHandle, PeripheralId, RawEvent, Result};

/// The operation engine of one connected peripheral.
///
/// Callers issue operations concurrently through shared references; the platform
/// collaborator feeds every callback into [Peripheral::handle_event]. Cloning is cheap
/// and clones share the same session.
#[derive(Clone)]
pub struct Peripheral {
    inner: Arc<PeripheralInner>,
}

struct PeripheralInner {
    handle: Arc<dyn PeripheralHandle>,
    bus: EventBus,
    registry: PendingRegistry,
    gatt: Mutex<GattTree>,
    discovery_lock: Mutex<()>,
    notifiers: Mutex<HashMap<(Uuid, Uuid), Notifier<Vec<u8>>>>,
    notification_capacity: usize,
    name: Mutex<Option<String>>,
    last_rssi: Mutex<Option<i16>>,
}

impl std::fmt::Debug for Peripheral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut f = f.debug_struct("Peripheral");
        f.field("name", &self.name().unwrap_or("(Unknown name)".into()));
        f.field("id", &self.id());
        f.field("state", &self.state());
        f.finish()
    }
}

impl std::fmt::Display for Peripheral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name().as_deref().unwrap_or("(Unknown name)"))
    }
}

impl PartialEq for Peripheral {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Peripheral {}

impl Peripheral {
    /// Creates the engine for a peripheral the connection-lifecycle collaborator has
    /// connected.
    pub fn new(handle: Arc<dyn PeripheralHandle>, config: PeripheralConfig) -> Self {
        let name = handle.name();
        Self {
            inner: Arc::new(PeripheralInner {
                handle,
                bus: EventBus::new(config.get_event_capacity()),
                registry: PendingRegistry::new(config.get_operation_timeout()),
                gatt: Mutex::new(GattTree::default()),
                discovery_lock: Mutex::new(()),
                notifiers: Mutex::new(HashMap::new()),
                notification_capacity: config.get_notification_capacity(),
                name: Mutex::new(name),
                last_rssi: Mutex::new(None),
            }),
        }
    }

    /// Returns this peripheral's unique identifier.
    pub fn id(&self) -> PeripheralId {
        self.inner.handle.id()
    }

    /// The display name, as last reported by the platform.
    pub fn name(&self) -> Option<String> {
        self.inner.name.lock_blocking().clone()
    }

    /// The connection state. Always [ConnectionState::Disconnected] after
    /// [Peripheral::disconnected] was called.
    pub fn state(&self) -> ConnectionState {
        if self.is_disconnected() {
            ConnectionState::Disconnected
        } else {
            self.inner.handle.state()
        }
    }

    /// The signal strength from the last successful RSSI read, in dBm.
    pub fn last_rssi(&self) -> Option<i16> {
        *self.inner.last_rssi.lock_blocking()
    }

    /// Keys of the operations currently waiting for a callback.
    pub fn pending_operations(&self) -> Vec<OperationKey> {
        self.inner.registry.pending_keys()
    }

    /// Cancels every waiting operation; each fails with [ErrorKind::OperationCancelled].
    /// Platform calls already issued are not retracted.
    pub fn cancel_pending(&self) -> usize {
        self.inner.registry.cancel_all()
    }

    /// All events received from now on.
    pub fn events(&self) -> impl Stream<Item = RawEvent> + Send + Unpin {
        self.inner.bus.subscribe()
    }

    /// Events received from now on for which `predicate` returns true.
    pub fn subscribe<F>(&self, predicate: F) -> impl Stream<Item = RawEvent> + Send + Unpin
    where
        F: FnMut(&RawEvent) -> bool + Send + Unpin + 'static,
    {
        self.inner.bus.subscribe_filtered(predicate)
    }

    /// Get the current signal strength from the peripheral in dBm.
    pub async fn read_rssi(&self) -> Result<i16> {
        let event = self
            .request(OperationKey::ReadRssi, |handle| handle.read_rssi())
            .await?;
        check_event(&event)?;
        match event {
            RawEvent::RssiRead { rssi, .. } => Ok(rssi),
            other => Err(Error::new(
                ErrorKind::OperationFailed,
                None,
                format!("unexpected event {other:?}"),
            )),
        }
    }

    /// Entry point for every callback of the platform BLE stack concerning this
    /// peripheral. Updates the cache, resolves the oldest operation waiting for the
    /// event, then publishes it on the event bus. Events arriving after disconnection
    /// are ignored.
    pub fn handle_event(&self, event: RawEvent) {
        trace!("{}: {event:?}", self.id());
        if self.is_disconnected() {
            // the cache was cleared for good; late callbacks must not refill it.
            return;
        }
        match &event {
            RawEvent::ServicesDiscovered {
                services,
                error: None,
            } => self.gatt().insert_services(services),
            RawEvent::CharacteristicsDiscovered {
                service,
                characteristics,
                error: None,
            } => {
                if !self.gatt().insert_characteristics(*service, characteristics) {
                    warn!("{}: characteristics of unknown service {service}", self.id());
                }
            }
            RawEvent::ValueUpdated {
                service,
                characteristic,
                value,
                error: None,
            } => {
                let is_notifying = {
                    let mut gatt = self.gatt();
                    gatt.set_value(*service, *characteristic, value.clone());
                    gatt.is_notifying(*service, *characteristic)
                };
                if is_notifying {
                    let notifiers = self.inner.notifiers.lock_blocking();
                    if let Some(notifier) = notifiers.get(&(*service, *characteristic)) {
                        notifier.notify(value.clone().unwrap_or_default());
                    }
                }
            }
            RawEvent::NotifyStateChanged {
                service,
                characteristic,
                is_notifying,
                error: None,
            } => self
                .gatt()
                .set_notifying(*service, *characteristic, *is_notifying),
            RawEvent::RssiRead { rssi, error: None } => {
                self.inner.last_rssi.lock_blocking().replace(*rssi);
            }
            RawEvent::NameChanged { name } => {
                *self.inner.name.lock_blocking() = name.clone();
            }
            RawEvent::ServicesInvalidated { services } => {
                debug!("{}: services invalidated: {services:?}", self.id());
                self.gatt().remove_services(services);
                let failed = self.inner.registry.fail_matching(
                    |key| key.service().is_some_and(|s| services.contains(&s)),
                    || {
                        Error::new(
                            ErrorKind::ServiceNotFound,
                            None,
                            "service was invalidated while the operation was waiting",
                        )
                    },
                );
                if failed > 0 {
                    debug!("{}: failed {failed} operation(s) on invalidated services", self.id());
                }
            }
            RawEvent::Disconnected { error } => {
                self.teardown(error.as_ref());
                self.inner.bus.publish(event.clone());
                self.inner.bus.close();
                return;
            }
            _ => (),
        }
        match OperationKey::for_event(&event) {
            // readiness is a level: every waiting writer may try again.
            Some(key @ OperationKey::ReadyToSend) => {
                self.inner.registry.resolve_all(&key, &event);
            }
            Some(key) => {
                if !self.inner.registry.resolve(&key, Ok(event.clone())) {
                    trace!("{}: no operation waiting for {key:?}", self.id());
                }
            }
            None => (),
        }
        self.inner.bus.publish(event);
    }

    /// Called by the connection-lifecycle collaborator when the connection is gone.
    /// Every waiting operation fails with [ErrorKind::PeripheralDisconnected], the
    /// discovery cache is cleared and all event and notification streams end.
    pub fn disconnected(&self) {
        self.handle_event(RawEvent::Disconnected { error: None });
    }

    /// Whether [Peripheral::disconnected] was called.
    pub fn is_disconnected(&self) -> bool {
        self.inner.registry.is_closed()
    }

    fn teardown(&self, error: Option<&PlatformError>) {
        if self.is_disconnected() {
            return;
        }
        let failed = self
            .inner
            .registry
            .fail_all(ErrorKind::PeripheralDisconnected);
        match error {
            Some(err) => info!("{}: disconnected ({err}), failed {failed} operation(s)", self.id()),
            None => info!("{}: disconnected, failed {failed} operation(s)", self.id()),
        }
        self.gatt().clear();
        let notifiers = std::mem::take(&mut *self.inner.notifiers.lock_blocking());
        for notifier in notifiers.values() {
            notifier.close();
        }
    }

    /// Registers a pending operation under `key`, issues the platform call and waits
    /// for the callback resolving it.
    pub(crate) async fn request(
        &self,
        key: OperationKey,
        issue: impl FnOnce(&dyn PeripheralHandle) -> Result<(), PlatformError>,
    ) -> Result<RawEvent> {
        let pending = self.inner.registry.register(key);
        self.check_connected()?;
        debug!("{}: issuing {key:?}", self.id());
        issue(self.inner.handle.as_ref())?;
        pending.wait().await
    }

    pub(crate) fn check_connected(&self) -> Result<()> {
        if self.is_disconnected() {
            Err(ErrorKind::PeripheralDisconnected.into())
        } else {
            Ok(())
        }
    }

    pub(crate) fn notifier_subscribe(
        &self,
        service_id: Uuid,
        char_id: Uuid,
    ) -> NotifierReceiver<Vec<u8>> {
        let mut notifiers = self.inner.notifiers.lock_blocking();
        let capacity = self.inner.notification_capacity;
        notifiers.retain(|_, notifier| notifier.is_active());
        let receiver = notifiers
            .entry((service_id, char_id))
            .or_insert_with(|| Notifier::new(capacity))
            .subscribe();
        if self.is_disconnected() {
            // teardown already ran, so nothing would ever close this one.
            if let Some(notifier) = notifiers.remove(&(service_id, char_id)) {
                notifier.close();
            }
        }
        receiver
    }

    pub(crate) fn handle(&self) -> &dyn PeripheralHandle {
        self.inner.handle.as_ref()
    }

    pub(crate) fn gatt(&self) -> MutexGuard<'_, GattTree> {
        self.inner.gatt.lock_blocking()
    }

    pub(crate) fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub(crate) fn registry(&self) -> &PendingRegistry {
        &self.inner.registry
    }

    pub(crate) fn discovery_lock(&self) -> &Mutex<()> {
        &self.inner.discovery_lock
    }
}
