use futures_core::Stream;
use log::{debug, warn};
use uuid::Uuid;

use crate::async_util::StreamUntil;
use crate::error::{Error, ErrorKind};
use crate::registry::OperationKey;
use crate::util::OptionExt;
use crate::{Peripheral, RawEvent, Result, WriteType};

/// A snapshot of a discovered GATT characteristic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Characteristic {
    service_id: Uuid,
    char_id: Uuid,
    is_notifying: bool,
    value: Option<Vec<u8>>,
}

impl Characteristic {
    pub(crate) fn new(
        service_id: Uuid,
        char_id: Uuid,
        is_notifying: bool,
        value: Option<Vec<u8>>,
    ) -> Self {
        Self {
            service_id,
            char_id,
            is_notifying,
            value,
        }
    }

    /// The [Uuid] identifying the type of this GATT characteristic.
    pub fn uuid(&self) -> Uuid {
        self.char_id
    }

    /// The [Uuid] of the service this characteristic belongs to.
    pub fn service_uuid(&self) -> Uuid {
        self.service_id
    }

    /// Whether the peripheral was sending notifications for this characteristic.
    pub fn is_notifying(&self) -> bool {
        self.is_notifying
    }

    /// The last value received for this characteristic.
    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }
}

impl Peripheral {
    /// Reads the value of a characteristic from the peripheral.
    ///
    /// Discovers the service and the characteristic first if they are not cached.
    /// The value may be absent if the platform delivered none.
    pub async fn read(&self, service_id: Uuid, char_id: Uuid) -> Result<Option<Vec<u8>>> {
        self.resolve_characteristic(service_id, char_id).await?;
        let event = self
            .request(OperationKey::ReadValue(service_id, char_id), |handle| {
                handle.read_value(service_id, char_id)
            })
            .await?;
        value_of(event)
    }

    /// Writes `value` to a characteristic.
    ///
    /// With [WriteType::WithResponse] this resolves once the peripheral acknowledged the
    /// write. With [WriteType::WithoutResponse] it waits until the transport can queue
    /// the write, then resolves right after handing it over; the peripheral gives no
    /// acknowledgment in this mode, so success does not mean it received the data.
    pub async fn write(
        &self,
        service_id: Uuid,
        char_id: Uuid,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<Characteristic> {
        self.resolve_characteristic(service_id, char_id).await?;
        match write_type {
            WriteType::WithResponse => {
                let event = self
                    .request(OperationKey::WriteValue(service_id, char_id), |handle| {
                        handle.write_value(service_id, char_id, value, write_type)
                    })
                    .await?;
                check_event(&event)?;
            }
            WriteType::WithoutResponse => {
                self.wait_ready_to_send().await?;
                self.check_connected()?;
                debug!("{}: writing {char_id} without response", self.id());
                self.handle()
                    .write_value(service_id, char_id, value, write_type)?;
            }
        }
        self.snapshot(service_id, char_id)
    }

    /// Enables notifications for a characteristic. Does nothing if the characteristic
    /// is already notifying.
    pub async fn start_listen(&self, service_id: Uuid, char_id: Uuid) -> Result<Characteristic> {
        self.set_notify(service_id, char_id, true).await
    }

    /// Disables notifications for a characteristic. Does nothing if the characteristic
    /// is not notifying.
    pub async fn stop_listen(&self, service_id: Uuid, char_id: Uuid) -> Result<Characteristic> {
        self.set_notify(service_id, char_id, false).await
    }

    async fn set_notify(
        &self,
        service_id: Uuid,
        char_id: Uuid,
        enabled: bool,
    ) -> Result<Characteristic> {
        self.resolve_characteristic(service_id, char_id).await?;
        if self.gatt().is_notifying(service_id, char_id) == enabled {
            return self.snapshot(service_id, char_id);
        }
        let event = self
            .request(OperationKey::NotifyState(service_id, char_id), |handle| {
                handle.set_notify(service_id, char_id, enabled)
            })
            .await?;
        check_event(&event)?;
        self.snapshot(service_id, char_id)
    }

    /// Values the peripheral pushes for a characteristic while it is notifying.
    ///
    /// Only values received after this call are yielded. The stream ends when the
    /// peripheral disconnects or the owning service is invalidated. It does not enable
    /// notifications by itself; see [Peripheral::start_listen].
    pub fn notifications(
        &self,
        service_id: Uuid,
        char_id: Uuid,
    ) -> impl Stream<Item = Vec<u8>> + Send + Unpin {
        let values = self.notifier_subscribe(service_id, char_id);
        StreamUntil::create(values, self.bus().subscribe(), move |event: &RawEvent| {
            match event {
                RawEvent::Disconnected { .. } => true,
                RawEvent::ServicesInvalidated { services } => services.contains(&service_id),
                _ => false,
            }
        })
    }

    /// Enables notifications, writes `value` with response, and returns the first
    /// notification received after the write. Notifications are disabled afterwards,
    /// also when a step failed; a failure to disable them does not replace an earlier
    /// error.
    pub async fn write_and_listen(
        &self,
        service_id: Uuid,
        char_id: Uuid,
        value: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        self.start_listen(service_id, char_id).await?;
        let result = async {
            // registered before the write, the response may arrive right after it.
            let pending = self
                .registry()
                .register(OperationKey::ReadValue(service_id, char_id));
            self.write(service_id, char_id, value, WriteType::WithResponse)
                .await?;
            value_of(pending.wait().await?)
        }
        .await;
        let stopped = self.stop_listen(service_id, char_id).await;
        match (result, stopped) {
            (Err(e), Err(stop_err)) => {
                warn!("{}: failed to stop listening to {char_id}: {stop_err}", self.id());
                Err(e)
            }
            (Err(e), Ok(_)) => Err(e),
            (Ok(_), Err(stop_err)) => Err(stop_err),
            (Ok(value), Ok(_)) => Ok(value),
        }
    }

    /// The last value received for a characteristic, without asking the peripheral.
    pub fn value(&self, service_id: Uuid, char_id: Uuid) -> Option<Vec<u8>> {
        self.cached_characteristic(service_id, char_id)
            .and_then(|ch| ch.value().map(<[u8]>::to_vec))
    }

    async fn wait_ready_to_send(&self) -> Result<()> {
        loop {
            let pending = self.registry().register(OperationKey::ReadyToSend);
            self.check_connected()?;
            if self.handle().can_send_write_without_response() {
                return Ok(());
            }
            debug!("{}: waiting until ready to send", self.id());
            check_event(&pending.wait().await?)?;
        }
    }

    fn snapshot(&self, service_id: Uuid, char_id: Uuid) -> Result<Characteristic> {
        self.cached_characteristic(service_id, char_id)
            .ok_or_check_conn(self, || ErrorKind::CharacteristicNotFound.into())
    }
}

pub(crate) fn check_event(event: &RawEvent) -> Result<()> {
    match event.error() {
        Some(err) => Err(err.clone().into()),
        None => Ok(()),
    }
}

fn value_of(event: RawEvent) -> Result<Option<Vec<u8>>> {
    check_event(&event)?;
    match event {
        RawEvent::ValueUpdated { value, .. } => Ok(value),
        other => Err(Error::new(
            ErrorKind::OperationFailed,
            None,
            format!("unexpected event {other:?}"),
        )),
    }
}
