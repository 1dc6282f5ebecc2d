//! The outbound boundary towards the platform BLE stack.

use uuid::Uuid;

use crate::error::PlatformError;
use crate::{ConnectionState, PeripheralId, WriteType};

/// A connected platform peripheral, supplied by the connection-lifecycle collaborator.
///
/// Every request method only *issues* the platform call; an `Err` means the call could
/// not be issued at all. The outcome of an issued call is delivered later as a
/// [crate::RawEvent] passed to [crate::Peripheral::handle_event], possibly from another
/// thread and in any order relative to other calls.
pub trait PeripheralHandle: Send + Sync {
    /// Stable identifier of the peripheral.
    fn id(&self) -> PeripheralId;

    /// Display name, if the peripheral advertised one.
    fn name(&self) -> Option<String>;

    /// Connection state as the platform sees it.
    fn state(&self) -> ConnectionState;

    /// Requests discovery of the given services. Answered by `ServicesDiscovered`.
    fn discover_services(&self, services: &[Uuid]) -> Result<(), PlatformError>;

    /// Requests discovery of the given characteristics within `service`.
    /// Answered by `CharacteristicsDiscovered`.
    fn discover_characteristics(
        &self,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> Result<(), PlatformError>;

    /// Requests the value of a characteristic. Answered by `ValueUpdated`.
    fn read_value(&self, service: Uuid, characteristic: Uuid) -> Result<(), PlatformError>;

    /// Writes a characteristic value. Writes with response are answered by `ValueWritten`.
    fn write_value(
        &self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<(), PlatformError>;

    /// Enables or disables notifications. Answered by `NotifyStateChanged`.
    fn set_notify(
        &self,
        service: Uuid,
        characteristic: Uuid,
        enabled: bool,
    ) -> Result<(), PlatformError>;

    /// Requests the current signal strength. Answered by `RssiRead`.
    fn read_rssi(&self) -> Result<(), PlatformError>;

    /// Whether the transport can currently queue a write without response. When this
    /// returns `false`, a `ReadyToSendWriteWithoutResponse` event follows once it can.
    fn can_send_write_without_response(&self) -> bool;
}
