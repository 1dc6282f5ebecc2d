//! Request/response operations and notification streams on top of a callback-based
//! BLE peripheral API.
//!
//! The platform BLE stack is reached through a [PeripheralHandle] whose methods only
//! issue calls; their outcomes come back as [RawEvent]s which the platform glue passes
//! to [Peripheral::handle_event]. A [Peripheral] correlates those events with the
//! operations waiting for them, so that each operation (discovery, read, write,
//! notification state changes, RSSI) resolves exactly once, while notifications are
//! delivered as streams.
//!
//! This crate does not depend on any async runtime. Nothing times out unless
//! [PeripheralConfig::operation_timeout] is set; dropping an operation's future
//! cancels it.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use gatt_engine::*;
//! # async fn demo(handle: Arc<dyn PeripheralHandle>) -> Result<()> {
//! let battery_service = Uuid::from_u16(0x180f);
//! let battery_level = Uuid::from_u16(0x2a19);
//! let peripheral = Peripheral::new(handle, PeripheralConfig::default());
//! // the platform glue calls `peripheral.handle_event(..)` for every callback.
//! let level = peripheral.read(battery_service, battery_level).await?;
//! println!("{level:?}");
//! # Ok(())
//! # }
//! ```

pub use btuuid::BluetoothUuidExt;
pub use characteristic::Characteristic;
pub use config::PeripheralConfig;
pub use error::{AttError, Error, ErrorKind, PlatformError};
pub use event::{DiscoveredCharacteristic, RawEvent};
pub use handle::PeripheralHandle;
pub use peripheral::Peripheral;
pub use registry::OperationKey;
pub use service::Service;

/// Convenience alias for a result with [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

pub use uuid::Uuid;
pub mod btuuid;
pub mod error;
mod types;
pub use types::*;

mod async_util;
mod characteristic;
mod config;
mod discovery;
mod event;
mod gatt_tree;
mod handle;
mod peripheral;
mod registry;
mod service;
mod util;
