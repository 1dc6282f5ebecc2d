//! Bluetooth base UUID helpers.

use uuid::Uuid;

const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;
const BASE_MASK_32: u128 = 0x00000000_ffff_ffff_ffff_ffffffffffff;
const BASE_MASK_16: u128 = 0xffff0000_ffff_ffff_ffff_ffffffffffff;

/// Extension trait for [Uuid] with helpers for Bluetooth short UUIDs.
pub trait BluetoothUuidExt: Sized {
    /// Builds a UUID from a 16-bit Bluetooth assigned number.
    fn from_u16(v: u16) -> Self;

    /// Builds a UUID from a 32-bit Bluetooth assigned number.
    fn from_u32(v: u32) -> Self;

    /// Returns the 16-bit assigned number if this UUID is derived from the base UUID.
    fn try_to_u16(&self) -> Option<u16>;

    /// Returns the 32-bit assigned number if this UUID is derived from the base UUID.
    fn try_to_u32(&self) -> Option<u32>;
}

impl BluetoothUuidExt for Uuid {
    fn from_u16(v: u16) -> Self {
        Self::from_u32(v.into())
    }

    fn from_u32(v: u32) -> Self {
        Uuid::from_u128(BLUETOOTH_BASE_UUID | ((v as u128) << 96))
    }

    fn try_to_u16(&self) -> Option<u16> {
        let x = self.as_u128();
        ((x & BASE_MASK_16) == BLUETOOTH_BASE_UUID).then_some((x >> 96) as u16)
    }

    fn try_to_u32(&self) -> Option<u32> {
        let x = self.as_u128();
        ((x & BASE_MASK_32) == BLUETOOTH_BASE_UUID).then_some((x >> 96) as u32)
    }
}
