//! Common types for link operations
//!
//! Addresses, UUIDs, the GATT service tree reported by the stack, and the
//! small enums used by connection, bonding, write and PHY requests.

use crate::constants::*;
use std::fmt;

/// Bluetooth device address, stored little-endian
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BdAddr {
    pub bytes: [u8; 6],
}

impl BdAddr {
    pub fn new(bytes: [u8; 6]) -> Self {
        Self { bytes }
    }

    /// Parse the `XX:XX:XX:XX:XX:XX` form, most significant byte first
    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return None;
        }

        let mut bytes = [0u8; 6];
        for (i, part) in parts.iter().enumerate() {
            bytes[5 - i] = u8::from_str_radix(part, 16).ok()?;
        }
        Some(Self { bytes })
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.bytes[5],
            self.bytes[4],
            self.bytes[3],
            self.bytes[2],
            self.bytes[1],
            self.bytes[0]
        )
    }
}

/// UUID for GATT attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Uuid {
    /// 16-bit SIG-assigned UUID
    Uuid16(u16),
    /// Full 128-bit UUID, little-endian
    Uuid128([u8; 16]),
}

impl Uuid {
    /// Bluetooth base UUID, little-endian, with the 16-bit slot zeroed
    const BASE: [u8; 16] = [
        0xFB, 0x34, 0x9B, 0x5F, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00,
    ];

    pub fn from_u16(uuid: u16) -> Self {
        Uuid::Uuid16(uuid)
    }

    pub fn from_u128(uuid: u128) -> Self {
        Uuid::Uuid128(uuid.to_le_bytes())
    }

    /// Expand to the full 128-bit form so 16-bit and 128-bit spellings compare equal
    pub fn to_u128(&self) -> u128 {
        match self {
            Uuid::Uuid16(short) => {
                let mut bytes = Self::BASE;
                bytes[12..14].copy_from_slice(&short.to_le_bytes());
                u128::from_le_bytes(bytes)
            }
            Uuid::Uuid128(bytes) => u128::from_le_bytes(*bytes),
        }
    }

    pub fn matches(&self, other: &Uuid) -> bool {
        self.to_u128() == other.to_u128()
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Uuid::Uuid16(uuid) => write!(f, "{:04x}", uuid),
            Uuid::Uuid128(_) => {
                let v = self.to_u128();
                write!(
                    f,
                    "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
                    (v >> 96) as u32,
                    (v >> 80) as u16,
                    (v >> 64) as u16,
                    (v >> 48) as u16,
                    v & 0xFFFF_FFFF_FFFF
                )
            }
        }
    }
}

bitflags::bitflags! {
    /// Characteristic properties as declared by the remote device
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CharacteristicProperties: u8 {
        const BROADCAST = 0x01;
        const READ = 0x02;
        const WRITE_WITHOUT_RESPONSE = 0x04;
        const WRITE = 0x08;
        const NOTIFY = 0x10;
        const INDICATE = 0x20;
        const AUTHENTICATED_SIGNED_WRITES = 0x40;
        const EXTENDED_PROPERTIES = 0x80;
    }
}

/// A GATT descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub uuid: Uuid,
    pub handle: u16,
}

impl Descriptor {
    pub fn is_ccc(&self) -> bool {
        self.uuid.matches(&Uuid::from_u16(CCC_DESCRIPTOR_UUID))
    }
}

/// A GATT characteristic with its descriptors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: Uuid,
    /// Value handle, used as the characteristic's identity on the link
    pub handle: u16,
    pub properties: CharacteristicProperties,
    pub descriptors: Vec<Descriptor>,
}

impl Characteristic {
    pub fn descriptor(&self, uuid: &Uuid) -> Option<&Descriptor> {
        self.descriptors.iter().find(|d| d.uuid.matches(uuid))
    }

    pub fn ccc_descriptor(&self) -> Option<&Descriptor> {
        self.descriptors.iter().find(|d| d.is_ccc())
    }
}

/// A GATT service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub uuid: Uuid,
    pub is_primary: bool,
    pub characteristics: Vec<Characteristic>,
}

impl Service {
    pub fn characteristic(&self, uuid: &Uuid) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| c.uuid.matches(uuid))
    }
}

/// Connection phase of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Disconnecting = 3,
}

impl ConnectionState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Disconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Bond state of the remote device, tracked independently of the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BondState {
    NotBonded = 0,
    Bonding = 1,
    Bonded = 2,
}

impl BondState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => BondState::Bonding,
            2 => BondState::Bonded,
            _ => BondState::NotBonded,
        }
    }
}

/// Transport used when opening the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    #[default]
    Auto,
    BrEdr,
    Le,
}

/// How a characteristic value is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    WithResponse,
    WithoutResponse,
    Signed,
}

impl WriteType {
    pub(crate) fn required_property(&self) -> CharacteristicProperties {
        match self {
            WriteType::WithResponse => CharacteristicProperties::WRITE,
            WriteType::WithoutResponse => CharacteristicProperties::WRITE_WITHOUT_RESPONSE,
            WriteType::Signed => CharacteristicProperties::AUTHENTICATED_SIGNED_WRITES,
        }
    }

    /// Largest value accepted for this write type at the given MTU
    pub fn max_value_length(&self, mtu: u16) -> usize {
        let mtu = mtu as usize;
        match self {
            WriteType::WithResponse => MAX_LONG_WRITE_LENGTH,
            WriteType::WithoutResponse => mtu.saturating_sub(WRITE_HEADER_LENGTH),
            WriteType::Signed => mtu.saturating_sub(SIGNED_WRITE_OVERHEAD),
        }
    }
}

/// Connection priority hint passed to the stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPriority {
    Balanced,
    High,
    LowPower,
}

/// Physical layer mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phy {
    Le1M,
    Le2M,
    LeCoded,
}

/// Coding preference when requesting the coded PHY
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhyOptions {
    #[default]
    NoPreferred,
    S2,
    S8,
}
