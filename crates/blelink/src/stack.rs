//! Boundary to the platform Bluetooth stack
//!
//! The link never talks to hardware directly. Every request goes through a
//! [`BleStack`] submission that returns immediately; the outcome arrives later
//! as a [`StackEvent`] posted through the link's [`EventSink`](crate::EventSink).

use crate::error::StackError;
use crate::status::{GattStatus, HciStatus};
use crate::types::{
    BdAddr, BondState, ConnectionPriority, Phy, PhyOptions, Service, Transport, WriteType,
};

/// Non-blocking primitives offered by the platform stack for one remote device
///
/// An `Err` from a submission means the request was never started and no
/// completion event will follow.
pub trait BleStack: Send + Sync {
    fn connect(&self, address: BdAddr, auto_connect: bool, transport: Transport)
        -> Result<(), StackError>;

    fn disconnect(&self) -> Result<(), StackError>;

    /// Release the link handle after a disconnect has completed
    fn close(&self) {}

    fn discover_services(&self) -> Result<(), StackError>;

    fn read_characteristic(&self, handle: u16) -> Result<(), StackError>;

    fn write_characteristic(
        &self,
        handle: u16,
        value: &[u8],
        write_type: WriteType,
    ) -> Result<(), StackError>;

    fn read_descriptor(&self, handle: u16) -> Result<(), StackError>;

    fn write_descriptor(&self, handle: u16, value: &[u8]) -> Result<(), StackError>;

    /// Local registration for notifications; no completion event
    fn set_characteristic_notification(&self, handle: u16, enable: bool)
        -> Result<(), StackError>;

    fn read_remote_rssi(&self) -> Result<(), StackError>;

    fn request_mtu(&self, mtu: u16) -> Result<(), StackError>;

    /// Fire-and-forget; the stack may later report a connection update
    fn request_connection_priority(&self, priority: ConnectionPriority) -> Result<(), StackError>;

    fn set_preferred_phy(&self, tx: Phy, rx: Phy, options: PhyOptions) -> Result<(), StackError>;

    fn read_phy(&self) -> Result<(), StackError>;

    fn create_bond(&self) -> Result<(), StackError>;

    /// Service tree from the last successful discovery
    fn services(&self) -> Vec<Service>;

    fn bond_state(&self) -> BondState;

    fn name(&self) -> Option<String>;
}

/// Asynchronous event raised by the stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackEvent {
    ConnectionStateChanged {
        connected: bool,
        status: HciStatus,
    },
    ServicesDiscovered {
        status: GattStatus,
    },
    BondStateChanged(BondState),
    CharacteristicRead {
        handle: u16,
        value: Vec<u8>,
        status: GattStatus,
    },
    CharacteristicWrite {
        handle: u16,
        status: GattStatus,
    },
    /// Unsolicited notification or indication
    CharacteristicChanged {
        handle: u16,
        value: Vec<u8>,
    },
    DescriptorRead {
        handle: u16,
        value: Vec<u8>,
        status: GattStatus,
    },
    DescriptorWrite {
        handle: u16,
        status: GattStatus,
    },
    RemoteRssi {
        rssi: i16,
        status: GattStatus,
    },
    MtuChanged {
        mtu: u16,
        status: GattStatus,
    },
    PhyUpdated {
        tx: Phy,
        rx: Phy,
        status: GattStatus,
    },
    PhyRead {
        tx: Phy,
        rx: Phy,
        status: GattStatus,
    },
    ConnectionUpdated {
        interval: u16,
        latency: u16,
        timeout: u16,
        status: GattStatus,
    },
}
