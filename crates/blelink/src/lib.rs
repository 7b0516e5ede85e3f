//! blelink - Serialized GATT command execution for BLE peripherals
//!
//! A [`Peripheral`] wraps one remote device. It validates every request up
//! front, runs accepted requests strictly one at a time against a
//! [`BleStack`], drives the connect, discover and bond lifecycle, and reports
//! every outcome as a [`PeripheralEvent`] on a callback thread.

pub mod ccc;
pub mod config;
pub mod constants;
pub mod error;
pub mod link;
pub mod stack;
pub mod status;
pub mod types;

pub use ccc::CccValue;
pub use config::{LinkConfig, Manufacturer, StackProfile};
pub use error::{LinkError, LinkResult, StackError};
pub use link::{Command, CommandId, EventCallback, EventSink, Opcode, Peripheral, PeripheralEvent};
pub use stack::{BleStack, StackEvent};
pub use status::{GattStatus, HciStatus};
pub use types::{
    BdAddr, BondState, Characteristic, CharacteristicProperties, ConnectionPriority,
    ConnectionState, Descriptor, Phy, PhyOptions, Service, Transport, Uuid, WriteType,
};
