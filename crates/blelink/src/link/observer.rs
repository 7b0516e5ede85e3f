//! Application-facing events
//!
//! Events are handed to the application callback on a dedicated thread, so a
//! slow callback never holds up the command queue.

use crate::status::{GattStatus, HciStatus};
use crate::types::{ConnectionPriority, Phy};
use log::trace;
use std::io;
use std::sync::mpsc;
use std::thread;

/// Event delivered to the application for every state transition and every
/// completed operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralEvent {
    /// Connected and services discovered
    Connected,
    ConnectFailed {
        status: HciStatus,
    },
    Disconnected {
        status: HciStatus,
    },
    BondingStarted,
    BondingSucceeded,
    BondingFailed,
    BondLost,
    CharacteristicRead {
        handle: u16,
        value: Vec<u8>,
        status: GattStatus,
    },
    /// `value` is the payload that was sent, not the stack's echo
    CharacteristicWrite {
        handle: u16,
        value: Vec<u8>,
        status: GattStatus,
    },
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
        value: Vec<u8>,
        status: GattStatus,
    },
    NotificationStateUpdated {
        handle: u16,
        enabled: bool,
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
    ConnectionPriorityRequested {
        priority: ConnectionPriority,
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

/// Application callback receiving [`PeripheralEvent`]s
pub type EventCallback = Box<dyn FnMut(PeripheralEvent) + Send + 'static>;

/// Forwards events to the callback thread
#[derive(Debug)]
pub(crate) struct ObserverDispatcher {
    sender: mpsc::Sender<PeripheralEvent>,
}

impl ObserverDispatcher {
    pub(crate) fn spawn(name: String, mut callback: EventCallback) -> io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<PeripheralEvent>();
        thread::Builder::new().name(name).spawn(move || {
            for event in receiver {
                callback(event);
            }
        })?;
        Ok(Self { sender })
    }

    pub(crate) fn notify(&self, event: PeripheralEvent) {
        if let Err(mpsc::SendError(event)) = self.sender.send(event) {
            trace!("Observer gone, dropping {:?}", event);
        }
    }
}
