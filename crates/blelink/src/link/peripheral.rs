//! Application handle for one remote device

use super::command::Opcode;
use super::observer::{EventCallback, ObserverDispatcher};
use super::state::LinkShared;
use super::worker::{EventSink, LinkWorker, WorkerMessage};
use crate::ccc::CccValue;
use crate::config::LinkConfig;
use crate::constants::{DEFAULT_MTU, MAX_MTU};
use crate::error::{LinkError, LinkResult};
use crate::stack::BleStack;
use crate::types::{
    BdAddr, BondState, Characteristic, CharacteristicProperties, ConnectionPriority,
    ConnectionState, Descriptor, Phy, PhyOptions, Service, Uuid, WriteType,
};
use log::{debug, info};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;

/// A remote peripheral and the serialized link to it
///
/// Cloning is cheap and every clone refers to the same link. Operations are
/// validated immediately and then executed one at a time on the link's
/// worker; their results arrive as [`PeripheralEvent`](crate::PeripheralEvent)s.
/// The link is torn down when the last clone is dropped.
#[derive(Clone)]
pub struct Peripheral {
    inner: Arc<PeripheralInner>,
}

struct PeripheralInner {
    address: BdAddr,
    stack: Arc<dyn BleStack>,
    config: LinkConfig,
    shared: Arc<LinkShared>,
    sender: Sender<WorkerMessage>,
}

impl Drop for PeripheralInner {
    fn drop(&mut self) {
        debug!("{}: releasing peripheral", self.address);
        let _ = self.sender.send(WorkerMessage::Shutdown);
    }
}

impl std::fmt::Debug for Peripheral {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peripheral")
            .field("address", &self.inner.address)
            .field("state", &self.connection_state())
            .field("bond_state", &self.bond_state())
            .field("mtu", &self.mtu())
            .finish()
    }
}

impl Peripheral {
    /// Create the link for `address` and start its worker
    pub fn new(
        address: BdAddr,
        stack: Arc<dyn BleStack>,
        config: LinkConfig,
        callback: EventCallback,
    ) -> LinkResult<Self> {
        let shared = Arc::new(LinkShared::new(stack.bond_state()));
        let observer = ObserverDispatcher::spawn(format!("blelink-events-{}", address), callback)
            .map_err(|e| LinkError::Worker(e.to_string()))?;

        let (sender, receiver) = mpsc::channel();
        let worker = LinkWorker::new(
            address,
            stack.clone(),
            config.clone(),
            shared.clone(),
            observer,
        );
        thread::Builder::new()
            .name(format!("blelink-{}", address))
            .spawn(move || worker.run(receiver))
            .map_err(|e| LinkError::Worker(e.to_string()))?;

        info!("{}: peripheral created", address);
        Ok(Self {
            inner: Arc::new(PeripheralInner {
                address,
                stack,
                config,
                shared,
                sender,
            }),
        })
    }

    /// Handle for the stack to post completion events to this link
    pub fn event_sink(&self) -> EventSink {
        EventSink::new(self.inner.address, self.inner.sender.clone())
    }

    pub fn address(&self) -> BdAddr {
        self.inner.address
    }

    pub fn name(&self) -> Option<String> {
        self.inner.stack.name()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.shared.connection_state()
    }

    pub fn bond_state(&self) -> BondState {
        self.inner.shared.bond_state()
    }

    pub fn mtu(&self) -> u16 {
        self.inner.shared.mtu()
    }

    pub fn services(&self) -> Vec<Service> {
        self.inner.stack.services()
    }

    pub fn characteristic(&self, service: &Uuid, characteristic: &Uuid) -> Option<Characteristic> {
        self.services()
            .iter()
            .filter(|s| s.uuid.matches(service))
            .find_map(|s| s.characteristic(characteristic).cloned())
    }

    pub fn is_notifying(&self, characteristic: &Characteristic) -> bool {
        self.inner.shared.is_notifying(characteristic.handle)
    }

    /// Value handles of all characteristics with notifications enabled
    pub fn notifying_characteristics(&self) -> Vec<u16> {
        self.inner.shared.notifying()
    }

    /// Start a connection attempt
    ///
    /// Returns [`LinkError::NotDisconnected`] unless the link is idle. The
    /// check sees the state the worker last published, so a second request
    /// made before the worker has picked up the first can still return `Ok`.
    /// The worker starts at most one attempt and drops the surplus request;
    /// only one sequence of connection events follows.
    pub fn connect(&self) -> LinkResult<()> {
        self.start_connect(false)
    }

    /// Connect whenever the device becomes reachable. Admission works as for
    /// [`connect`](Self::connect).
    pub fn auto_connect(&self) -> LinkResult<()> {
        self.start_connect(true)
    }

    fn start_connect(&self, auto_connect: bool) -> LinkResult<()> {
        if self.connection_state() != ConnectionState::Disconnected {
            return Err(LinkError::NotDisconnected);
        }
        self.post(WorkerMessage::Connect { auto_connect })
    }

    /// Abort a pending connection attempt or disconnect an established link
    pub fn cancel_connection(&self) -> LinkResult<()> {
        if self.connection_state() == ConnectionState::Disconnected {
            return Err(LinkError::NotConnected);
        }
        self.post(WorkerMessage::CancelConnection)
    }

    /// Bond with the device. While connected the request is queued behind
    /// other commands; otherwise it is handed to the stack directly.
    pub fn create_bond(&self) -> LinkResult<()> {
        if self.connection_state() == ConnectionState::Connected {
            return self.enqueue(Opcode::CreateBond);
        }
        info!("{}: bonding while not connected", self.inner.address);
        self.inner.stack.create_bond()?;
        Ok(())
    }

    pub fn read_characteristic(&self, characteristic: &Characteristic) -> LinkResult<()> {
        self.require_connected()?;
        let characteristic = self.lookup_characteristic(characteristic.handle)?;
        require_property(&characteristic, CharacteristicProperties::READ)?;

        self.enqueue(Opcode::ReadCharacteristic {
            handle: characteristic.handle,
        })
    }

    pub fn write_characteristic(
        &self,
        characteristic: &Characteristic,
        value: &[u8],
        write_type: WriteType,
    ) -> LinkResult<()> {
        self.require_connected()?;
        let characteristic = self.lookup_characteristic(characteristic.handle)?;
        require_property(&characteristic, write_type.required_property())?;
        self.check_value(value, write_type.max_value_length(self.mtu()))?;

        self.enqueue(Opcode::WriteCharacteristic {
            handle: characteristic.handle,
            value: value.to_vec(),
            write_type,
        })
    }

    pub fn read_descriptor(&self, descriptor: &Descriptor) -> LinkResult<()> {
        self.require_connected()?;
        let (_, descriptor) = self.lookup_descriptor(descriptor.handle)?;

        self.enqueue(Opcode::ReadDescriptor {
            handle: descriptor.handle,
        })
    }

    /// Write a descriptor value. The CCC descriptor is managed by
    /// [`set_notify`](Self::set_notify) and cannot be written here.
    pub fn write_descriptor(&self, descriptor: &Descriptor, value: &[u8]) -> LinkResult<()> {
        self.require_connected()?;
        let (_, descriptor) = self.lookup_descriptor(descriptor.handle)?;
        if descriptor.is_ccc() {
            return Err(LinkError::CccWriteNotAllowed(descriptor.handle));
        }
        self.check_value(value, WriteType::WithResponse.max_value_length(self.mtu()))?;

        self.enqueue(Opcode::WriteDescriptor {
            handle: descriptor.handle,
            value: value.to_vec(),
        })
    }

    /// Enable or disable notifications. Notify is preferred over indicate
    /// when the characteristic supports both.
    pub fn set_notify(&self, characteristic: &Characteristic, enable: bool) -> LinkResult<()> {
        self.require_connected()?;
        let characteristic = self.lookup_characteristic(characteristic.handle)?;
        let properties = characteristic.properties;
        let notifiable = CharacteristicProperties::NOTIFY | CharacteristicProperties::INDICATE;
        if !properties.intersects(notifiable) {
            return Err(LinkError::unsupported(characteristic.handle, notifiable));
        }

        let value = if !enable {
            CccValue::Disable
        } else if properties.contains(CharacteristicProperties::NOTIFY) {
            CccValue::Notify
        } else {
            CccValue::Indicate
        };

        let descriptor = characteristic
            .ccc_descriptor()
            .ok_or(LinkError::MissingCccDescriptor(characteristic.handle))?;

        if enable && !self.inner.shared.is_notifying(characteristic.handle) {
            let max = self.inner.config.max_notifying;
            if self.inner.shared.notifying().len() >= max {
                return Err(LinkError::TooManyNotifying(max));
            }
        }

        self.enqueue(Opcode::SetNotify {
            characteristic: characteristic.handle,
            descriptor: descriptor.handle,
            value: value.to_bytes().to_vec(),
        })
    }

    pub fn read_remote_rssi(&self) -> LinkResult<()> {
        self.require_connected()?;
        self.enqueue(Opcode::ReadRssi)
    }

    pub fn request_mtu(&self, mtu: u16) -> LinkResult<()> {
        self.require_connected()?;
        if !(DEFAULT_MTU..=MAX_MTU).contains(&mtu) {
            return Err(LinkError::InvalidArgument(format!(
                "mtu {} outside {}..={}",
                mtu, DEFAULT_MTU, MAX_MTU
            )));
        }
        self.enqueue(Opcode::RequestMtu { mtu })
    }

    pub fn request_connection_priority(&self, priority: ConnectionPriority) -> LinkResult<()> {
        self.require_connected()?;
        if !self.inner.config.profile.supports_connection_priority {
            return Err(LinkError::Unsupported("connection priority"));
        }
        self.enqueue(Opcode::RequestConnectionPriority { priority })
    }

    pub fn set_preferred_phy(&self, tx: Phy, rx: Phy, options: PhyOptions) -> LinkResult<()> {
        self.require_connected()?;
        if !self.inner.config.profile.supports_phy {
            return Err(LinkError::Unsupported("phy selection"));
        }
        self.enqueue(Opcode::SetPhy { tx, rx, options })
    }

    pub fn read_phy(&self) -> LinkResult<()> {
        self.require_connected()?;
        if !self.inner.config.profile.supports_phy {
            return Err(LinkError::Unsupported("phy selection"));
        }
        self.enqueue(Opcode::ReadPhy)
    }

    fn enqueue(&self, opcode: Opcode) -> LinkResult<()> {
        debug!("{}: enqueue {}", self.inner.address, opcode.name());
        self.post(WorkerMessage::Enqueue(opcode))
    }

    fn post(&self, message: WorkerMessage) -> LinkResult<()> {
        self.inner.sender.send(message).map_err(|_| LinkError::Closed)
    }

    fn require_connected(&self) -> LinkResult<()> {
        if self.connection_state() != ConnectionState::Connected {
            return Err(LinkError::NotConnected);
        }
        Ok(())
    }

    fn lookup_characteristic(&self, handle: u16) -> LinkResult<Characteristic> {
        self.services()
            .into_iter()
            .flat_map(|s| s.characteristics)
            .find(|c| c.handle == handle)
            .ok_or(LinkError::CharacteristicNotFound(handle))
    }

    fn lookup_descriptor(&self, handle: u16) -> LinkResult<(Characteristic, Descriptor)> {
        self.services()
            .into_iter()
            .flat_map(|s| s.characteristics)
            .find_map(|c| {
                let descriptor = c.descriptors.iter().find(|d| d.handle == handle).cloned();
                descriptor.map(|d| (c, d))
            })
            .ok_or(LinkError::DescriptorNotFound(handle))
    }

    fn check_value(&self, value: &[u8], max: usize) -> LinkResult<()> {
        if value.is_empty() {
            return Err(LinkError::EmptyValue);
        }
        if value.len() > max {
            return Err(LinkError::ValueTooLong {
                length: value.len(),
                max,
            });
        }
        Ok(())
    }
}

fn require_property(
    characteristic: &Characteristic,
    required: CharacteristicProperties,
) -> LinkResult<()> {
    if !characteristic.properties.contains(required) {
        return Err(LinkError::unsupported(characteristic.handle, required));
    }
    Ok(())
}
