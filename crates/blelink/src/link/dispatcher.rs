//! Routing of stack events
//!
//! Connection, bond and discovery events drive the state machine. Completions
//! are matched against the in-flight command and end it through either
//! [`LinkWorker::completed_command`] or [`LinkWorker::retry_command`]. Events
//! that match nothing in flight are reported to the observer only.

use super::command::{CommandId, Opcode};
use super::observer::PeripheralEvent;
use super::worker::LinkWorker;
use crate::ccc::CccValue;
use crate::stack::StackEvent;
use crate::status::GattStatus;
use log::{debug, info, trace, warn};

impl LinkWorker {
    pub(super) fn on_stack_event(&mut self, event: StackEvent) {
        match event {
            StackEvent::ConnectionStateChanged { connected, status } => {
                self.on_connection_state_changed(connected, status)
            }
            StackEvent::ServicesDiscovered { status } => self.on_services_discovered(status),
            StackEvent::BondStateChanged(bond_state) => self.on_bond_state_changed(bond_state),
            StackEvent::CharacteristicChanged { handle, value } => {
                trace!(
                    "{}: 0x{:04x} changed: {}",
                    self.address,
                    handle,
                    hex::encode(&value)
                );
                self.notify(PeripheralEvent::CharacteristicChanged { handle, value });
            }
            StackEvent::CharacteristicRead {
                handle,
                value,
                status,
            } => {
                let Some(id) = self.in_flight(
                    |op| matches!(op, Opcode::ReadCharacteristic { handle: h } if *h == handle),
                ) else {
                    return self.unmatched("characteristic read", handle);
                };
                self.resolve(id, status, PeripheralEvent::CharacteristicRead {
                    handle,
                    value,
                    status,
                });
            }
            StackEvent::CharacteristicWrite { handle, status } => {
                let Some(id) = self.in_flight(|op| {
                    matches!(op, Opcode::WriteCharacteristic { handle: h, .. } if *h == handle)
                }) else {
                    return self.unmatched("characteristic write", handle);
                };
                let value = self.pending_write.clone().unwrap_or_default();
                self.resolve(id, status, PeripheralEvent::CharacteristicWrite {
                    handle,
                    value,
                    status,
                });
            }
            StackEvent::DescriptorRead {
                handle,
                value,
                status,
            } => {
                let Some(id) = self.in_flight(
                    |op| matches!(op, Opcode::ReadDescriptor { handle: h } if *h == handle),
                ) else {
                    return self.unmatched("descriptor read", handle);
                };
                self.resolve(id, status, PeripheralEvent::DescriptorRead {
                    handle,
                    value,
                    status,
                });
            }
            StackEvent::DescriptorWrite { handle, status } => {
                self.on_descriptor_write(handle, status)
            }
            StackEvent::RemoteRssi { rssi, status } => {
                let Some(id) = self.in_flight(|op| *op == Opcode::ReadRssi) else {
                    debug!("{}: unsolicited rssi {}", self.address, rssi);
                    return;
                };
                self.notify(PeripheralEvent::RemoteRssi { rssi, status });
                self.completed_command(id);
            }
            StackEvent::MtuChanged { mtu, status } => {
                if status.is_success() {
                    info!("{}: mtu is now {}", self.address, mtu);
                    self.shared.set_mtu(mtu);
                }
                self.notify(PeripheralEvent::MtuChanged { mtu, status });
                if let Some(id) = self.in_flight(|op| matches!(op, Opcode::RequestMtu { .. })) {
                    self.completed_command(id);
                }
            }
            StackEvent::PhyUpdated { tx, rx, status } => {
                debug!("{}: phy tx {:?} rx {:?} ({})", self.address, tx, rx, status);
                self.notify(PeripheralEvent::PhyUpdated { tx, rx, status });
                if let Some(id) = self.in_flight(|op| matches!(op, Opcode::SetPhy { .. })) {
                    self.completed_command(id);
                }
            }
            StackEvent::PhyRead { tx, rx, status } => {
                let Some(id) = self.in_flight(|op| *op == Opcode::ReadPhy) else {
                    debug!("{}: unsolicited phy read", self.address);
                    return;
                };
                self.notify(PeripheralEvent::PhyRead { tx, rx, status });
                self.completed_command(id);
            }
            StackEvent::ConnectionUpdated {
                interval,
                latency,
                timeout,
                status,
            } => {
                debug!(
                    "{}: connection updated (interval {}, latency {}, timeout {})",
                    self.address, interval, latency, timeout
                );
                self.notify(PeripheralEvent::ConnectionUpdated {
                    interval,
                    latency,
                    timeout,
                    status,
                });
            }
        }
    }

    fn in_flight(&self, matches: impl Fn(&Opcode) -> bool) -> Option<CommandId> {
        self.queue
            .in_flight()
            .filter(|command| matches(&command.opcode))
            .map(|command| command.id)
    }

    fn unmatched(&self, what: &str, handle: u16) {
        warn!(
            "{}: {} on 0x{:04x} does not match the command in flight",
            self.address, what, handle
        );
    }

    /// Report the outcome of the in-flight command, or hand it to the retry
    /// controller if the failure is bonding related
    fn resolve(&mut self, id: CommandId, status: GattStatus, event: PeripheralEvent) {
        let retry = self
            .queue
            .in_flight()
            .is_some_and(|command| self.should_retry(&command.opcode, status));
        if retry {
            self.retry_command(id, status);
            return;
        }

        if !status.is_success() {
            warn!("{}: {} failed: {}", self.address, id, status);
        }
        self.notify(event);
        self.completed_command(id);
    }

    fn on_descriptor_write(&mut self, handle: u16, status: GattStatus) {
        let Some(command) = self.queue.in_flight().cloned() else {
            return self.unmatched("descriptor write", handle);
        };

        let value = self.pending_write.clone().unwrap_or_default();
        match command.opcode {
            Opcode::WriteDescriptor { handle: h, .. } if h == handle => {
                self.resolve(command.id, status, PeripheralEvent::DescriptorWrite {
                    handle,
                    value,
                    status,
                });
            }
            Opcode::SetNotify {
                characteristic,
                descriptor,
                ..
            } if descriptor == handle => {
                if status.is_success() {
                    if let Some(ccc) = CccValue::from_bytes(&value) {
                        self.shared.set_notifying(characteristic, ccc.is_enabled());
                    }
                }
                let enabled = self.shared.is_notifying(characteristic);
                info!(
                    "{}: notify on 0x{:04x} {} ({})",
                    self.address,
                    characteristic,
                    if enabled { "enabled" } else { "disabled" },
                    status
                );
                self.resolve(command.id, status, PeripheralEvent::NotificationStateUpdated {
                    handle: characteristic,
                    enabled,
                    status,
                });
            }
            _ => self.unmatched("descriptor write", handle),
        }
    }

    /// End an in-flight create-bond, or resume a queue held back by bonding
    pub(super) fn finish_bond_command(&mut self) {
        let deferred = self.queue.take_deferred();
        match self.in_flight(|op| *op == Opcode::CreateBond) {
            Some(id) => self.completed_command(id),
            None if deferred => self.advance(),
            None => {}
        }
    }
}
