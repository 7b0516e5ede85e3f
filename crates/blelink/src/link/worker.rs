//! Per-link worker thread and command executor
//!
//! Every mutation of a link's queue and state happens on its worker. The
//! application and the stack only post [`WorkerMessage`]s; timers are serviced
//! between messages.

use super::command::{Command, CommandId, Opcode};
use super::observer::{ObserverDispatcher, PeripheralEvent};
use super::queue::{Advance, CommandQueue};
use super::state::{LinkShared, LinkState};
use super::timeout::{TimerKind, TimerQueue};
use crate::ccc::CccValue;
use crate::config::LinkConfig;
use crate::error::StackError;
use crate::stack::{BleStack, StackEvent};
use crate::status::GattStatus;
use crate::types::{BdAddr, BondState, Phy};
use log::{debug, trace, warn};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Instant;

pub(crate) enum WorkerMessage {
    Connect { auto_connect: bool },
    CancelConnection,
    Enqueue(Opcode),
    Event(StackEvent),
    Shutdown,
}

/// Handle the stack uses to deliver its asynchronous events to a link
#[derive(Debug, Clone)]
pub struct EventSink {
    address: BdAddr,
    sender: Sender<WorkerMessage>,
}

impl EventSink {
    pub(crate) fn new(address: BdAddr, sender: Sender<WorkerMessage>) -> Self {
        Self { address, sender }
    }

    /// Post an event to the link. Returns false once the link is gone.
    pub fn deliver(&self, event: StackEvent) -> bool {
        trace!("{}: stack event {:?}", self.address, event);
        self.sender.send(WorkerMessage::Event(event)).is_ok()
    }
}

impl std::fmt::Debug for WorkerMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerMessage::Connect { auto_connect } => {
                write!(f, "Connect {{ auto_connect: {} }}", auto_connect)
            }
            WorkerMessage::CancelConnection => write!(f, "CancelConnection"),
            WorkerMessage::Enqueue(opcode) => write!(f, "Enqueue({})", opcode.name()),
            WorkerMessage::Event(event) => write!(f, "Event({:?})", event),
            WorkerMessage::Shutdown => write!(f, "Shutdown"),
        }
    }
}

pub(crate) struct LinkWorker {
    pub(super) address: BdAddr,
    pub(super) stack: Arc<dyn BleStack>,
    pub(super) config: LinkConfig,
    pub(super) shared: Arc<LinkShared>,
    pub(super) state: LinkState,
    pub(super) queue: CommandQueue,
    pub(super) timers: TimerQueue,
    /// Payload of the in-flight write
    pub(super) pending_write: Option<Vec<u8>>,
    observer: ObserverDispatcher,
}

impl LinkWorker {
    pub(crate) fn new(
        address: BdAddr,
        stack: Arc<dyn BleStack>,
        config: LinkConfig,
        shared: Arc<LinkShared>,
        observer: ObserverDispatcher,
    ) -> Self {
        let queue = CommandQueue::new(config.max_tries);
        Self {
            address,
            stack,
            config,
            shared,
            state: LinkState::default(),
            queue,
            timers: TimerQueue::default(),
            pending_write: None,
            observer,
        }
    }

    pub(crate) fn run(mut self, receiver: Receiver<WorkerMessage>) {
        debug!("{}: link worker started", self.address);
        loop {
            let message = match self.timers.next_deadline() {
                Some(deadline) => {
                    let now = Instant::now();
                    if deadline <= now {
                        self.fire_timers(now);
                        continue;
                    }
                    match receiver.recv_timeout(deadline - now) {
                        Ok(message) => message,
                        Err(RecvTimeoutError::Timeout) => {
                            self.fire_timers(Instant::now());
                            continue;
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match receiver.recv() {
                    Ok(message) => message,
                    Err(_) => break,
                },
            };

            trace!("{}: worker message {:?}", self.address, message);
            match message {
                WorkerMessage::Connect { auto_connect } => self.connect(auto_connect),
                WorkerMessage::CancelConnection => self.cancel_connection(),
                WorkerMessage::Enqueue(opcode) => {
                    self.enqueue(opcode);
                }
                WorkerMessage::Event(event) => self.on_stack_event(event),
                WorkerMessage::Shutdown => break,
            }
        }

        self.shutdown();
    }

    fn fire_timers(&mut self, now: Instant) {
        for kind in self.timers.take_expired(now) {
            trace!("{}: timer {:?} expired", self.address, kind);
            self.on_timer(kind);
        }
    }

    fn shutdown(&mut self) {
        let dropped = self.queue.clear();
        debug!(
            "{}: link worker stopping ({} commands dropped)",
            self.address, dropped
        );
        if self.state.link_open {
            if let Err(e) = self.stack.disconnect() {
                debug!("{}: disconnect on shutdown failed: {}", self.address, e);
            }
            self.stack.close();
        }
    }

    pub(super) fn notify(&self, event: PeripheralEvent) {
        self.observer.notify(event);
    }

    /// Append a command and try to start it. Returns false if the link handle
    /// was released before the command arrived.
    pub(super) fn enqueue(&mut self, opcode: Opcode) -> bool {
        if !self.state.link_open {
            warn!(
                "{}: dropping {}, link is closed",
                self.address,
                opcode.name()
            );
            return false;
        }

        let id = self.queue.push(opcode);
        trace!("{}: queued {} ({} pending)", self.address, id, self.queue.len());
        self.advance();
        true
    }

    pub(super) fn advance(&mut self) {
        loop {
            let bonding = self.shared.bond_state() == BondState::Bonding;
            let command = match self.queue.advance(self.state.link_open, bonding) {
                Advance::Dispatch(command) => command,
                Advance::Drained(dropped) => {
                    warn!(
                        "{}: link handle gone, dropped {} commands",
                        self.address, dropped
                    );
                    return;
                }
                Advance::Deferred => {
                    debug!("{}: bonding in progress, holding queue", self.address);
                    return;
                }
                Advance::Idle | Advance::Busy => return,
            };

            debug!(
                "{}: dispatching {} (attempt {})",
                self.address, command, command.attempts
            );
            self.pending_write = command.opcode.payload().map(|p| p.to_vec());
            if let Some(value) = &self.pending_write {
                trace!("{}: payload {}", self.address, hex::encode(value));
            }

            match self.dispatch(&command) {
                Ok(true) => {
                    if let Some(timeout) = self.config.command_timeout {
                        self.timers.arm(TimerKind::CommandDeadline(command.id), timeout);
                    }
                    return;
                }
                Ok(false) => {
                    self.finish(command.id);
                }
                Err(e) => {
                    warn!("{}: dispatch of {} failed: {}", self.address, command, e);
                    self.report_failure(&command, GattStatus::Error);
                    self.finish(command.id);
                }
            }
        }
    }

    /// Submit a command to the stack. `Ok(true)` means a completion event is
    /// expected; `Ok(false)` means the command is already done.
    fn dispatch(&mut self, command: &Command) -> Result<bool, StackError> {
        match &command.opcode {
            Opcode::ReadCharacteristic { handle } => self.stack.read_characteristic(*handle)?,
            Opcode::WriteCharacteristic {
                handle,
                value,
                write_type,
            } => self.stack.write_characteristic(*handle, value, *write_type)?,
            Opcode::ReadDescriptor { handle } => self.stack.read_descriptor(*handle)?,
            Opcode::WriteDescriptor { handle, value } => {
                self.stack.write_descriptor(*handle, value)?
            }
            Opcode::SetNotify {
                characteristic,
                descriptor,
                value,
            } => {
                let enable = CccValue::from_bytes(value).is_some_and(CccValue::is_enabled);
                self.stack
                    .set_characteristic_notification(*characteristic, enable)?;
                self.stack.write_descriptor(*descriptor, value)?;
            }
            Opcode::ReadRssi => self.stack.read_remote_rssi()?,
            Opcode::RequestMtu { mtu } => self.stack.request_mtu(*mtu)?,
            Opcode::RequestConnectionPriority { priority } => {
                self.stack.request_connection_priority(*priority)?;
                self.notify(PeripheralEvent::ConnectionPriorityRequested {
                    priority: *priority,
                    status: GattStatus::Success,
                });
                return Ok(false);
            }
            Opcode::SetPhy { tx, rx, options } => self.stack.set_preferred_phy(*tx, *rx, *options)?,
            Opcode::ReadPhy => self.stack.read_phy()?,
            Opcode::CreateBond => {
                if self.shared.bond_state() == BondState::Bonded {
                    debug!("{}: already bonded", self.address);
                    self.notify(PeripheralEvent::BondingSucceeded);
                    return Ok(false);
                }
                self.stack.create_bond()?
            }
        }
        Ok(true)
    }

    fn finish(&mut self, id: CommandId) -> bool {
        self.timers.disarm(TimerKind::CommandDeadline(id));
        match self.queue.completed(id) {
            Some(command) => {
                trace!("{}: completed {}", self.address, command);
                self.pending_write = None;
                true
            }
            None => false,
        }
    }

    /// Single exit path for a dispatched command
    pub(super) fn completed_command(&mut self, id: CommandId) {
        if self.finish(id) {
            self.advance();
        } else {
            debug!("{}: ignoring completion of {}, not in flight", self.address, id);
        }
    }

    /// Report a terminal failure for `command` to the observer
    pub(super) fn report_failure(&mut self, command: &Command, status: GattStatus) {
        let event = match &command.opcode {
            Opcode::ReadCharacteristic { handle } => PeripheralEvent::CharacteristicRead {
                handle: *handle,
                value: Vec::new(),
                status,
            },
            Opcode::WriteCharacteristic { handle, value, .. } => {
                PeripheralEvent::CharacteristicWrite {
                    handle: *handle,
                    value: value.clone(),
                    status,
                }
            }
            Opcode::ReadDescriptor { handle } => PeripheralEvent::DescriptorRead {
                handle: *handle,
                value: Vec::new(),
                status,
            },
            Opcode::WriteDescriptor { handle, value } => PeripheralEvent::DescriptorWrite {
                handle: *handle,
                value: value.clone(),
                status,
            },
            Opcode::SetNotify { characteristic, .. } => PeripheralEvent::NotificationStateUpdated {
                handle: *characteristic,
                enabled: self.shared.is_notifying(*characteristic),
                status,
            },
            Opcode::ReadRssi => PeripheralEvent::RemoteRssi { rssi: 0, status },
            Opcode::RequestMtu { .. } => PeripheralEvent::MtuChanged {
                mtu: self.shared.mtu(),
                status,
            },
            Opcode::RequestConnectionPriority { priority } => {
                PeripheralEvent::ConnectionPriorityRequested {
                    priority: *priority,
                    status,
                }
            }
            Opcode::SetPhy { tx, rx, .. } => PeripheralEvent::PhyUpdated {
                tx: *tx,
                rx: *rx,
                status,
            },
            Opcode::ReadPhy => PeripheralEvent::PhyRead {
                tx: Phy::Le1M,
                rx: Phy::Le1M,
                status,
            },
            Opcode::CreateBond => PeripheralEvent::BondingFailed,
        };
        self.notify(event);
    }
}
