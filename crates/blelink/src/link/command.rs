//! Queued commands

use crate::types::{ConnectionPriority, Phy, PhyOptions, WriteType};
use std::fmt;

/// Identifier assigned to a command when it is queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(pub(crate) u64);

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Operation to perform against the remote device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opcode {
    ReadCharacteristic {
        handle: u16,
    },
    WriteCharacteristic {
        handle: u16,
        value: Vec<u8>,
        write_type: WriteType,
    },
    ReadDescriptor {
        handle: u16,
    },
    WriteDescriptor {
        handle: u16,
        value: Vec<u8>,
    },
    SetNotify {
        characteristic: u16,
        descriptor: u16,
        value: Vec<u8>,
    },
    ReadRssi,
    RequestMtu {
        mtu: u16,
    },
    RequestConnectionPriority {
        priority: ConnectionPriority,
    },
    SetPhy {
        tx: Phy,
        rx: Phy,
        options: PhyOptions,
    },
    ReadPhy,
    CreateBond,
}

impl Opcode {
    pub fn name(&self) -> &'static str {
        match self {
            Opcode::ReadCharacteristic { .. } => "read-characteristic",
            Opcode::WriteCharacteristic { .. } => "write-characteristic",
            Opcode::ReadDescriptor { .. } => "read-descriptor",
            Opcode::WriteDescriptor { .. } => "write-descriptor",
            Opcode::SetNotify { .. } => "set-notify",
            Opcode::ReadRssi => "read-rssi",
            Opcode::RequestMtu { .. } => "request-mtu",
            Opcode::RequestConnectionPriority { .. } => "request-connection-priority",
            Opcode::SetPhy { .. } => "set-phy",
            Opcode::ReadPhy => "read-phy",
            Opcode::CreateBond => "create-bond",
        }
    }

    /// Attribute handle the command targets, if any
    pub fn target(&self) -> Option<u16> {
        match self {
            Opcode::ReadCharacteristic { handle }
            | Opcode::WriteCharacteristic { handle, .. }
            | Opcode::ReadDescriptor { handle }
            | Opcode::WriteDescriptor { handle, .. } => Some(*handle),
            Opcode::SetNotify { descriptor, .. } => Some(*descriptor),
            _ => None,
        }
    }

    /// Bytes to send, retained as the pending write buffer while in flight
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Opcode::WriteCharacteristic { value, .. }
            | Opcode::WriteDescriptor { value, .. }
            | Opcode::SetNotify { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Commands whose failure may be caused by a bond that is still forming
    pub fn retries_on_bonding(&self) -> bool {
        matches!(
            self,
            Opcode::ReadCharacteristic { .. }
                | Opcode::WriteCharacteristic { .. }
                | Opcode::ReadDescriptor { .. }
                | Opcode::WriteDescriptor { .. }
                | Opcode::SetNotify { .. }
        )
    }
}

/// A unit of work against the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub id: CommandId,
    pub opcode: Opcode,
    /// Number of times this command has been dispatched
    pub attempts: u8,
}

impl Command {
    pub(crate) fn new(id: CommandId, opcode: Opcode) -> Self {
        Self {
            id,
            opcode,
            attempts: 0,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.opcode.target() {
            Some(handle) => write!(f, "{} {} on 0x{:04x}", self.id, self.opcode.name(), handle),
            None => write!(f, "{} {}", self.id, self.opcode.name()),
        }
    }
}
