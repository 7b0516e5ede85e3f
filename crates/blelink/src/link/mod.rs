//! Peripheral link management
//!
//! This module owns the per-device command queue, the connection state
//! machine and the routing of stack events back to queued commands.

mod command;
mod dispatcher;
mod observer;
mod peripheral;
mod queue;
mod retry;
mod state;
mod timeout;
mod worker;

#[cfg(test)]
mod tests;

pub use command::{Command, CommandId, Opcode};
pub use observer::{EventCallback, PeripheralEvent};
pub use peripheral::Peripheral;
pub use worker::EventSink;
