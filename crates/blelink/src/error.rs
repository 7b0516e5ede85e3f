//! Error types for the blelink library
//!
//! Admission errors are returned synchronously by [`Peripheral`](crate::Peripheral)
//! operations; nothing that fails admission ever reaches the command queue.

use crate::types::CharacteristicProperties;
use thiserror::Error;

/// Errors raised when an operation is rejected before it is queued
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Peripheral not connected")]
    NotConnected,

    #[error("Peripheral is not disconnected")]
    NotDisconnected,

    #[error("Characteristic {0} not found")]
    CharacteristicNotFound(u16),

    #[error("Descriptor {0} not found")]
    DescriptorNotFound(u16),

    #[error("Characteristic {handle} does not support {required:?}")]
    UnsupportedProperty {
        handle: u16,
        required: CharacteristicProperties,
    },

    #[error("Characteristic {0} has no client characteristic configuration descriptor")]
    MissingCccDescriptor(u16),

    #[error("Use set_notify to change the notification state of characteristic {0}")]
    CccWriteNotAllowed(u16),

    #[error("Value is empty")]
    EmptyValue,

    #[error("Value length {length} exceeds maximum of {max}")]
    ValueTooLong { length: usize, max: usize },

    #[error("Too many notifying characteristics (max {0})")]
    TooManyNotifying(usize),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation not supported by this stack: {0}")]
    Unsupported(&'static str),

    #[error("Stack rejected request: {0}")]
    Stack(#[from] StackError),

    #[error("Link has been closed")]
    Closed,

    #[error("Failed to start link worker: {0}")]
    Worker(String),
}

impl LinkError {
    pub(crate) fn unsupported(handle: u16, required: CharacteristicProperties) -> Self {
        LinkError::UnsupportedProperty { handle, required }
    }
}

/// Synchronous failure returned by a [`BleStack`](crate::BleStack) submission
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StackError {
    #[error("Link handle is no longer valid")]
    InvalidHandle,

    #[error("Stack is busy")]
    Busy,

    #[error("Request refused by stack: {0}")]
    Refused(String),
}

/// Result type for peripheral operations
pub type LinkResult<T> = Result<T, LinkError>;
