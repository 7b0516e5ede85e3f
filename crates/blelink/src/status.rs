//! Status codes reported by the platform stack
//!
//! GATT completions carry a [`GattStatus`], connection state changes carry an
//! [`HciStatus`]. Both convert losslessly to and from their raw byte values.

use std::fmt;

// GATT status codes
pub const GATT_SUCCESS: u8 = 0x00;
pub const GATT_INVALID_HANDLE: u8 = 0x01;
pub const GATT_READ_NOT_PERMITTED: u8 = 0x02;
pub const GATT_WRITE_NOT_PERMITTED: u8 = 0x03;
pub const GATT_INVALID_PDU: u8 = 0x04;
pub const GATT_INSUFFICIENT_AUTHENTICATION: u8 = 0x05;
pub const GATT_REQUEST_NOT_SUPPORTED: u8 = 0x06;
pub const GATT_INVALID_OFFSET: u8 = 0x07;
pub const GATT_INSUFFICIENT_AUTHORIZATION: u8 = 0x08;
pub const GATT_PREPARE_QUEUE_FULL: u8 = 0x09;
pub const GATT_ATTRIBUTE_NOT_FOUND: u8 = 0x0A;
pub const GATT_ATTRIBUTE_NOT_LONG: u8 = 0x0B;
pub const GATT_INSUFFICIENT_KEY_SIZE: u8 = 0x0C;
pub const GATT_INVALID_ATTRIBUTE_LENGTH: u8 = 0x0D;
pub const GATT_UNLIKELY: u8 = 0x0E;
pub const GATT_INSUFFICIENT_ENCRYPTION: u8 = 0x0F;
pub const GATT_NO_RESOURCES: u8 = 0x80;
pub const GATT_INTERNAL_ERROR: u8 = 0x81;
pub const GATT_BUSY: u8 = 0x84;
pub const GATT_ERROR: u8 = 0x85;
pub const GATT_AUTH_FAIL: u8 = 0x89;
pub const GATT_CONNECTION_CONGESTED: u8 = 0x8F;

// HCI status codes seen on connection state changes
pub const HCI_SUCCESS: u8 = 0x00;
pub const HCI_AUTHENTICATION_FAILURE: u8 = 0x05;
pub const HCI_CONNECTION_TIMEOUT: u8 = 0x08;
pub const HCI_REMOTE_USER_TERMINATED: u8 = 0x13;
pub const HCI_LOCAL_HOST_TERMINATED: u8 = 0x16;
pub const HCI_LMP_RESPONSE_TIMEOUT: u8 = 0x22;
pub const HCI_CONNECTION_FAILED_ESTABLISHMENT: u8 = 0x3E;
pub const HCI_ERROR: u8 = 0x85;

/// Status of a completed GATT operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GattStatus {
    Success,
    InvalidHandle,
    ReadNotPermitted,
    WriteNotPermitted,
    InvalidPdu,
    InsufficientAuthentication,
    RequestNotSupported,
    InvalidOffset,
    InsufficientAuthorization,
    PrepareQueueFull,
    AttributeNotFound,
    AttributeNotLong,
    InsufficientKeySize,
    InvalidAttributeLength,
    Unlikely,
    InsufficientEncryption,
    NoResources,
    InternalError,
    Busy,
    /// Generic failure, also used for commands the stack refused to accept
    Error,
    AuthFail,
    ConnectionCongested,
    Unknown(u8),
}

impl GattStatus {
    pub fn is_success(&self) -> bool {
        *self == GattStatus::Success
    }

    /// Whether this failure is expected to clear once bonding completes
    pub fn is_bonding_required(&self) -> bool {
        matches!(
            self,
            GattStatus::InsufficientAuthentication
                | GattStatus::InsufficientEncryption
                | GattStatus::AuthFail
        )
    }
}

impl From<u8> for GattStatus {
    fn from(code: u8) -> Self {
        match code {
            GATT_SUCCESS => GattStatus::Success,
            GATT_INVALID_HANDLE => GattStatus::InvalidHandle,
            GATT_READ_NOT_PERMITTED => GattStatus::ReadNotPermitted,
            GATT_WRITE_NOT_PERMITTED => GattStatus::WriteNotPermitted,
            GATT_INVALID_PDU => GattStatus::InvalidPdu,
            GATT_INSUFFICIENT_AUTHENTICATION => GattStatus::InsufficientAuthentication,
            GATT_REQUEST_NOT_SUPPORTED => GattStatus::RequestNotSupported,
            GATT_INVALID_OFFSET => GattStatus::InvalidOffset,
            GATT_INSUFFICIENT_AUTHORIZATION => GattStatus::InsufficientAuthorization,
            GATT_PREPARE_QUEUE_FULL => GattStatus::PrepareQueueFull,
            GATT_ATTRIBUTE_NOT_FOUND => GattStatus::AttributeNotFound,
            GATT_ATTRIBUTE_NOT_LONG => GattStatus::AttributeNotLong,
            GATT_INSUFFICIENT_KEY_SIZE => GattStatus::InsufficientKeySize,
            GATT_INVALID_ATTRIBUTE_LENGTH => GattStatus::InvalidAttributeLength,
            GATT_UNLIKELY => GattStatus::Unlikely,
            GATT_INSUFFICIENT_ENCRYPTION => GattStatus::InsufficientEncryption,
            GATT_NO_RESOURCES => GattStatus::NoResources,
            GATT_INTERNAL_ERROR => GattStatus::InternalError,
            GATT_BUSY => GattStatus::Busy,
            GATT_ERROR => GattStatus::Error,
            GATT_AUTH_FAIL => GattStatus::AuthFail,
            GATT_CONNECTION_CONGESTED => GattStatus::ConnectionCongested,
            _ => GattStatus::Unknown(code),
        }
    }
}

impl From<GattStatus> for u8 {
    fn from(status: GattStatus) -> Self {
        match status {
            GattStatus::Success => GATT_SUCCESS,
            GattStatus::InvalidHandle => GATT_INVALID_HANDLE,
            GattStatus::ReadNotPermitted => GATT_READ_NOT_PERMITTED,
            GattStatus::WriteNotPermitted => GATT_WRITE_NOT_PERMITTED,
            GattStatus::InvalidPdu => GATT_INVALID_PDU,
            GattStatus::InsufficientAuthentication => GATT_INSUFFICIENT_AUTHENTICATION,
            GattStatus::RequestNotSupported => GATT_REQUEST_NOT_SUPPORTED,
            GattStatus::InvalidOffset => GATT_INVALID_OFFSET,
            GattStatus::InsufficientAuthorization => GATT_INSUFFICIENT_AUTHORIZATION,
            GattStatus::PrepareQueueFull => GATT_PREPARE_QUEUE_FULL,
            GattStatus::AttributeNotFound => GATT_ATTRIBUTE_NOT_FOUND,
            GattStatus::AttributeNotLong => GATT_ATTRIBUTE_NOT_LONG,
            GattStatus::InsufficientKeySize => GATT_INSUFFICIENT_KEY_SIZE,
            GattStatus::InvalidAttributeLength => GATT_INVALID_ATTRIBUTE_LENGTH,
            GattStatus::Unlikely => GATT_UNLIKELY,
            GattStatus::InsufficientEncryption => GATT_INSUFFICIENT_ENCRYPTION,
            GattStatus::NoResources => GATT_NO_RESOURCES,
            GattStatus::InternalError => GATT_INTERNAL_ERROR,
            GattStatus::Busy => GATT_BUSY,
            GattStatus::Error => GATT_ERROR,
            GattStatus::AuthFail => GATT_AUTH_FAIL,
            GattStatus::ConnectionCongested => GATT_CONNECTION_CONGESTED,
            GattStatus::Unknown(code) => code,
        }
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (0x{:02x})", self, u8::from(*self))
    }
}

/// Status attached to a connection state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HciStatus {
    Success,
    AuthenticationFailure,
    ConnectionTimeout,
    RemoteUserTerminated,
    LocalHostTerminated,
    LmpResponseTimeout,
    ConnectionFailedEstablishment,
    /// Generic stack error, reported for most failed connection attempts
    Error,
    Unknown(u8),
}

impl HciStatus {
    pub fn is_success(&self) -> bool {
        *self == HciStatus::Success
    }
}

impl From<u8> for HciStatus {
    fn from(code: u8) -> Self {
        match code {
            HCI_SUCCESS => HciStatus::Success,
            HCI_AUTHENTICATION_FAILURE => HciStatus::AuthenticationFailure,
            HCI_CONNECTION_TIMEOUT => HciStatus::ConnectionTimeout,
            HCI_REMOTE_USER_TERMINATED => HciStatus::RemoteUserTerminated,
            HCI_LOCAL_HOST_TERMINATED => HciStatus::LocalHostTerminated,
            HCI_LMP_RESPONSE_TIMEOUT => HciStatus::LmpResponseTimeout,
            HCI_CONNECTION_FAILED_ESTABLISHMENT => HciStatus::ConnectionFailedEstablishment,
            HCI_ERROR => HciStatus::Error,
            _ => HciStatus::Unknown(code),
        }
    }
}

impl From<HciStatus> for u8 {
    fn from(status: HciStatus) -> Self {
        match status {
            HciStatus::Success => HCI_SUCCESS,
            HciStatus::AuthenticationFailure => HCI_AUTHENTICATION_FAILURE,
            HciStatus::ConnectionTimeout => HCI_CONNECTION_TIMEOUT,
            HciStatus::RemoteUserTerminated => HCI_REMOTE_USER_TERMINATED,
            HciStatus::LocalHostTerminated => HCI_LOCAL_HOST_TERMINATED,
            HciStatus::LmpResponseTimeout => HCI_LMP_RESPONSE_TIMEOUT,
            HciStatus::ConnectionFailedEstablishment => HCI_CONNECTION_FAILED_ESTABLISHMENT,
            HciStatus::Error => HCI_ERROR,
            HciStatus::Unknown(code) => code,
        }
    }
}

impl fmt::Display for HciStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} (0x{:02x})", self, u8::from(*self))
    }
}
