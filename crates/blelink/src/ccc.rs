//! Client Characteristic Configuration values

use crate::constants::{CCC_DISABLE, CCC_ENABLE_INDICATION, CCC_ENABLE_NOTIFICATION};
use byteorder::{ByteOrder, LittleEndian};

/// Subscription state written to a CCC descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CccValue {
    Disable,
    Notify,
    Indicate,
}

const CCC_VALUES: [(u16, CccValue); 3] = [
    (CCC_DISABLE, CccValue::Disable),
    (CCC_ENABLE_NOTIFICATION, CccValue::Notify),
    (CCC_ENABLE_INDICATION, CccValue::Indicate),
];

impl CccValue {
    /// Recognize a raw descriptor value; anything else yields `None`
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 2 {
            return None;
        }
        let raw = LittleEndian::read_u16(bytes);
        CCC_VALUES
            .iter()
            .find(|(value, _)| *value == raw)
            .map(|(_, ccc)| *ccc)
    }

    pub fn to_bytes(self) -> [u8; 2] {
        let raw = CCC_VALUES
            .iter()
            .find(|(_, ccc)| *ccc == self)
            .map_or(CCC_DISABLE, |(value, _)| *value);
        let mut bytes = [0u8; 2];
        LittleEndian::write_u16(&mut bytes, raw);
        bytes
    }

    pub fn is_enabled(self) -> bool {
        self != CccValue::Disable
    }
}
