//! Link-level constants

use std::time::Duration;

// MTU bounds
pub const DEFAULT_MTU: u16 = 23;
pub const MAX_MTU: u16 = 517;

// Write length limits
pub const MAX_LONG_WRITE_LENGTH: usize = 512;
pub const WRITE_HEADER_LENGTH: usize = 3;
pub const SIGNED_WRITE_OVERHEAD: usize = 15;

// Client Characteristic Configuration descriptor
pub const CCC_DESCRIPTOR_UUID: u16 = 0x2902;
pub const CCC_DISABLE: u16 = 0x0000;
pub const CCC_ENABLE_NOTIFICATION: u16 = 0x0001;
pub const CCC_ENABLE_INDICATION: u16 = 0x0002;

// Queue limits
pub const MAX_TRIES: u8 = 2;
pub const MAX_NOTIFYING_CHARACTERISTICS: usize = 15;

// Connection timing
pub const CONNECTION_TIMEOUT: Duration = Duration::from_millis(35_000);
pub const CONNECTION_TIMEOUT_FAST_FAIL: Duration = Duration::from_millis(15_000);
pub const FAILURE_THRESHOLD_DEFAULT: Duration = Duration::from_millis(25_000);
pub const FAILURE_THRESHOLD_FAST_FAIL: Duration = Duration::from_millis(4_500);
pub const BONDED_DISCOVERY_DELAY: Duration = Duration::from_millis(1_000);
pub const BOND_LOST_DELAY: Duration = Duration::from_millis(1_000);
pub const CANCEL_GRACE_DELAY: Duration = Duration::from_millis(50);
pub const TIMEOUT_SYNTHESIS_DELAY: Duration = Duration::from_millis(50);

// API levels that change stack behaviour
pub const API_LEVEL_CONNECTION_PRIORITY: u32 = 21;
pub const API_LEVEL_NO_BONDED_DISCOVERY_DELAY: u32 = 25;
pub const API_LEVEL_PHY: u32 = 26;
pub const API_LEVEL_LATEST: u32 = 34;
