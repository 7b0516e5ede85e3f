//! Link configuration
//!
//! [`LinkConfig`] collects every timing and limit the link uses. Platform
//! differences are captured by [`StackProfile`], resolved once from the stack's
//! API level, and vendor-specific connection timing by [`Manufacturer`].

use crate::constants::*;
use crate::types::Transport;
use std::time::Duration;

/// Device vendor families with distinct connection timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Manufacturer {
    /// Stacks that report failed connection attempts within a few seconds
    Samsung,
    #[default]
    Other,
}

impl Manufacturer {
    pub fn from_name(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case("samsung") {
            Manufacturer::Samsung
        } else {
            Manufacturer::Other
        }
    }

    pub fn connection_timeout(&self) -> Duration {
        match self {
            Manufacturer::Samsung => CONNECTION_TIMEOUT_FAST_FAIL,
            Manufacturer::Other => CONNECTION_TIMEOUT,
        }
    }

    /// Elapsed time after which a generic connect failure counts as a timeout
    pub fn failure_threshold(&self) -> Duration {
        match self {
            Manufacturer::Samsung => FAILURE_THRESHOLD_FAST_FAIL,
            Manufacturer::Other => FAILURE_THRESHOLD_DEFAULT,
        }
    }
}

/// Capabilities and quirks of a stack version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackProfile {
    pub api_level: u32,
    /// Settle time before discovering services on an already bonded device
    pub bonded_discovery_delay: Duration,
    pub supports_connection_priority: bool,
    pub supports_phy: bool,
}

impl StackProfile {
    pub fn for_api_level(api_level: u32) -> Self {
        let bonded_discovery_delay = if api_level < API_LEVEL_NO_BONDED_DISCOVERY_DELAY {
            BONDED_DISCOVERY_DELAY
        } else {
            Duration::ZERO
        };

        Self {
            api_level,
            bonded_discovery_delay,
            supports_connection_priority: api_level >= API_LEVEL_CONNECTION_PRIORITY,
            supports_phy: api_level >= API_LEVEL_PHY,
        }
    }
}

impl Default for StackProfile {
    fn default() -> Self {
        Self::for_api_level(API_LEVEL_LATEST)
    }
}

/// Configuration for a single link
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub transport: Transport,
    pub profile: StackProfile,
    /// How long a connection attempt may stay in `Connecting`
    pub connection_timeout: Duration,
    /// See [`Manufacturer::failure_threshold`]
    pub failure_threshold: Duration,
    pub bond_lost_delay: Duration,
    pub cancel_grace_delay: Duration,
    pub timeout_synthesis_delay: Duration,
    pub max_tries: u8,
    pub max_notifying: usize,
    /// Deadline for a single in-flight command; `None` waits indefinitely
    pub command_timeout: Option<Duration>,
}

impl LinkConfig {
    pub fn for_device(manufacturer: Manufacturer, api_level: u32) -> Self {
        Self {
            profile: StackProfile::for_api_level(api_level),
            connection_timeout: manufacturer.connection_timeout(),
            failure_threshold: manufacturer.failure_threshold(),
            ..Self::default()
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Le,
            profile: StackProfile::default(),
            connection_timeout: CONNECTION_TIMEOUT,
            failure_threshold: FAILURE_THRESHOLD_DEFAULT,
            bond_lost_delay: BOND_LOST_DELAY,
            cancel_grace_delay: CANCEL_GRACE_DELAY,
            timeout_synthesis_delay: TIMEOUT_SYNTHESIS_DELAY,
            max_tries: MAX_TRIES,
            max_notifying: MAX_NOTIFYING_CHARACTERISTICS,
            command_timeout: None,
        }
    }
}
