//! Link state machine
//!
//! Connection phase and bond state are published through [`LinkShared`] so any
//! thread can read them; only the worker writes them. Everything else lives in
//! [`LinkState`], private to the worker.

use super::observer::PeripheralEvent;
use super::timeout::TimerKind;
use super::worker::LinkWorker;
use crate::constants::DEFAULT_MTU;
use crate::status::{GattStatus, HciStatus};
use crate::types::{BondState, ConnectionState};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU16, AtomicU8, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Link fields readable from any thread
#[derive(Debug)]
pub(crate) struct LinkShared {
    connection_state: AtomicU8,
    bond_state: AtomicU8,
    mtu: AtomicU16,
    notifying: RwLock<HashSet<u16>>,
}

impl LinkShared {
    pub(crate) fn new(bond_state: BondState) -> Self {
        Self {
            connection_state: AtomicU8::new(ConnectionState::Disconnected as u8),
            bond_state: AtomicU8::new(bond_state as u8),
            mtu: AtomicU16::new(DEFAULT_MTU),
            notifying: RwLock::new(HashSet::new()),
        }
    }

    pub(crate) fn connection_state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.connection_state.load(Ordering::Acquire))
    }

    pub(crate) fn set_connection_state(&self, state: ConnectionState) {
        self.connection_state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn bond_state(&self) -> BondState {
        BondState::from_u8(self.bond_state.load(Ordering::Acquire))
    }

    /// Store a new bond state and return the previous one
    pub(crate) fn swap_bond_state(&self, state: BondState) -> BondState {
        BondState::from_u8(self.bond_state.swap(state as u8, Ordering::AcqRel))
    }

    pub(crate) fn mtu(&self) -> u16 {
        self.mtu.load(Ordering::Acquire)
    }

    pub(crate) fn set_mtu(&self, mtu: u16) {
        self.mtu.store(mtu, Ordering::Release);
    }

    pub(crate) fn is_notifying(&self, handle: u16) -> bool {
        self.notifying
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&handle)
    }

    pub(crate) fn notifying(&self) -> Vec<u16> {
        let mut handles: Vec<u16> = self
            .notifying
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect();
        handles.sort_unstable();
        handles
    }

    pub(crate) fn set_notifying(&self, handle: u16, enabled: bool) {
        let mut notifying = self.notifying.write().unwrap_or_else(PoisonError::into_inner);
        if enabled {
            notifying.insert(handle);
        } else {
            notifying.remove(&handle);
        }
    }

    fn clear_notifying(&self) {
        self.notifying
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Worker-private connection bookkeeping
#[derive(Debug, Default)]
pub(crate) struct LinkState {
    /// Whether the stack holds an open link handle
    pub(crate) link_open: bool,
    pub(crate) connect_started: Option<Instant>,
    pub(crate) auto_connect: bool,
    pub(crate) discovery_complete: bool,
    /// Connected while bonding; discovery waits for the bond outcome
    pub(crate) discovery_waiting_for_bond: bool,
    pub(crate) user_disconnect: bool,
    pub(crate) bond_lost: bool,
    pub(crate) bond_lost_failure: Option<HciStatus>,
}

impl LinkWorker {
    pub(super) fn connect(&mut self, auto_connect: bool) {
        let current = self.shared.connection_state();
        if current != ConnectionState::Disconnected {
            warn!("{}: connect ignored, link is {:?}", self.address, current);
            return;
        }

        // A bond-loss failure still waiting out its delay is reported now,
        // before the new attempt can produce events of its own
        if let Some(status) = self.state.bond_lost_failure.take() {
            self.timers.disarm(TimerKind::BondLostFailure);
            info!("{}: reporting lost bond before reconnecting", self.address);
            self.notify(PeripheralEvent::ConnectFailed { status });
        }

        self.state = LinkState {
            connect_started: Some(Instant::now()),
            auto_connect,
            ..LinkState::default()
        };
        self.shared.swap_bond_state(self.stack.bond_state());
        self.shared.set_connection_state(ConnectionState::Connecting);

        match self
            .stack
            .connect(self.address, auto_connect, self.config.transport)
        {
            Ok(()) => {
                info!(
                    "{}: {} (timeout {:?})",
                    self.address,
                    if auto_connect { "auto-connecting" } else { "connecting" },
                    self.config.connection_timeout
                );
                self.state.link_open = true;
                self.timers
                    .arm(TimerKind::ConnectionTimeout, self.config.connection_timeout);
            }
            Err(e) => {
                error!("{}: connect request failed: {}", self.address, e);
                self.shared.set_connection_state(ConnectionState::Disconnected);
                self.notify(PeripheralEvent::ConnectFailed {
                    status: HciStatus::Error,
                });
            }
        }
    }

    pub(super) fn cancel_connection(&mut self) {
        match self.shared.connection_state() {
            ConnectionState::Connecting => {
                info!("{}: cancelling connection attempt", self.address);
                self.timers.disarm(TimerKind::ConnectionTimeout);
                self.state.user_disconnect = true;
                self.shared.set_connection_state(ConnectionState::Disconnecting);
                if let Err(e) = self.stack.disconnect() {
                    debug!("{}: disconnect during cancel failed: {}", self.address, e);
                }
                // A pending connect may never report back
                self.timers
                    .arm(TimerKind::CancelGrace, self.config.cancel_grace_delay);
            }
            ConnectionState::Connected => {
                info!("{}: disconnecting", self.address);
                self.state.user_disconnect = true;
                self.disconnect_link();
            }
            state => debug!("{}: cancel ignored, link is {:?}", self.address, state),
        }
    }

    /// Ask the stack to drop the link and wait for its disconnect event
    pub(super) fn disconnect_link(&mut self) {
        self.shared.set_connection_state(ConnectionState::Disconnecting);
        if let Err(e) = self.stack.disconnect() {
            warn!("{}: disconnect request failed: {}", self.address, e);
            self.on_connection_state_changed(false, HciStatus::Success);
        }
    }

    pub(super) fn on_connection_state_changed(&mut self, connected: bool, status: HciStatus) {
        let previous = self.shared.connection_state();
        self.timers.disarm(TimerKind::ConnectionTimeout);
        self.timers.disarm(TimerKind::TimeoutFailure);
        self.timers.disarm(TimerKind::CancelGrace);

        if connected && status.is_success() {
            match previous {
                ConnectionState::Connecting => self.on_connected(),
                ConnectionState::Disconnecting => {
                    debug!("{}: connected while disconnecting, dropping link", self.address);
                    self.disconnect_link();
                }
                state => debug!("{}: ignoring connected event while {:?}", self.address, state),
            }
        } else {
            self.on_link_down(previous, status);
        }
    }

    fn on_connected(&mut self) {
        self.shared.set_connection_state(ConnectionState::Connected);
        let bond_state = self.shared.bond_state();
        info!("{}: connected (bond state {:?})", self.address, bond_state);

        match bond_state {
            BondState::Bonding => {
                info!("{}: waiting for bonding before service discovery", self.address);
                self.state.discovery_waiting_for_bond = true;
            }
            BondState::Bonded => {
                self.schedule_discovery(self.config.profile.bonded_discovery_delay)
            }
            BondState::NotBonded => self.schedule_discovery(Duration::ZERO),
        }
    }

    fn on_link_down(&mut self, previous: ConnectionState, status: HciStatus) {
        match previous {
            ConnectionState::Disconnected => {
                debug!("{}: ignoring disconnect while disconnected", self.address);
            }
            _ if self.state.bond_lost => {
                // A lost bond is surfaced as a connection failure so that
                // callers reconnect, after the stack's bond teardown settles.
                info!("{}: disconnected after bond loss ({})", self.address, status);
                self.complete_disconnect();
                self.state.bond_lost_failure = Some(status);
                self.timers
                    .arm(TimerKind::BondLostFailure, self.config.bond_lost_delay);
            }
            ConnectionState::Connecting => {
                let status = self.classify_connect_failure(status);
                warn!("{}: connection failed with status {}", self.address, status);
                self.complete_disconnect();
                self.notify(PeripheralEvent::ConnectFailed { status });
            }
            _ if !self.state.discovery_complete && !self.state.user_disconnect => {
                warn!(
                    "{}: disconnected with status {} before service discovery completed",
                    self.address, status
                );
                self.complete_disconnect();
                self.notify(PeripheralEvent::ConnectFailed { status });
            }
            _ => {
                info!("{}: disconnected with status {}", self.address, status);
                self.complete_disconnect();
                self.notify(PeripheralEvent::Disconnected { status });
            }
        }
    }

    fn classify_connect_failure(&self, status: HciStatus) -> HciStatus {
        let elapsed = self
            .state
            .connect_started
            .map_or(Duration::ZERO, |started| started.elapsed());
        if status == HciStatus::Error && elapsed > self.config.failure_threshold {
            HciStatus::ConnectionFailedEstablishment
        } else {
            status
        }
    }

    fn complete_disconnect(&mut self) {
        let dropped = self.queue.clear();
        if dropped > 0 {
            debug!("{}: dropped {} queued commands", self.address, dropped);
        }
        self.pending_write = None;
        self.timers.disarm(TimerKind::DiscoverServices);
        self.timers.disarm_command_deadlines();
        self.shared.clear_notifying();
        self.shared.set_mtu(DEFAULT_MTU);

        if self.state.link_open {
            self.stack.close();
        }
        let bond_lost_failure = self.state.bond_lost_failure.take();
        self.state = LinkState {
            bond_lost_failure,
            ..LinkState::default()
        };
        self.shared.set_connection_state(ConnectionState::Disconnected);
    }

    fn schedule_discovery(&mut self, delay: Duration) {
        if !delay.is_zero() {
            debug!("{}: discovering services in {:?}", self.address, delay);
        }
        self.timers.arm(TimerKind::DiscoverServices, delay);
    }

    pub(super) fn discover_services(&mut self) {
        if self.shared.connection_state() != ConnectionState::Connected {
            return;
        }

        debug!("{}: discovering services", self.address);
        if let Err(e) = self.stack.discover_services() {
            error!("{}: service discovery request failed: {}", self.address, e);
            self.disconnect_link();
        }
    }

    pub(super) fn on_services_discovered(&mut self, status: GattStatus) {
        if self.shared.connection_state() != ConnectionState::Connected
            || self.state.discovery_complete
        {
            debug!("{}: ignoring services discovered event", self.address);
            return;
        }

        if !status.is_success() {
            error!("{}: service discovery failed: {}", self.address, status);
            self.disconnect_link();
            return;
        }

        let services = self.stack.services();
        if services.is_empty() {
            error!("{}: service discovery returned no services", self.address);
            self.disconnect_link();
            return;
        }

        info!("{}: discovered {} services", self.address, services.len());
        self.state.discovery_complete = true;
        self.notify(PeripheralEvent::Connected);
        self.advance();
    }

    pub(super) fn on_bond_state_changed(&mut self, bond_state: BondState) {
        let previous = self.shared.swap_bond_state(bond_state);
        if previous == bond_state {
            return;
        }

        match (previous, bond_state) {
            (_, BondState::Bonding) => {
                info!("{}: bonding started", self.address);
                self.notify(PeripheralEvent::BondingStarted);
            }
            (_, BondState::Bonded) => {
                info!("{}: bonded", self.address);
                self.notify(PeripheralEvent::BondingSucceeded);
                if std::mem::take(&mut self.state.discovery_waiting_for_bond) {
                    self.schedule_discovery(self.config.profile.bonded_discovery_delay);
                }
                self.finish_bond_command();
            }
            (BondState::Bonding, BondState::NotBonded) => {
                warn!("{}: bonding failed", self.address);
                self.notify(PeripheralEvent::BondingFailed);
                if std::mem::take(&mut self.state.discovery_waiting_for_bond) {
                    self.disconnect_link();
                }
                self.finish_bond_command();
            }
            (BondState::Bonded, BondState::NotBonded) => {
                warn!("{}: bond lost", self.address);
                self.notify(PeripheralEvent::BondLost);
                let state = self.shared.connection_state();
                if matches!(state, ConnectionState::Connected | ConnectionState::Disconnecting) {
                    self.state.bond_lost = true;
                    if state == ConnectionState::Connected && !self.state.discovery_complete {
                        self.timers.disarm(TimerKind::DiscoverServices);
                        self.disconnect_link();
                    }
                }
            }
            _ => {}
        }
    }
}
