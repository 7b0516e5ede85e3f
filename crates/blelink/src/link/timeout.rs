//! Timers and the connection timeout supervisor
//!
//! The worker keeps at most one deadline per [`TimerKind`]; re-arming replaces
//! the previous deadline. Expired timers are handled on the worker thread by
//! [`LinkWorker::on_timer`].

use super::command::CommandId;
use super::observer::PeripheralEvent;
use super::worker::LinkWorker;
use crate::status::{GattStatus, HciStatus};
use crate::types::ConnectionState;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TimerKind {
    ConnectionTimeout,
    /// Stand-in for the disconnect callback a wedged stack never delivers
    TimeoutFailure,
    CancelGrace,
    DiscoverServices,
    BondLostFailure,
    CommandDeadline(CommandId),
}

#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    deadlines: HashMap<TimerKind, Instant>,
}

impl TimerQueue {
    pub(crate) fn arm(&mut self, kind: TimerKind, delay: Duration) {
        self.deadlines.insert(kind, Instant::now() + delay);
    }

    pub(crate) fn disarm(&mut self, kind: TimerKind) -> bool {
        self.deadlines.remove(&kind).is_some()
    }

    pub(crate) fn disarm_command_deadlines(&mut self) {
        self.deadlines
            .retain(|kind, _| !matches!(kind, TimerKind::CommandDeadline(_)));
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self, kind: TimerKind) -> bool {
        self.deadlines.contains_key(&kind)
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Remove and return every timer due at `now`, earliest first
    pub(crate) fn take_expired(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut expired: Vec<(Instant, TimerKind)> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(kind, deadline)| (*deadline, *kind))
            .collect();
        expired.sort_by_key(|(deadline, _)| *deadline);

        for (_, kind) in &expired {
            self.deadlines.remove(kind);
        }
        expired.into_iter().map(|(_, kind)| kind).collect()
    }
}

impl LinkWorker {
    pub(super) fn on_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::ConnectionTimeout => {
                if self.shared.connection_state() != ConnectionState::Connecting {
                    return;
                }
                warn!(
                    "{}: connection attempt timed out after {:?}",
                    self.address, self.config.connection_timeout
                );
                if let Err(e) = self.stack.disconnect() {
                    debug!("{}: disconnect after timeout failed: {}", self.address, e);
                }
                self.timers
                    .arm(TimerKind::TimeoutFailure, self.config.timeout_synthesis_delay);
            }
            TimerKind::TimeoutFailure => {
                if self.shared.connection_state() == ConnectionState::Connecting {
                    self.on_connection_state_changed(
                        false,
                        HciStatus::ConnectionFailedEstablishment,
                    );
                }
            }
            TimerKind::CancelGrace => {
                if self.shared.connection_state() == ConnectionState::Disconnecting {
                    debug!(
                        "{}: no disconnect callback after cancel, synthesizing one",
                        self.address
                    );
                    self.on_connection_state_changed(false, HciStatus::Success);
                }
            }
            TimerKind::DiscoverServices => self.discover_services(),
            TimerKind::BondLostFailure => {
                if let Some(status) = self.state.bond_lost_failure.take() {
                    info!("{}: reporting lost bond as connection failure", self.address);
                    self.notify(PeripheralEvent::ConnectFailed { status });
                }
            }
            TimerKind::CommandDeadline(id) => {
                let command = match self.queue.in_flight() {
                    Some(command) if command.id == id => command.clone(),
                    _ => return,
                };
                warn!(
                    "{}: {} got no completion within {:?}",
                    self.address, command, self.config.command_timeout
                );
                self.report_failure(&command, GattStatus::Error);
                self.completed_command(id);
            }
        }
    }
}
