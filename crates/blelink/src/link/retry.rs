//! Retry of commands rejected while a bond is being established

use super::command::{CommandId, Opcode};
use super::queue::Retry;
use super::worker::LinkWorker;
use crate::status::GattStatus;
use crate::types::BondState;
use log::{info, warn};

impl LinkWorker {
    /// A security failure on a link that is not bonded yet is expected to
    /// clear once the stack finishes the bonding it starts in response.
    pub(super) fn should_retry(&self, opcode: &Opcode, status: GattStatus) -> bool {
        status.is_bonding_required()
            && opcode.retries_on_bonding()
            && self.shared.bond_state() != BondState::Bonded
    }

    pub(super) fn retry_command(&mut self, id: CommandId, status: GattStatus) {
        self.timers
            .disarm(super::timeout::TimerKind::CommandDeadline(id));

        match self.queue.retry(id) {
            Retry::Retrying => {
                info!(
                    "{}: {} failed with {}, bonding in progress, retrying",
                    self.address, id, status
                );
            }
            Retry::Abandoned(command) => {
                warn!(
                    "{}: giving up on {} after {} attempts",
                    self.address, command, command.attempts
                );
                self.pending_write = None;
                self.report_failure(&command, status);
            }
            Retry::Ignored => return,
        }

        self.advance();
    }
}
