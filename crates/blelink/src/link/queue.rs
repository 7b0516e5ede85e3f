//! Serialized command queue
//!
//! The queue owns every pending [`Command`] for a link and enforces that at most
//! one of them is in flight. It performs no I/O: [`CommandQueue::advance`] hands
//! the head back to the executor, which dispatches it and later reports the
//! outcome through [`CommandQueue::completed`] or [`CommandQueue::retry`].

use super::command::{Command, CommandId, Opcode};
use std::collections::VecDeque;

/// Outcome of an attempt to advance the queue
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Advance {
    /// Nothing queued
    Idle,
    /// A command is already in flight
    Busy,
    /// Bonding is in progress; advancement resumes once it ends
    Deferred,
    /// The link handle was gone and this many commands were dropped
    Drained(usize),
    /// The head was marked in flight and must be dispatched now
    Dispatch(Command),
}

/// Outcome of a retry request for the in-flight command
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Retry {
    /// The head stays queued and is dispatched again on the next advance
    Retrying,
    /// The attempt budget ran out and the head was removed
    Abandoned(Command),
    /// The id did not match the in-flight command
    Ignored,
}

#[derive(Debug)]
pub(crate) struct CommandQueue {
    commands: VecDeque<Command>,
    busy: bool,
    retrying: bool,
    deferred_by_bonding: bool,
    next_id: u64,
    max_tries: u8,
}

impl CommandQueue {
    pub(crate) fn new(max_tries: u8) -> Self {
        Self {
            commands: VecDeque::new(),
            busy: false,
            retrying: false,
            deferred_by_bonding: false,
            next_id: 1,
            max_tries: max_tries.max(1),
        }
    }

    pub(crate) fn push(&mut self, opcode: Opcode) -> CommandId {
        let id = CommandId(self.next_id);
        self.next_id += 1;
        self.commands.push_back(Command::new(id, opcode));
        id
    }

    pub(crate) fn len(&self) -> usize {
        self.commands.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn is_busy(&self) -> bool {
        self.busy
    }

    pub(crate) fn in_flight(&self) -> Option<&Command> {
        if self.busy {
            self.commands.front()
        } else {
            None
        }
    }

    /// Try to start the head command.
    ///
    /// Calling this while a command is in flight is a no-op, so it is safe to
    /// invoke after every state change.
    pub(crate) fn advance(&mut self, link_valid: bool, bonding: bool) -> Advance {
        if self.busy {
            return Advance::Busy;
        }
        if self.commands.is_empty() {
            return Advance::Idle;
        }

        if !link_valid {
            return Advance::Drained(self.clear());
        }

        if bonding {
            self.deferred_by_bonding = true;
            return Advance::Deferred;
        }

        self.busy = true;
        let retrying = self.retrying;
        let head = match self.commands.front_mut() {
            Some(head) => head,
            None => return Advance::Idle,
        };
        if !retrying {
            head.attempts = 0;
        }
        head.attempts += 1;
        Advance::Dispatch(head.clone())
    }

    /// Finish the in-flight command. Returns `None` if `id` is not in flight,
    /// which makes duplicate completions harmless.
    pub(crate) fn completed(&mut self, id: CommandId) -> Option<Command> {
        if !self.busy || self.commands.front().map(|c| c.id) != Some(id) {
            return None;
        }

        self.busy = false;
        self.retrying = false;
        self.commands.pop_front()
    }

    pub(crate) fn retry(&mut self, id: CommandId) -> Retry {
        if !self.busy || self.commands.front().map(|c| c.id) != Some(id) {
            return Retry::Ignored;
        }

        self.busy = false;
        let exhausted = self
            .commands
            .front()
            .map_or(true, |head| head.attempts >= self.max_tries);

        if exhausted {
            self.retrying = false;
            match self.commands.pop_front() {
                Some(command) => Retry::Abandoned(command),
                None => Retry::Ignored,
            }
        } else {
            self.retrying = true;
            Retry::Retrying
        }
    }

    /// Whether advancement was deferred by bonding; clears the flag
    pub(crate) fn take_deferred(&mut self) -> bool {
        std::mem::take(&mut self.deferred_by_bonding)
    }

    /// Drop every queued command, including the one in flight
    pub(crate) fn clear(&mut self) -> usize {
        let dropped = self.commands.len();
        self.commands.clear();
        self.busy = false;
        self.retrying = false;
        self.deferred_by_bonding = false;
        dropped
    }
}
