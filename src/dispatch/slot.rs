//! The single physical command slot.

use std::time::Instant;

use uuid::Uuid;

use crate::auth::VerifiedCommand;
use crate::error::RemoteError;

/// The one command currently on the serial line.
#[derive(Debug, Clone)]
pub struct PendingCommand {
    /// Correlates the serial completion with this command.
    pub id: Uuid,
    pub command: VerifiedCommand,
    pub accepted_at: Instant,
    pub deadline: Instant,
}

/// Occupancy of the serial line. Every transition goes through the
/// dispatcher, which is only driven by the intake loop.
#[derive(Debug, Default)]
pub enum CommandSlot {
    #[default]
    Idle,
    Pending(PendingCommand),
}

impl CommandSlot {
    pub fn is_idle(&self) -> bool {
        matches!(self, CommandSlot::Idle)
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self {
            CommandSlot::Idle => None,
            CommandSlot::Pending(pending) => Some(pending.deadline),
        }
    }

    pub fn pending_id(&self) -> Option<Uuid> {
        match self {
            CommandSlot::Idle => None,
            CommandSlot::Pending(pending) => Some(pending.id),
        }
    }

    /// Claim the slot. Fails with `Busy` without touching the occupant.
    pub fn occupy(&mut self, pending: PendingCommand) -> Result<(), RemoteError> {
        if !self.is_idle() {
            return Err(RemoteError::Busy);
        }
        *self = CommandSlot::Pending(pending);
        Ok(())
    }

    /// Free the slot if it holds the command with this correlation id.
    pub fn release_matching(&mut self, id: Uuid) -> Option<PendingCommand> {
        if self.pending_id() == Some(id) {
            self.release()
        } else {
            None
        }
    }

    /// Free the slot if its deadline has passed at `now`.
    pub fn release_expired(&mut self, now: Instant) -> Option<PendingCommand> {
        match self.deadline() {
            Some(deadline) if now >= deadline => self.release(),
            _ => None,
        }
    }

    /// Free the slot unconditionally.
    pub fn release(&mut self) -> Option<PendingCommand> {
        match std::mem::take(self) {
            CommandSlot::Idle => None,
            CommandSlot::Pending(pending) => Some(pending),
        }
    }
}
