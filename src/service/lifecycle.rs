//! Per-command lifecycle state machine.
//!
//! ```text
//! Received -> Verifying -> Rejected(auth | replay | malformed)
//!                       -> Verified -> Dispatching -> Completed | TimedOut | Busy
//!                                                  -> ResponsePublished
//! ```
//!
//! `Rejected` and `ResponsePublished` are terminal. There is no retry path;
//! a companion resubmits with a fresh envelope.

use std::fmt;

use tracing::{debug, error};

use crate::error::RemoteError;

/// Why an inbound message was dropped without a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Auth,
    Replay,
    Malformed,
}

impl RejectReason {
    /// Classify a verification failure.
    pub fn from_error(error: &RemoteError) -> Self {
        match error {
            RemoteError::Replay { .. } => RejectReason::Replay,
            RemoteError::Malformed { .. }
            | RemoteError::Protocol { .. }
            | RemoteError::Serialization(_) => RejectReason::Malformed,
            _ => RejectReason::Auth,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Auth => "auth",
            RejectReason::Replay => "replay",
            RejectReason::Malformed => "malformed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStage {
    Received,
    Verifying,
    Rejected(RejectReason),
    Verified,
    Dispatching,
    Completed,
    TimedOut,
    Busy,
    ResponsePublished,
}

impl CommandStage {
    pub fn can_advance_to(&self, next: CommandStage) -> bool {
        use CommandStage::*;

        matches!(
            (self, next),
            (Received, Verifying)
                | (Verifying, Rejected(_))
                | (Verifying, Verified)
                | (Verified, Dispatching)
                | (Dispatching, Completed)
                | (Dispatching, TimedOut)
                | (Dispatching, Busy)
                | (Completed, ResponsePublished)
                | (TimedOut, ResponsePublished)
                | (Busy, ResponsePublished)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandStage::Rejected(_) | CommandStage::ResponsePublished)
    }

    /// Whether a signed response is owed for a command in this stage.
    pub fn owes_response(&self) -> bool {
        matches!(
            self,
            CommandStage::Completed | CommandStage::TimedOut | CommandStage::Busy
        )
    }
}

impl fmt::Display for CommandStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandStage::Rejected(reason) => write!(f, "rejected({})", reason.as_str()),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Tracks the stage of one inbound message.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    stage: CommandStage,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            stage: CommandStage::Received,
        }
    }

    pub fn stage(&self) -> CommandStage {
        self.stage
    }

    /// Move to `next`. An illegal transition is logged and ignored.
    pub fn advance(&mut self, next: CommandStage) -> bool {
        if !self.stage.can_advance_to(next) {
            error!(from = %self.stage, to = %next, "Illegal command lifecycle transition");
            return false;
        }
        debug!(from = %self.stage, to = %next, "Command lifecycle");
        self.stage = next;
        true
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CompanionIdentity;
    use crate::error::AuthErrorKind;

    #[test]
    fn test_happy_path() {
        let mut lifecycle = Lifecycle::new();
        for stage in [
            CommandStage::Verifying,
            CommandStage::Verified,
            CommandStage::Dispatching,
            CommandStage::Completed,
            CommandStage::ResponsePublished,
        ] {
            assert!(lifecycle.advance(stage), "{} should be reachable", stage);
        }
        assert!(lifecycle.stage().is_terminal());
    }

    #[test]
    fn test_rejected_is_terminal() {
        let mut lifecycle = Lifecycle::new();
        lifecycle.advance(CommandStage::Verifying);
        assert!(lifecycle.advance(CommandStage::Rejected(RejectReason::Replay)));
        assert!(lifecycle.stage().is_terminal());
        assert!(!lifecycle.stage().owes_response());

        // Nothing leaves a terminal stage.
        assert!(!lifecycle.advance(CommandStage::Verified));
        assert!(!lifecycle.advance(CommandStage::ResponsePublished));
        assert_eq!(
            lifecycle.stage(),
            CommandStage::Rejected(RejectReason::Replay)
        );
    }

    #[test]
    fn test_no_publication_without_dispatch() {
        assert!(!CommandStage::Verified.can_advance_to(CommandStage::ResponsePublished));
        assert!(!CommandStage::Verifying.can_advance_to(CommandStage::Busy));
        assert!(!CommandStage::Received.can_advance_to(CommandStage::Verified));
    }

    #[test]
    fn test_outcomes_owe_response() {
        for stage in [CommandStage::Completed, CommandStage::TimedOut, CommandStage::Busy] {
            assert!(stage.owes_response());
            assert!(stage.can_advance_to(CommandStage::ResponsePublished));
        }
    }

    #[test]
    fn test_reject_reason_classification() {
        let replay = RemoteError::Replay {
            sender: CompanionIdentity::from_bytes([0u8; 32]).to_hex(),
        };
        assert_eq!(RejectReason::from_error(&replay), RejectReason::Replay);
        assert_eq!(
            RejectReason::from_error(&RemoteError::malformed("bad")),
            RejectReason::Malformed
        );
        assert_eq!(
            RejectReason::from_error(&RemoteError::auth(AuthErrorKind::InvalidSignature)),
            RejectReason::Auth
        );
    }
}
