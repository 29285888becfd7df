//! Command dispatcher: busy check, hand-off and deadline enforcement.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::VerifiedCommand;
use crate::error::{RemoteError, SerialErrorKind};
use crate::protocol::ResponseOutcome;

use super::{CommandSlot, PendingCommand, SerialCompletion, SerialJob};

/// A resolved command and how it ended.
#[derive(Debug)]
pub struct Resolution {
    pub pending: PendingCommand,
    pub outcome: ResponseOutcome,
}

impl Resolution {
    pub fn duration(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.pending.accepted_at)
    }
}

/// Owns the command slot and the job channel to the serial worker.
///
/// Not shared: the intake loop is the only caller, which makes the busy
/// check and the slot transition a single step.
pub struct CommandDispatcher {
    slot: CommandSlot,
    timeout: Duration,
    jobs: mpsc::UnboundedSender<SerialJob>,
}

impl CommandDispatcher {
    pub fn new(jobs: mpsc::UnboundedSender<SerialJob>, timeout: Duration) -> Self {
        Self {
            slot: CommandSlot::Idle,
            timeout,
            jobs,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_busy(&self) -> bool {
        !self.slot.is_idle()
    }

    /// Deadline of the pending command, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.slot.deadline()
    }

    pub fn submit(&mut self, command: VerifiedCommand) -> Result<Uuid, RemoteError> {
        self.submit_at(command, Instant::now())
    }

    /// Put a verified command on the serial line.
    ///
    /// Fails with `Busy` if a command is pending; there is no queue. Fails
    /// with a serial error if the worker is gone, leaving the slot idle.
    pub fn submit_at(&mut self, command: VerifiedCommand, now: Instant) -> Result<Uuid, RemoteError> {
        if let Some(current) = self.slot.pending_id() {
            debug!(pending = %current, "Command slot busy");
            return Err(RemoteError::Busy);
        }

        let id = Uuid::new_v4();
        let job = SerialJob {
            id,
            command: command.command.clone(),
        };
        if self.jobs.send(job).is_err() {
            warn!("Serial worker unavailable, command not dispatched");
            return Err(RemoteError::serial(SerialErrorKind::WorkerUnavailable));
        }

        info!(
            id = %id,
            sender = %command.sender,
            command = %command.command,
            timeout_ms = self.timeout.as_millis() as u64,
            "Command dispatched"
        );

        self.slot.occupy(PendingCommand {
            id,
            command,
            accepted_at: now,
            deadline: now + self.timeout,
        })?;

        Ok(id)
    }

    /// Apply a serial completion. Returns `None` for a late completion
    /// whose command was already resolved.
    pub fn complete(&mut self, completion: SerialCompletion) -> Option<Resolution> {
        let Some(pending) = self.slot.release_matching(completion.id) else {
            debug!(id = %completion.id, "Discarding late serial response");
            return None;
        };

        let outcome = match completion.result {
            Ok(lines) => ResponseOutcome::Completed { lines },
            Err(e) => {
                warn!(id = %pending.id, error = %e, "Serial fault, resolving as timeout");
                ResponseOutcome::TimedOut {
                    timeout_ms: self.timeout_ms(),
                    fault: Some(e.to_string()),
                }
            }
        };

        Some(Resolution { pending, outcome })
    }

    /// Resolve the pending command as timed out if its deadline passed.
    pub fn expire(&mut self, now: Instant) -> Option<Resolution> {
        let pending = self.slot.release_expired(now)?;
        warn!(
            id = %pending.id,
            command = %pending.command.command,
            timeout_ms = self.timeout_ms(),
            "Command timed out waiting for serial response"
        );
        Some(Resolution {
            pending,
            outcome: ResponseOutcome::TimedOut {
                timeout_ms: self.timeout_ms(),
                fault: None,
            },
        })
    }

    /// Free the slot without resolving its command, for shutdown.
    pub fn abandon(&mut self) -> Option<PendingCommand> {
        let pending = self.slot.release()?;
        warn!(
            id = %pending.id,
            command = %pending.command.command,
            "Abandoning pending command, no response will be published"
        );
        Some(pending)
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::CompanionIdentity;

    fn verified(command: &str) -> VerifiedCommand {
        VerifiedCommand {
            sender: CompanionIdentity::from_bytes([4u8; 32]),
            command: command.to_string(),
            nonce: format!("nonce-{}", command),
            issued_at: 0,
            expires_at: 30,
        }
    }

    fn create_test_dispatcher() -> (CommandDispatcher, mpsc::UnboundedReceiver<SerialJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (CommandDispatcher::new(tx, Duration::from_secs(10)), rx)
    }

    #[test]
    fn test_second_submit_is_busy() {
        let (mut dispatcher, mut jobs) = create_test_dispatcher();

        let id = dispatcher.submit(verified("ver")).unwrap();
        assert!(matches!(
            dispatcher.submit(verified("clock")),
            Err(RemoteError::Busy)
        ));

        // Only the first command reached the serial line.
        assert_eq!(jobs.try_recv().unwrap().id, id);
        assert!(jobs.try_recv().is_err());
    }

    #[test]
    fn test_completion_frees_slot() {
        let (mut dispatcher, _jobs) = create_test_dispatcher();
        let id = dispatcher.submit(verified("ver")).unwrap();

        let resolution = dispatcher
            .complete(SerialCompletion {
                id,
                result: Ok(vec!["-> v1".to_string()]),
            })
            .unwrap();
        assert_eq!(
            resolution.outcome,
            ResponseOutcome::Completed {
                lines: vec!["-> v1".to_string()]
            }
        );
        assert!(!dispatcher.is_busy());
        assert!(dispatcher.submit(verified("clock")).is_ok());
    }

    #[test]
    fn test_deadline_times_out_and_late_response_is_discarded() {
        let (mut dispatcher, _jobs) = create_test_dispatcher();
        let start = Instant::now();
        let id = dispatcher.submit_at(verified("ver"), start).unwrap();

        assert!(dispatcher.expire(start + Duration::from_secs(9)).is_none());
        let resolution = dispatcher.expire(start + Duration::from_secs(10)).unwrap();
        assert!(matches!(
            resolution.outcome,
            ResponseOutcome::TimedOut { fault: None, .. }
        ));
        assert_eq!(resolution.duration(start + Duration::from_secs(10)), Duration::from_secs(10));
        assert!(!dispatcher.is_busy());

        let next = dispatcher.submit(verified("clock")).unwrap();
        let late = dispatcher.complete(SerialCompletion {
            id,
            result: Ok(vec!["-> v1".to_string()]),
        });
        assert!(late.is_none());
        assert_eq!(dispatcher.slot.pending_id(), Some(next));
    }

    #[test]
    fn test_serial_fault_resolves_as_timeout() {
        let (mut dispatcher, _jobs) = create_test_dispatcher();
        let id = dispatcher.submit(verified("ver")).unwrap();

        let resolution = dispatcher
            .complete(SerialCompletion {
                id,
                result: Err(RemoteError::serial(SerialErrorKind::Closed)),
            })
            .unwrap();
        assert!(matches!(
            resolution.outcome,
            ResponseOutcome::TimedOut { fault: Some(_), .. }
        ));
        assert!(!dispatcher.is_busy());
    }

    #[test]
    fn test_abandon_frees_slot() {
        let (mut dispatcher, _jobs) = create_test_dispatcher();
        assert!(dispatcher.abandon().is_none());

        let id = dispatcher.submit(verified("ver")).unwrap();
        let pending = dispatcher.abandon().unwrap();
        assert_eq!(pending.id, id);
        assert!(!dispatcher.is_busy());

        let late = dispatcher.complete(SerialCompletion {
            id,
            result: Ok(vec!["-> v1".to_string()]),
        });
        assert!(late.is_none());
    }

    #[test]
    fn test_missing_worker_leaves_slot_idle() {
        let (mut dispatcher, jobs) = create_test_dispatcher();
        drop(jobs);

        assert!(matches!(
            dispatcher.submit(verified("ver")),
            Err(RemoteError::Serial {
                kind: SerialErrorKind::WorkerUnavailable
            })
        ));
        assert!(!dispatcher.is_busy());
    }
}
