//! Audit entry types.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::auth::VerifiedCommand;
use crate::protocol::ResponseOutcome;

/// Longest command text written to the audit log.
pub const MAX_AUDIT_COMMAND_LEN: usize = 200;

/// A single audit log entry for a resolved or abandoned command.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// RFC 3339 timestamp of the resolution.
    pub timestamp: String,
    /// Correlation id of the dispatch; nil for commands that never got one.
    pub request_id: Uuid,
    /// Hex public key of the companion.
    pub sender: String,
    /// Command text, truncated.
    pub command: String,
    pub nonce: String,
    pub result: AuditResult,
    pub duration_ms: u64,
}

impl AuditEntry {
    /// Build an entry from a verified command and its outcome, stamped now.
    pub fn resolved(
        request_id: Uuid,
        command: &VerifiedCommand,
        outcome: &ResponseOutcome,
        duration: Duration,
    ) -> Self {
        Self::stamped(request_id, command, AuditResult::from(outcome), duration)
    }

    /// Entry for a command dropped at shutdown before it resolved.
    pub fn abandoned(request_id: Uuid, command: &VerifiedCommand, duration: Duration) -> Self {
        Self::stamped(request_id, command, AuditResult::Abandoned, duration)
    }

    fn stamped(
        request_id: Uuid,
        command: &VerifiedCommand,
        result: AuditResult,
        duration: Duration,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            request_id,
            sender: command.sender.to_hex(),
            command: truncate_command(&command.command),
            nonce: command.nonce.clone(),
            result,
            duration_ms: duration.as_millis() as u64,
        }
    }
}

/// Outcome of a command for audit purposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditResult {
    Completed {
        /// Number of response lines returned by the node.
        lines: usize,
    },
    Busy,
    TimedOut {
        /// Serial fault that cut the exchange short, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        fault: Option<String>,
    },
    /// Still pending at shutdown; no response was published.
    Abandoned,
}

impl From<&ResponseOutcome> for AuditResult {
    fn from(outcome: &ResponseOutcome) -> Self {
        match outcome {
            ResponseOutcome::Completed { lines } => AuditResult::Completed { lines: lines.len() },
            ResponseOutcome::Busy => AuditResult::Busy,
            ResponseOutcome::TimedOut { fault, .. } => AuditResult::TimedOut {
                fault: fault.clone(),
            },
        }
    }
}

/// Cut `command` to at most [`MAX_AUDIT_COMMAND_LEN`] bytes on a char
/// boundary, marking the cut with `...`.
pub fn truncate_command(command: &str) -> String {
    if command.len() <= MAX_AUDIT_COMMAND_LEN {
        return command.to_string();
    }
    let mut end = MAX_AUDIT_COMMAND_LEN;
    while !command.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &command[..end])
}
