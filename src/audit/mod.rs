//! Audit logging module.
//!
//! Every command that passed authentication leaves one JSON line behind:
//! who sent it, what ran on the node, and how it ended. Rejected messages
//! are only traced, never audited.

mod entry;
mod logger;

pub use entry::{truncate_command, AuditEntry, AuditResult, MAX_AUDIT_COMMAND_LEN};
pub use logger::AuditLogger;
