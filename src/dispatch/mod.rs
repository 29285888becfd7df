//! Command dispatch module.
//!
//! One command at a time on the serial line, with a deadline.

mod dispatcher;
mod slot;
mod worker;

pub use dispatcher::{CommandDispatcher, Resolution};
pub use slot::{CommandSlot, PendingCommand};
pub use worker::{spawn_serial_worker, SerialCompletion, SerialJob, SerialWorker};
