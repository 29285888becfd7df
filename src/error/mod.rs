//! Error types for the remote-command daemon.
//!
//! Provides a unified error handling system using thiserror.

mod types;

pub use types::*;
